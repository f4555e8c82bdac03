//! Document types and lifecycle metadata.

use crate::{error::Result, CollectionName, DocumentId, Error, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved field holding the document id.
pub const ID_FIELD: &str = "_id";

/// Reserved metadata fields, in the order they are declared to drivers.
pub const META_FIELDS: [&str; 6] = [
    "_collection",
    "_created_at",
    "_updated_at",
    "_deleted_at",
    "_purged",
    "_synced",
];

/// Check whether a field name is reserved for metadata.
pub fn is_reserved(field: &str) -> bool {
    field == ID_FIELD || META_FIELDS.contains(&field)
}

/// A stored document: user fields plus lifecycle metadata.
///
/// On the wire the metadata fields sit next to the user fields, prefixed
/// with an underscore, and `_purged` is encoded as `0`/`1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Globally unique identifier
    #[serde(rename = "_id")]
    pub id: DocumentId,
    /// Owning collection
    #[serde(rename = "_collection")]
    pub collection: CollectionName,
    /// Creation time (seconds since epoch)
    #[serde(rename = "_created_at", default, with = "lenient_timestamp")]
    pub created_at: Timestamp,
    /// Last modification time (seconds since epoch)
    #[serde(rename = "_updated_at", default, with = "lenient_timestamp")]
    pub updated_at: Timestamp,
    /// Soft delete time, if trashed
    #[serde(rename = "_deleted_at", default, with = "lenient_optional_timestamp")]
    pub deleted_at: Option<Timestamp>,
    /// Marked for permanent removal once synced
    #[serde(rename = "_purged", default, with = "purged_flag")]
    pub purged: bool,
    /// Whether the server has acknowledged the current state
    #[serde(rename = "_synced", default)]
    pub synced: bool,
    /// User fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Create a freshly stamped document.
    ///
    /// Reserved keys in `fields` are dropped; metadata is owned by the store.
    pub fn new(
        id: impl Into<DocumentId>,
        collection: impl Into<CollectionName>,
        mut fields: Map<String, Value>,
        now: Timestamp,
    ) -> Self {
        fields.retain(|key, _| !is_reserved(key));

        Self {
            id: id.into(),
            collection: collection.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            purged: false,
            synced: false,
            fields,
        }
    }

    /// Parse a full document (metadata included) from a JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Validation("document must be a JSON object".into()));
        }

        let doc: Document = serde_json::from_value(value)?;
        if doc.id.is_empty() {
            return Err(Error::Validation("document has an empty _id".into()));
        }

        Ok(doc)
    }

    /// Parse a full document from its JSON text form.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Read any field, metadata included. Missing fields read as `null`.
    pub fn field(&self, name: &str) -> Value {
        match name {
            "_id" => Value::from(self.id.clone()),
            "_collection" => Value::from(self.collection.clone()),
            "_created_at" => Value::from(self.created_at),
            "_updated_at" => Value::from(self.updated_at),
            "_deleted_at" => self.deleted_at.map(Value::from).unwrap_or(Value::Null),
            "_purged" => Value::from(u8::from(self.purged)),
            "_synced" => Value::from(self.synced),
            other => self.fields.get(other).cloned().unwrap_or(Value::Null),
        }
    }

    /// Get a user field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set a user field. Reserved names are ignored.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        let key = key.into();
        if !is_reserved(&key) {
            self.fields.insert(key, value);
        }
        self
    }

    /// Not trashed and not purged.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none() && !self.purged
    }

    /// Soft-deleted (purged documents are trashed too).
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Record a local modification.
    pub fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
        self.synced = false;
    }

    /// Move to the trash.
    pub fn mark_trashed(&mut self, now: Timestamp) {
        self.deleted_at = Some(now);
        self.touch(now);
    }

    /// Take out of the trash.
    pub fn mark_restored(&mut self, now: Timestamp) {
        self.deleted_at = None;
        self.touch(now);
    }

    /// Mark for permanent removal. Always trashes as well.
    pub fn mark_purged(&mut self, now: Timestamp) {
        self.deleted_at = Some(now);
        self.purged = true;
        self.touch(now);
    }
}

/// Timestamps arrive as integers, floats (fractional seconds) or numeric strings.
fn timestamp_from_value(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as Timestamp)),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f as Timestamp)),
        _ => None,
    }
}

mod lenient_timestamp {
    use super::timestamp_from_value;
    use crate::Timestamp;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(*ts)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Null => Ok(0),
            other => timestamp_from_value(&other)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {other}"))),
        }
    }
}

mod lenient_optional_timestamp {
    use super::timestamp_from_value;
    use crate::Timestamp;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(
        ts: &Option<Timestamp>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_i64(*ts),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Timestamp>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Null => Ok(None),
            other => timestamp_from_value(&other)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {other}"))),
        }
    }
}

mod purged_flag {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(purged: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*purged))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(b),
            Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
            Value::String(s) if s == "0" || s.is_empty() => Ok(false),
            Value::String(s) if s == "1" => Ok(true),
            other => Err(D::Error::custom(format!("invalid _purged flag: {other}"))),
        }
    }
}
