//! Schema declarations.
//!
//! A schema is a list of versions, each declaring the indexed fields of
//! some collections. Only field lists are declared; there are no data
//! migrations. Later versions replace the declaration of a collection.

use crate::{
    document::{is_reserved, ID_FIELD, META_FIELDS},
    error::Result,
    CollectionName, Error, SchemaVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Declared fields of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection name
    pub name: CollectionName,
    /// Declared user fields
    pub fields: Vec<String>,
}

impl CollectionSchema {
    /// Create a new collection declaration.
    pub fn new<I, S>(name: impl Into<CollectionName>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("collection name is empty".into()));
        }

        for field in &self.fields {
            if field.is_empty() {
                return Err(Error::Validation(format!(
                    "empty field name in collection '{}'",
                    self.name
                )));
            }
            if is_reserved(field) {
                return Err(Error::Validation(format!(
                    "field '{}' in collection '{}' is reserved",
                    field, self.name
                )));
            }
        }

        Ok(())
    }
}

/// One schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    /// Version number, starting at 1
    pub version: SchemaVersion,
    /// Collections declared in this version
    pub collections: BTreeMap<CollectionName, CollectionSchema>,
}

impl Migration {
    /// Create an empty version.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            collections: BTreeMap::new(),
        }
    }

    /// Builder-style method to declare a collection.
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }
}

/// Schema for the whole database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Versions by number
    pub versions: BTreeMap<SchemaVersion, Migration>,
}

impl Schema {
    /// Create an empty schema. Collections can still be used; they are just
    /// not declared up front.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a version, replacing any version with the same number.
    pub fn add_version(&mut self, migration: Migration) -> &mut Self {
        self.versions.insert(migration.version, migration);
        self
    }

    /// Builder-style method to add a version.
    pub fn with_version(mut self, migration: Migration) -> Self {
        self.add_version(migration);
        self
    }

    /// Highest declared version, 0 for an empty schema.
    pub fn latest_version(&self) -> SchemaVersion {
        self.versions.keys().next_back().copied().unwrap_or(0)
    }

    /// Latest declaration of a collection.
    pub fn get_collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.versions
            .values()
            .rev()
            .find_map(|migration| migration.collections.get(name))
    }

    /// Every collection declared by any version, sorted.
    pub fn collection_names(&self) -> Vec<CollectionName> {
        self.versions
            .values()
            .flat_map(|migration| migration.collections.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Field list handed to drivers: `_id`, the declared fields, then the
    /// metadata fields.
    pub fn prepared_fields(&self, name: &str) -> Option<Vec<String>> {
        let collection = self.get_collection(name)?;

        let mut fields = Vec::with_capacity(collection.fields.len() + META_FIELDS.len() + 1);
        fields.push(ID_FIELD.to_string());
        fields.extend(collection.fields.iter().cloned());
        fields.extend(META_FIELDS.iter().map(|f| f.to_string()));

        Some(fields)
    }

    /// Check every version for bad names.
    pub fn validate(&self) -> Result<()> {
        for (version, migration) in &self.versions {
            if *version == 0 {
                return Err(Error::Validation("schema versions start at 1".into()));
            }
            for collection in migration.collections.values() {
                collection.validate()?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> Schema {
        Schema::new()
            .with_version(
                Migration::new(1)
                    .with_collection(CollectionSchema::new("tasks", ["title"]))
                    .with_collection(CollectionSchema::new("notes", ["body"])),
            )
            .with_version(
                Migration::new(2).with_collection(CollectionSchema::new("tasks", ["title", "due"])),
            )
    }

    #[test]
    fn latest_declaration_wins() {
        let schema = test_schema();

        assert_eq!(schema.latest_version(), 2);
        assert_eq!(
            schema.get_collection("tasks").unwrap().fields,
            vec!["title", "due"]
        );
        assert_eq!(schema.get_collection("notes").unwrap().fields, vec!["body"]);
        assert!(schema.get_collection("missing").is_none());
    }

    #[test]
    fn collection_names_are_sorted_and_unique() {
        assert_eq!(test_schema().collection_names(), vec!["notes", "tasks"]);
        assert!(Schema::new().collection_names().is_empty());
    }

    #[test]
    fn prepared_fields_wrap_declaration() {
        let fields = test_schema().prepared_fields("tasks").unwrap();

        assert_eq!(fields.first().map(String::as_str), Some("_id"));
        assert_eq!(&fields[1..3], ["title", "due"]);
        assert_eq!(fields.last().map(String::as_str), Some("_synced"));
        assert_eq!(fields.len(), 3 + META_FIELDS.len());
    }

    #[test]
    fn reserved_field_is_rejected() {
        let schema = Schema::new().with_version(
            Migration::new(1).with_collection(CollectionSchema::new("tasks", ["_synced"])),
        );

        assert!(matches!(schema.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn version_zero_is_rejected() {
        let schema = Schema::new().with_version(Migration::new(0));
        assert!(schema.validate().is_err());
        assert!(test_schema().validate().is_ok());
    }

    #[test]
    fn schema_serialization() {
        let schema = test_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }
}
