//! Query specification and evaluation.
//!
//! A [`Query`] is an immutable value: every builder method returns a new
//! query. Evaluation runs against an in-memory set of documents in a fixed
//! order: filter, sort, slice, group. The reported total is taken after
//! filtering and before slicing.
//!
//! Filters are typed predicates evaluated by a small interpreter. Field
//! values are never spliced into an expression, so a value containing quote
//! characters is just data.

use crate::{document::Document, error::Result, CollectionName, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::Neq),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            other => Err(Error::Validation(format!("unknown operator '{other}'"))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Eq => "=",
            Operator::Neq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
        };
        f.write_str(symbol)
    }
}

/// A single `(field, operator, value)` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate against a document. Missing fields read as `null`.
    pub fn matches(&self, doc: &Document) -> bool {
        let actual = doc.field(&self.field);

        match self.op {
            Operator::Eq => scalar_eq(&actual, &self.value),
            Operator::Neq => !scalar_eq(&actual, &self.value),
            Operator::Lt => scalar_cmp(&actual, &self.value) == Some(Ordering::Less),
            Operator::Lte => matches!(
                scalar_cmp(&actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gt => scalar_cmp(&actual, &self.value) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                scalar_cmp(&actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

const DELETED_AT: &str = "_deleted_at";
const PURGED: &str = "_purged";

/// A query over one collection.
///
/// New queries hide trashed and purged documents; see
/// [`Query::with_trashed`], [`Query::only_trashed`] and [`Query::with_purged`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub collection: CollectionName,
    pub filters: Vec<Filter>,
    pub orders: Vec<Order>,
    pub group_by: Vec<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    /// Start a query with the default visibility filters.
    pub fn new(collection: impl Into<CollectionName>) -> Self {
        Self {
            collection: collection.into(),
            filters: vec![
                Filter::new(DELETED_AT, Operator::Eq, Value::Null),
                Filter::new(PURGED, Operator::Eq, Value::from(0)),
            ],
            orders: Vec::new(),
            group_by: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// Add a filter.
    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::new(field, op, value.into()));
        self
    }

    /// Add an equality filter.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Operator::Eq, value)
    }

    /// Add a filter with a textual operator such as `"<="`.
    pub fn filter_op(self, field: impl Into<String>, op: &str, value: impl Into<Value>) -> Result<Self> {
        let op = op.parse()?;
        Ok(self.filter(field, op, value))
    }

    /// Sort by a field. Sorting again by the same field replaces its direction.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        let field = field.into();
        match self.orders.iter_mut().find(|o| o.field == field) {
            Some(existing) => existing.direction = direction,
            None => self.orders.push(Order { field, direction }),
        }
        self
    }

    /// Group results by a field. Repeated calls nest.
    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Include trashed documents.
    pub fn with_trashed(mut self) -> Self {
        self.filters.retain(|f| f.field != DELETED_AT);
        self
    }

    /// Return trashed documents only.
    pub fn only_trashed(mut self) -> Self {
        match self.filters.iter_mut().find(|f| f.field == DELETED_AT) {
            Some(filter) => {
                filter.op = Operator::Neq;
                filter.value = Value::Null;
            }
            None => self
                .filters
                .push(Filter::new(DELETED_AT, Operator::Neq, Value::Null)),
        }
        self
    }

    /// Include documents marked for purge.
    pub fn with_purged(mut self) -> Self {
        self.filters.retain(|f| f.field != PURGED);
        self
    }

    /// Stable key identifying this query, used by the result cache.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }

    /// Run against a document set.
    pub fn execute(&self, docs: Vec<Document>) -> QueryResult {
        execute(docs, self)
    }
}

/// Query output: possibly nested groups of documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Grouped {
    Docs(Vec<Document>),
    Groups(BTreeMap<String, Grouped>),
}

impl Grouped {
    /// Leaf documents, if ungrouped.
    pub fn docs(&self) -> Option<&[Document]> {
        match self {
            Grouped::Docs(docs) => Some(docs.as_slice()),
            Grouped::Groups(_) => None,
        }
    }

    /// A group by key, if grouped.
    pub fn group(&self, key: &str) -> Option<&Grouped> {
        match self {
            Grouped::Groups(groups) => groups.get(key),
            Grouped::Docs(_) => None,
        }
    }

    /// Flatten into a list, groups in key order.
    pub fn into_docs(self) -> Vec<Document> {
        match self {
            Grouped::Docs(docs) => docs,
            Grouped::Groups(groups) => groups
                .into_values()
                .flat_map(Grouped::into_docs)
                .collect(),
        }
    }

    /// Number of leaf documents.
    pub fn len(&self) -> usize {
        match self {
            Grouped::Docs(docs) => docs.len(),
            Grouped::Groups(groups) => groups.values().map(Grouped::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a terminal query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub docs: Grouped,
    /// Matches before pagination
    pub total: usize,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            docs: Grouped::Docs(Vec::new()),
            total: 0,
        }
    }

    /// Flattened documents.
    pub fn into_docs(self) -> Vec<Document> {
        self.docs.into_docs()
    }
}

/// Keep documents passing every filter.
pub fn filter(docs: Vec<Document>, filters: &[Filter]) -> Vec<Document> {
    docs.into_iter()
        .filter(|doc| filters.iter().all(|f| f.matches(doc)))
        .collect()
}

/// Stable multi-key sort.
///
/// Falsy values (missing, null, false, 0, "") come before truthy ones when
/// ascending and after them when descending. Truthy values of different
/// types order by type: bool, number, string, array, object.
pub fn sort(docs: Vec<Document>, orders: &[Order]) -> Vec<Document> {
    if orders.is_empty() {
        return docs;
    }

    let mut keyed: Vec<(Vec<Value>, Document)> = docs
        .into_iter()
        .map(|doc| {
            let keys = orders.iter().map(|o| doc.field(&o.field)).collect();
            (keys, doc)
        })
        .collect();

    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, orders));

    keyed.into_iter().map(|(_, doc)| doc).collect()
}

fn compare_keys(a: &[Value], b: &[Value], orders: &[Order]) -> Ordering {
    for ((va, vb), order) in a.iter().zip(b).zip(orders) {
        let ordering = match (is_falsy(va), is_falsy(vb)) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => sort_cmp(va, vb),
        };

        let ordering = match order.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Slice `[offset, offset + limit)`; no limit takes everything after `offset`.
pub fn paginate(docs: Vec<Document>, offset: usize, limit: Option<usize>) -> Vec<Document> {
    let iter = docs.into_iter().skip(offset);
    match limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

/// Partition recursively by each field in turn.
pub fn group(docs: Vec<Document>, fields: &[String]) -> Grouped {
    let Some((field, rest)) = fields.split_first() else {
        return Grouped::Docs(docs);
    };

    let mut buckets: BTreeMap<String, Vec<Document>> = BTreeMap::new();
    for doc in docs {
        buckets
            .entry(group_key(&doc.field(field)))
            .or_default()
            .push(doc);
    }

    Grouped::Groups(
        buckets
            .into_iter()
            .map(|(key, docs)| (key, group(docs, rest)))
            .collect(),
    )
}

/// Full pipeline: filter, sort, slice, group.
pub fn execute(docs: Vec<Document>, query: &Query) -> QueryResult {
    let docs = sort(filter(docs, &query.filters), &query.orders);
    let total = docs.len();
    let page = paginate(docs, query.offset, query.limit);

    QueryResult {
        docs: group(page, &query.group_by),
        total,
    }
}

fn group_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Equality on scalars. Containers never compare equal.
fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(_), Value::Number(_)) => scalar_cmp(a, b) == Some(Ordering::Equal),
        _ => false,
    }
}

/// Total order used for sorting: same-type scalars compare by value,
/// everything else by type rank.
fn sort_cmp(a: &Value, b: &Value) -> Ordering {
    scalar_cmp(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Ordering between two numbers or two strings; anything else is unordered.
fn scalar_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
