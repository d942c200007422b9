use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use super::BoxFuture;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    /// A subcollection living under a document, e.g. `groups/{id}/posts`.
    pub fn nested(parent: &DocumentPath, name: &str) -> Self {
        Self(format!("{}/{}", parent.key(), name))
    }

    pub fn doc(&self, id: impl Into<String>) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

impl DocumentPath {
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.collection.as_str(), self.id)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub body: Option<Value>,
}

impl DocumentSnapshot {
    pub fn missing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: None,
        }
    }

    pub fn found(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            body: Some(body),
        }
    }

    pub fn exists(&self) -> bool {
        self.body.is_some()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.body
            .as_ref()
            .map(|body| serde_json::from_value(body.clone()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    /// Appends each value that is not already present in the array field.
    ArrayUnion(Vec<Value>),
}

/// A sparse, field-level update. Fields not named are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldPatch {
    fields: BTreeMap<String, FieldUpdate>,
}

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields
            .insert(field.to_string(), FieldUpdate::Set(value.into()));
        self
    }

    pub fn array_union<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.fields.insert(
            field.to_string(),
            FieldUpdate::ArrayUnion(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldUpdate)> {
        self.fields.iter()
    }

    /// The plain values this patch writes, for echoing back to callers.
    pub fn to_values(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(field, update)| {
                let value = match update {
                    FieldUpdate::Set(value) => value.clone(),
                    FieldUpdate::ArrayUnion(values) => Value::Array(values.clone()),
                };
                (field.clone(), value)
            })
            .collect()
    }

    pub fn apply_to(&self, body: &mut Map<String, Value>) {
        for (field, update) in &self.fields {
            match update {
                FieldUpdate::Set(value) => {
                    body.insert(field.clone(), value.clone());
                }
                FieldUpdate::ArrayUnion(values) => {
                    let mut current = match body.remove(field) {
                        Some(Value::Array(items)) => items,
                        _ => Vec::new(),
                    };
                    for value in values {
                        if !current.contains(value) {
                            current.push(value.clone());
                        }
                    }
                    body.insert(field.clone(), Value::Array(current));
                }
            }
        }
    }
}

/// Write-only, all-or-nothing group of sparse updates.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    updates: Vec<(DocumentPath, FieldPatch)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, path: DocumentPath, patch: FieldPatch) {
        self.updates.push((path, patch));
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn updates(&self) -> &[(DocumentPath, FieldPatch)] {
        &self.updates
    }

    pub fn into_updates(self) -> Vec<(DocumentPath, FieldPatch)> {
        self.updates
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Conjunctive filters followed by an optional single-field ordering.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentQuery {
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
}

impl DocumentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value.into())
    }

    pub fn where_gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Gte, value.into())
    }

    pub fn where_lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Lte, value.into())
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    fn filter(mut self, field: &str, op: FilterOp, value: Value) -> Self {
        self.filters.push(FieldFilter {
            field: field.to_string(),
            op,
            value,
        });
        self
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.filters.iter().all(|filter| {
            let Some(actual) = body.get(&filter.field) else {
                return false;
            };
            match filter.op {
                FilterOp::Eq => actual == &filter.value,
                FilterOp::Gte => matches!(
                    compare_values(actual, &filter.value),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                FilterOp::Lte => matches!(
                    compare_values(actual, &filter.value),
                    Some(Ordering::Less | Ordering::Equal)
                ),
            }
        })
    }

    pub fn sort(&self, snapshots: &mut [DocumentSnapshot]) {
        let Some(order_by) = &self.order_by else {
            return;
        };
        snapshots.sort_by(|left, right| {
            let left = left.body.as_ref().and_then(|body| body.get(&order_by.field));
            let right = right.body.as_ref().and_then(|body| body.get(&order_by.field));
            let ordering = match (left, right) {
                (Some(left), Some(right)) => {
                    compare_values(left, right).unwrap_or(Ordering::Equal)
                }
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            match order_by.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
    }
}

/// Orders two scalar JSON values of the same kind; mixed kinds are unordered.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => match (left.as_i64(), right.as_i64()) {
            (Some(left), Some(right)) => Some(left.cmp(&right)),
            _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
        },
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {0} not found")]
    NotFound(String),
    #[error("document {0} already exists")]
    AlreadyExists(String),
    #[error("transaction conflict")]
    Conflict,
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("document store operation failed: {0}")]
    Operation(String),
}

/// Reads recorded by a transaction are validated at commit time; writes are
/// buffered and applied atomically only if none of those reads went stale.
pub trait DocumentTransaction: Send {
    fn get(&mut self, path: &DocumentPath) -> BoxFuture<'_, Result<DocumentSnapshot, StoreError>>;
    fn update(&mut self, path: &DocumentPath, patch: FieldPatch);
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>>;
}

pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &'static str;

    fn health_check(&self) -> BoxFuture<'_, Result<(), StoreError>>;

    fn get(&self, path: &DocumentPath) -> BoxFuture<'_, Result<DocumentSnapshot, StoreError>>;

    /// Inserts at a caller-chosen id; never overwrites.
    fn create(&self, path: &DocumentPath, body: Value) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Inserts with a store-generated id and returns it.
    fn add(
        &self,
        collection: &CollectionPath,
        body: Value,
    ) -> BoxFuture<'_, Result<String, StoreError>>;

    fn update(
        &self,
        path: &DocumentPath,
        patch: FieldPatch,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    fn commit_batch(&self, batch: WriteBatch) -> BoxFuture<'_, Result<(), StoreError>>;

    fn query(
        &self,
        collection: &CollectionPath,
        query: &DocumentQuery,
    ) -> BoxFuture<'_, Result<Vec<DocumentSnapshot>, StoreError>>;

    fn begin_transaction(
        &self,
    ) -> BoxFuture<'_, Result<Box<dyn DocumentTransaction>, StoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_collection_paths_include_parent_key() {
        let group = CollectionPath::root("groups").doc("g-1");
        let posts = CollectionPath::nested(&group, "posts");
        assert_eq!(posts.as_str(), "groups/g-1/posts");
        assert_eq!(posts.doc("p-1").key(), "groups/g-1/posts/p-1");
    }

    #[test]
    fn array_union_does_not_duplicate_existing_values() {
        let mut body = json!({ "members": ["u-1"], "name": "old" })
            .as_object()
            .cloned()
            .unwrap_or_default();
        FieldPatch::new()
            .array_union("members", ["u-1", "u-2"])
            .set("name", "new")
            .apply_to(&mut body);
        assert_eq!(body["members"], json!(["u-1", "u-2"]));
        assert_eq!(body["name"], json!("new"));
    }

    #[test]
    fn array_union_creates_missing_array_field() {
        let mut body = Map::new();
        FieldPatch::new()
            .array_union("groups", ["g-1"])
            .apply_to(&mut body);
        assert_eq!(body["groups"], json!(["g-1"]));
    }

    #[test]
    fn query_filters_are_conjunctive_and_inclusive() {
        let query = DocumentQuery::new()
            .where_eq("author_id", "a")
            .where_gte("at", 10)
            .where_lte("at", 20);
        assert!(query.matches(&json!({ "author_id": "a", "at": 10 })));
        assert!(query.matches(&json!({ "author_id": "a", "at": 20 })));
        assert!(!query.matches(&json!({ "author_id": "a", "at": 21 })));
        assert!(!query.matches(&json!({ "author_id": "b", "at": 15 })));
        assert!(!query.matches(&json!({ "author_id": "a" })));
    }

    #[test]
    fn sort_descending_orders_by_field() {
        let query = DocumentQuery::new().order_by("at", SortDirection::Descending);
        let mut snapshots = vec![
            DocumentSnapshot::found("1", json!({ "at": 1 })),
            DocumentSnapshot::found("3", json!({ "at": 3 })),
            DocumentSnapshot::found("2", json!({ "at": 2 })),
        ];
        query.sort(&mut snapshots);
        let ids: Vec<_> = snapshots.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
    }

    #[test]
    fn mixed_kinds_do_not_compare() {
        assert_eq!(compare_values(&json!(1), &json!("1")), None);
        assert_eq!(compare_values(&json!(1.5), &json!(2)), Some(Ordering::Less));
    }
}
