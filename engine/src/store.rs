//! Store - the document facade.
//!
//! The store stamps lifecycle metadata, routes reads through the cache and
//! the query engine, and keeps the cache coherent with the driver on every
//! mutation. Reads of a collection start with a full driver scan that is
//! then kept as a cache snapshot.

use crate::{
    cache::{Cache, CacheRegistry},
    clock::{Clock, SystemClock},
    document::{Document, ID_FIELD},
    driver::{MemoryDriver, StorageDriver},
    error::Result,
    id::generate_id,
    query::{Direction, Operator, Query, QueryResult},
    schema::Schema,
    sync::InFlightFlags,
    CollectionName, Error, Timestamp,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 64;

/// Notifications emitted by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A sync cycle finished and applied server changes
    Synced,
    /// A validation pass finished
    Validated,
    /// All local data was removed
    Wiped,
}

/// Controls the metadata an update stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Mark the document dirty (`_synced = false`)
    pub metadata: bool,
    /// Refresh `_updated_at`
    pub timestamps: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            metadata: true,
            timestamps: true,
        }
    }
}

impl UpdateOptions {
    /// Persist the document exactly as given.
    pub fn silent() -> Self {
        Self {
            metadata: false,
            timestamps: false,
        }
    }
}

/// Builder for [`DocumentStore`].
pub struct StoreBuilder {
    name: String,
    driver: Option<Arc<dyn StorageDriver>>,
    registry: Option<Arc<CacheRegistry>>,
    clock: Option<Arc<dyn Clock>>,
    schema: Schema,
}

impl StoreBuilder {
    /// Storage backend. Defaults to a fresh [`MemoryDriver`].
    pub fn driver(mut self, driver: Arc<dyn StorageDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Cache registry to take this database's cache from. Defaults to a
    /// private registry.
    pub fn registry(mut self, registry: Arc<CacheRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Validate the schema, initialise the driver and attach the cache.
    pub async fn open(self) -> Result<DocumentStore> {
        self.schema.validate()?;

        let driver = self
            .driver
            .unwrap_or_else(|| Arc::new(MemoryDriver::new()) as Arc<dyn StorageDriver>);
        driver.init(&self.schema).await?;

        let registry = self.registry.unwrap_or_else(CacheRegistry::new_shared);
        let cache = registry.cache(&self.name);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            database = %self.name,
            schema_version = self.schema.latest_version(),
            "document store opened"
        );

        Ok(DocumentStore {
            name: self.name,
            driver,
            cache,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
            schema: self.schema,
            events,
            in_flight: InFlightFlags::default(),
        })
    }
}

/// A local document database.
#[derive(Debug)]
pub struct DocumentStore {
    name: String,
    driver: Arc<dyn StorageDriver>,
    cache: Arc<Cache>,
    clock: Arc<dyn Clock>,
    schema: Schema,
    events: broadcast::Sender<StoreEvent>,
    pub(crate) in_flight: InFlightFlags,
}

impl DocumentStore {
    /// Start building a store for the database `name`.
    pub fn builder(name: impl Into<String>) -> StoreBuilder {
        StoreBuilder {
            name: name.into(),
            driver: None,
            registry: None,
            clock: None,
            schema: Schema::new(),
        }
    }

    /// Open an in-memory store with default settings.
    pub async fn open_in_memory(name: impl Into<String>) -> Result<Self> {
        Self::builder(name).open().await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The cache shared by every store of this database name.
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Start a query on a collection.
    pub fn collection(&self, name: impl Into<CollectionName>) -> CollectionQuery<'_> {
        CollectionQuery {
            store: self,
            query: Query::new(name),
        }
    }

    /// Listen for store events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Create a document in `collection` with a fresh id and metadata.
    pub async fn create(&self, collection: &str, data: Value) -> Result<Document> {
        let fields = into_fields(data)?;
        let id = generate_id(self.now_millis());
        self.insert_new(id, collection, fields).await
    }

    async fn insert_new(
        &self,
        id: String,
        collection: &str,
        fields: Map<String, Value>,
    ) -> Result<Document> {
        if collection.is_empty() {
            return Err(Error::Validation("collection name is empty".into()));
        }

        let doc = Document::new(id, collection, fields, self.now());
        self.cache.invalidate_results(collection);

        let doc = self.driver.create(doc).await?;
        self.remember(&doc);

        debug!(collection = %collection, id = %doc.id, "document created");
        Ok(doc)
    }

    /// Persist a document verbatim, metadata included.
    pub async fn store(&self, doc: Document) -> Result<Document> {
        if doc.id.is_empty() {
            return Err(Error::Validation("document has no _id".into()));
        }

        self.cache.invalidate_results(&doc.collection);
        let doc = self.driver.create(doc).await?;
        self.remember(&doc);

        Ok(doc)
    }

    /// Save changes to an existing document.
    pub async fn update(&self, mut doc: Document, options: UpdateOptions) -> Result<Document> {
        if doc.id.is_empty() {
            return Err(Error::Validation("cannot update a document without _id".into()));
        }

        if options.metadata {
            doc.synced = false;
        }
        if options.timestamps {
            doc.updated_at = self.now();
        }

        self.persist(doc).await
    }

    /// Update when `data` carries `_id` and `_created_at`, create otherwise.
    pub async fn update_or_create(&self, collection: &str, data: Value) -> Result<Document> {
        let Value::Object(mut object) = data else {
            return Err(Error::Validation("document must be a JSON object".into()));
        };

        let has_identity = object.get(ID_FIELD).is_some_and(|id| !id.is_null())
            && object.get("_created_at").is_some_and(|ts| !ts.is_null());

        if !has_identity {
            return self.create(collection, Value::Object(object)).await;
        }

        object
            .entry("_collection")
            .or_insert_with(|| Value::from(collection));
        let doc = Document::from_value(Value::Object(object))?;
        self.update(doc, UpdateOptions::default()).await
    }

    /// Soft delete.
    pub async fn trash(&self, mut doc: Document) -> Result<Document> {
        doc.mark_trashed(self.now());
        self.persist(doc).await
    }

    /// Undo a soft delete.
    pub async fn restore(&self, mut doc: Document) -> Result<Document> {
        doc.mark_restored(self.now());
        self.persist(doc).await
    }

    /// Mark for permanent removal. The document stays in storage until a
    /// sync cycle has uploaded it.
    pub async fn delete(&self, mut doc: Document) -> Result<Document> {
        doc.mark_purged(self.now());
        self.persist(doc).await
    }

    /// Move a stored document to another collection.
    pub async fn move_to(&self, mut doc: Document, collection: &str) -> Result<Document> {
        if doc.collection == collection {
            return Ok(doc);
        }
        if collection.is_empty() {
            return Err(Error::Validation("collection name is empty".into()));
        }
        if self.find(&doc.id).await?.is_none() {
            return Err(Error::NotFound(doc.id));
        }

        let previous = std::mem::replace(&mut doc.collection, collection.to_string());
        doc.touch(self.now());

        let doc = self.driver.update(doc).await?;

        self.cache.remove_collection_snapshot(&previous);
        self.cache.remove_collection_snapshot(collection);
        self.remember(&doc);

        debug!(id = %doc.id, from = %previous, to = %collection, "document moved");
        Ok(doc)
    }

    /// Physically remove a document from storage and cache.
    pub async fn delete_by_id(&self, id: &str) -> Result<()> {
        let collection = match self.cache.get_doc(id) {
            Some(doc) => Some(doc.collection),
            None => self.driver.get_by_id(id).await?.map(|doc| doc.collection),
        };

        self.driver.delete_by_id(id).await?;
        self.cache.remove_doc(id);
        if let Some(collection) = collection {
            self.cache.invalidate_results(&collection);
        }

        Ok(())
    }

    /// Look up a document by id, ignoring collection and visibility.
    pub async fn find(&self, id: &str) -> Result<Option<Document>> {
        if let Some(doc) = self.cache.get_doc(id) {
            return Ok(Some(doc));
        }

        let found = self.driver.get_by_id(id).await?;
        if let Some(doc) = &found {
            self.cache.put_doc(doc);
        }
        Ok(found)
    }

    /// Every stored document, trashed and purged included.
    pub async fn get_all(&self) -> Result<Vec<Document>> {
        self.driver.get_all().await
    }

    /// Sorted names of declared and stored collections.
    pub async fn collections(&self) -> Result<Vec<CollectionName>> {
        if let Some(names) = self.cache.get_known_collections() {
            return Ok(names);
        }

        let mut names: BTreeSet<CollectionName> = self.schema.collection_names().into_iter().collect();
        names.extend(self.driver.get_collections().await?);

        let names: Vec<_> = names.into_iter().collect();
        self.cache.set_known_collections(names.clone());
        Ok(names)
    }

    /// Remove every document of this database.
    pub async fn wipe(&self) -> Result<()> {
        self.driver.wipe().await?;
        self.cache.clear();

        info!(database = %self.name, "database wiped");
        self.emit(StoreEvent::Wiped);
        Ok(())
    }

    async fn persist(&self, doc: Document) -> Result<Document> {
        self.cache.invalidate_results(&doc.collection);
        let doc = self.driver.update(doc).await?;
        self.remember(&doc);
        Ok(doc)
    }

    fn remember(&self, doc: &Document) {
        self.cache.put_doc(doc);
        self.cache.invalidate_results(&doc.collection);
        self.cache.add_known_collection(&doc.collection);
    }

    async fn collection_docs(&self, collection: &str) -> Result<Vec<Document>> {
        if let Some(docs) = self.cache.get_collection_snapshot(collection) {
            debug!(collection = %collection, "collection served from cache");
            return Ok(docs);
        }

        debug!(collection = %collection, "collection cache miss, scanning driver");
        let epoch = self.cache.epoch(collection);
        let docs = self.driver.scan(Some(collection)).await?;
        self.cache.put_collection_snapshot(collection, &docs, epoch);
        Ok(docs)
    }

    async fn run(&self, query: &Query) -> Result<QueryResult> {
        let fingerprint = query.fingerprint();
        if let Some(result) = self.cache.get_result(&query.collection, &fingerprint) {
            return Ok(result);
        }

        let epoch = self.cache.epoch(&query.collection);
        let docs = self.collection_docs(&query.collection).await?;
        let result = query.execute(docs);
        self.cache
            .put_result(&query.collection, fingerprint, result.clone(), epoch);

        Ok(result)
    }
}

fn into_fields(data: Value) -> Result<Map<String, Value>> {
    match data {
        Value::Object(fields) => Ok(fields),
        other => Err(Error::Validation(format!(
            "document must be a JSON object, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A query bound to a store. Builder methods return a new value; terminal
/// methods consume it.
#[derive(Debug, Clone)]
pub struct CollectionQuery<'a> {
    store: &'a DocumentStore,
    query: Query,
}

impl<'a> CollectionQuery<'a> {
    /// The query built so far.
    pub fn query(&self) -> &Query {
        &self.query
    }

    fn map(self, f: impl FnOnce(Query) -> Query) -> Self {
        Self {
            store: self.store,
            query: f(self.query),
        }
    }

    pub fn filter(self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.map(|q| q.filter(field, op, value))
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.map(|q| q.eq(field, value))
    }

    /// Filter with a textual operator such as `">="`.
    pub fn filter_op(self, field: impl Into<String>, op: &str, value: impl Into<Value>) -> Result<Self> {
        let query = self.query.filter_op(field, op, value)?;
        Ok(Self {
            store: self.store,
            query,
        })
    }

    pub fn order_by(self, field: impl Into<String>, direction: Direction) -> Self {
        self.map(|q| q.order_by(field, direction))
    }

    pub fn group_by(self, field: impl Into<String>) -> Self {
        self.map(|q| q.group_by(field))
    }

    pub fn limit(self, limit: usize) -> Self {
        self.map(|q| q.limit(limit))
    }

    pub fn offset(self, offset: usize) -> Self {
        self.map(|q| q.offset(offset))
    }

    pub fn with_trashed(self) -> Self {
        self.map(Query::with_trashed)
    }

    pub fn only_trashed(self) -> Self {
        self.map(Query::only_trashed)
    }

    pub fn with_purged(self) -> Self {
        self.map(Query::with_purged)
    }

    /// Run the query.
    pub async fn get(self) -> Result<QueryResult> {
        self.store.run(&self.query).await
    }

    /// First matching document.
    pub async fn first(self) -> Result<Option<Document>> {
        let query = self.query.limit(1);
        let result = self.store.run(&query).await?;
        Ok(result.into_docs().into_iter().next())
    }

    /// Number of matching documents, ignoring limit and offset.
    pub async fn count(self) -> Result<usize> {
        Ok(self.store.run(&self.query).await?.total)
    }

    /// Document with `id` in this collection, if it passes the filters.
    pub async fn get_by_id(self, id: &str) -> Result<Option<Document>> {
        let Some(doc) = self.store.find(id).await? else {
            return Ok(None);
        };

        let visible = doc.collection == self.query.collection
            && self.query.filters.iter().all(|f| f.matches(&doc));
        Ok(visible.then_some(doc))
    }

    /// Create a document in this collection.
    pub async fn create(self, data: Value) -> Result<Document> {
        self.store.create(&self.query.collection, data).await
    }

    /// Return the document with `data._id` if it exists, otherwise create
    /// it. A given `_id` is kept for the new document.
    pub async fn first_or_create(self, data: Value) -> Result<Document> {
        let mut fields = into_fields(data)?;

        let requested = match fields.get(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            _ => None,
        };

        let Some(id) = requested else {
            return self.create(Value::Object(fields)).await;
        };

        if let Some(existing) = self.store.find(&id).await? {
            return Ok(existing);
        }

        fields.remove(ID_FIELD);
        self.store
            .insert_new(id, &self.query.collection, fields)
            .await
    }
}
