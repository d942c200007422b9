use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::BoxFuture;
use crate::ports::documents::{
    CollectionPath, DocumentPath, DocumentQuery, DocumentSnapshot, DocumentStore,
    DocumentTransaction, FieldPatch, StoreError, WriteBatch,
};
use crate::util::{backoff_ms, uuid_v7_without_dashes};

#[derive(Clone, Debug)]
pub struct TransactionPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for TransactionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 20,
            max_backoff_ms: 500,
        }
    }
}

impl TransactionPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }
}

/// Handle passed to a transaction body. Reads go through the store and are
/// version-tracked; updates are buffered until the runner commits.
pub struct Transaction {
    inner: Box<dyn DocumentTransaction>,
}

impl Transaction {
    pub async fn get(&mut self, path: &DocumentPath) -> DomainResult<DocumentSnapshot> {
        Ok(self.inner.get(path).await?)
    }

    pub fn update(&mut self, path: &DocumentPath, patch: FieldPatch) {
        if !patch.is_empty() {
            self.inner.update(path, patch);
        }
    }
}

/// Runs `body` inside a store transaction.
///
/// An `Err` from the body aborts the attempt and nothing is committed. A
/// commit that loses a write race is retried from scratch with backoff; once
/// the attempts run out the caller sees `DomainError::Unavailable`.
pub async fn run_transaction<T, F>(
    store: &dyn DocumentStore,
    policy: &TransactionPolicy,
    body: F,
) -> DomainResult<T>
where
    T: Send,
    F: for<'t> Fn(&'t mut Transaction) -> BoxFuture<'t, DomainResult<T>> + Send + Sync,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let mut tx = Transaction {
            inner: store.begin_transaction().await?,
        };
        let value = body(&mut tx).await?;
        match tx.inner.commit().await {
            Ok(()) => return Ok(value),
            Err(StoreError::Conflict) if attempt < max_attempts => {
                let delay = backoff_ms(policy.base_backoff_ms, attempt, policy.max_backoff_ms);
                warn!(
                    store = store.name(),
                    attempt, delay_ms = delay, "transaction conflict, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(StoreError::Conflict) => break,
            Err(err) => return Err(err.into()),
        }
    }
    warn!(
        store = store.name(),
        attempts = max_attempts,
        "transaction retries exhausted"
    );
    Err(DomainError::Unavailable(format!(
        "transaction did not commit after {max_attempts} attempts"
    )))
}

/// Decodes a snapshot body, treating a shape mismatch as stored-data
/// corruption rather than caller error.
pub fn decode_snapshot<T: DeserializeOwned>(
    kind: &str,
    snapshot: &DocumentSnapshot,
) -> DomainResult<Option<T>> {
    match snapshot.decode::<T>() {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(err)) => {
            warn!(kind, id = %snapshot.id, error = %err, "stored document failed to decode");
            Err(DomainError::Decode(format!("{kind} {}: {err}", snapshot.id)))
        }
    }
}

/// Loads each id in request order, skipping the ones that do not exist.
/// Fails with `NotFound` when none of them do.
pub async fn fetch_many<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &CollectionPath,
    kind: &str,
    ids: &[String],
) -> DomainResult<Vec<(String, T)>> {
    let ids = crate::util::dedupe_and_trim(ids);
    if ids.is_empty() {
        return Err(DomainError::Validation(format!(
            "at least one {kind} id is required"
        )));
    }

    let mut found = Vec::with_capacity(ids.len());
    for id in &ids {
        let snapshot = store.get(&collection.doc(id.clone())).await?;
        match decode_snapshot::<T>(kind, &snapshot)? {
            Some(value) => found.push((id.clone(), value)),
            None => debug!(kind, id = %id, "requested document does not exist"),
        }
    }

    if found.is_empty() {
        return Err(DomainError::NotFound(format!("{kind} ids [{}]", ids.join(", "))));
    }
    Ok(found)
}

#[derive(Clone, Debug)]
struct StoredDocument {
    version: u64,
    body: Map<String, Value>,
}

#[derive(Default)]
struct MemoryState {
    documents: BTreeMap<DocumentPath, StoredDocument>,
}

impl MemoryState {
    fn version_of(&self, path: &DocumentPath) -> u64 {
        self.documents.get(path).map(|doc| doc.version).unwrap_or(0)
    }

    fn snapshot(&self, path: &DocumentPath) -> DocumentSnapshot {
        match self.documents.get(path) {
            Some(doc) => DocumentSnapshot::found(path.id(), Value::Object(doc.body.clone())),
            None => DocumentSnapshot::missing(path.id()),
        }
    }

    /// Applies every update or none of them.
    fn apply_all(&mut self, updates: Vec<(DocumentPath, FieldPatch)>) -> Result<(), StoreError> {
        if let Some((path, _)) = updates
            .iter()
            .find(|(path, _)| !self.documents.contains_key(path))
        {
            return Err(StoreError::NotFound(path.to_string()));
        }
        for (path, patch) in updates {
            if let Some(doc) = self.documents.get_mut(&path) {
                patch.apply_to(&mut doc.body);
                doc.version += 1;
            }
        }
        Ok(())
    }
}

/// Versioned in-process document store used by the `memory` backend and tests.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    state: Arc<Mutex<MemoryState>>,
    fail_batches: Arc<AtomicBool>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent batch commits fail with `Unavailable`.
    pub fn fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.documents.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
    state
        .lock()
        .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
}

fn object_body(body: Value) -> Result<Map<String, Value>, StoreError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Operation(
            "document body must be a JSON object".into(),
        )),
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move { self.lock().map(|_| ()) })
    }

    fn get(&self, path: &DocumentPath) -> BoxFuture<'_, Result<DocumentSnapshot, StoreError>> {
        let path = path.clone();
        Box::pin(async move { Ok(self.lock()?.snapshot(&path)) })
    }

    fn create(&self, path: &DocumentPath, body: Value) -> BoxFuture<'_, Result<(), StoreError>> {
        let path = path.clone();
        Box::pin(async move {
            let body = object_body(body)?;
            let mut state = self.lock()?;
            if state.documents.contains_key(&path) {
                return Err(StoreError::AlreadyExists(path.to_string()));
            }
            state
                .documents
                .insert(path, StoredDocument { version: 1, body });
            Ok(())
        })
    }

    fn add(
        &self,
        collection: &CollectionPath,
        body: Value,
    ) -> BoxFuture<'_, Result<String, StoreError>> {
        let collection = collection.clone();
        Box::pin(async move {
            let body = object_body(body)?;
            let id = uuid_v7_without_dashes();
            let mut state = self.lock()?;
            state
                .documents
                .insert(collection.doc(id.clone()), StoredDocument { version: 1, body });
            Ok(id)
        })
    }

    fn update(
        &self,
        path: &DocumentPath,
        patch: FieldPatch,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        let path = path.clone();
        Box::pin(async move { self.lock()?.apply_all(vec![(path, patch)]) })
    }

    fn commit_batch(&self, batch: WriteBatch) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if self.fail_batches.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("batch commit failed".into()));
            }
            self.lock()?.apply_all(batch.into_updates())
        })
    }

    fn query(
        &self,
        collection: &CollectionPath,
        query: &DocumentQuery,
    ) -> BoxFuture<'_, Result<Vec<DocumentSnapshot>, StoreError>> {
        let collection = collection.clone();
        let query = query.clone();
        Box::pin(async move {
            let mut results: Vec<DocumentSnapshot> = {
                let state = self.lock()?;
                state
                    .documents
                    .iter()
                    .filter(|(path, _)| path.collection() == &collection)
                    .map(|(path, doc)| (path, Value::Object(doc.body.clone())))
                    .filter(|(_, body)| query.matches(body))
                    .map(|(path, body)| DocumentSnapshot::found(path.id(), body))
                    .collect()
            };
            query.sort(&mut results);
            Ok(results)
        })
    }

    fn begin_transaction(
        &self,
    ) -> BoxFuture<'_, Result<Box<dyn DocumentTransaction>, StoreError>> {
        Box::pin(async move {
            let tx: Box<dyn DocumentTransaction> = Box::new(MemoryTransaction {
                state: Arc::clone(&self.state),
                reads: HashMap::new(),
                writes: Vec::new(),
            });
            Ok(tx)
        })
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    reads: HashMap<DocumentPath, u64>,
    writes: Vec<(DocumentPath, FieldPatch)>,
}

impl DocumentTransaction for MemoryTransaction {
    fn get(&mut self, path: &DocumentPath) -> BoxFuture<'_, Result<DocumentSnapshot, StoreError>> {
        let path = path.clone();
        Box::pin(async move {
            let (version, snapshot) = {
                let state = lock_state(&self.state)?;
                (state.version_of(&path), state.snapshot(&path))
            };
            self.reads.entry(path).or_insert(version);
            Ok(snapshot)
        })
    }

    fn update(&mut self, path: &DocumentPath, patch: FieldPatch) {
        self.writes.push((path.clone(), patch));
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        let MemoryTransaction {
            state: shared,
            reads,
            writes,
        } = *self;
        Box::pin(async move {
            let mut state = lock_state(&shared)?;
            let stale = reads
                .iter()
                .any(|(path, version)| state.version_of(path) != *version);
            if stale {
                return Err(StoreError::Conflict);
            }
            state.apply_all(writes)
        })
    }
}
