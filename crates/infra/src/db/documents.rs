use std::collections::HashMap;
use std::sync::Arc;

use blessing_domain::ports::BoxFuture;
use blessing_domain::ports::documents::{
    CollectionPath, DocumentPath, DocumentQuery, DocumentSnapshot, DocumentStore,
    DocumentTransaction, FieldPatch, FieldUpdate, FilterOp, SortDirection, StoreError, WriteBatch,
};
use blessing_domain::util::uuid_v7_without_dashes;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;

use super::DbConfig;

const VERSION_CONFLICT: &str = "version conflict";
const DOCUMENT_MISSING: &str = "document not found";

/// Every document lives in one `document` table, keyed by its full path.
#[derive(Clone)]
pub struct SurrealDocumentStore {
    client: Arc<Surreal<Client>>,
}

impl SurrealDocumentStore {
    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        let db = super::connect(db_config).await?;
        Ok(Self {
            client: Arc::new(db),
        })
    }
}

#[derive(Debug, Deserialize)]
struct DocumentRow {
    doc_id: String,
    #[serde(default)]
    version: u64,
    body: Value,
}

/// SurrealQL text plus the single `$p` object every value is bound through.
#[derive(Debug, Default)]
struct Compiled {
    sql: String,
    params: Map<String, Value>,
}

impl Compiled {
    fn param(&mut self, value: Value) -> String {
        let name = format!("v{}", self.params.len());
        self.params.insert(name.clone(), value);
        format!("$p.{name}")
    }

    fn line(&mut self, statement: &str) {
        self.sql.push_str(statement);
        self.sql.push('\n');
    }
}

/// Field names are spliced into statements, so only plain identifiers pass.
fn field_ident(field: &str) -> Result<&str, StoreError> {
    let mut chars = field.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(field)
    } else {
        Err(StoreError::Operation(format!("invalid field name '{field}'")))
    }
}

fn record(key_param: &str) -> String {
    format!("type::record('document', {key_param})")
}

fn compile_update(
    compiled: &mut Compiled,
    index: usize,
    path: &DocumentPath,
    patch: &FieldPatch,
) -> Result<(), StoreError> {
    let key = compiled.param(Value::String(path.key()));
    let mut assignments = vec!["version += 1".to_string()];
    for (field, update) in patch.iter() {
        let field = field_ident(field)?;
        let assignment = match update {
            FieldUpdate::Set(value) => {
                format!("body.{field} = {}", compiled.param(value.clone()))
            }
            FieldUpdate::ArrayUnion(values) => format!(
                "body.{field} = array::union(body.{field} ?? [], {})",
                compiled.param(Value::Array(values.clone()))
            ),
        };
        assignments.push(assignment);
    }
    compiled.line(&format!(
        "LET $u{index} = (UPDATE {} SET {} RETURN AFTER);",
        record(&key),
        assignments.join(", ")
    ));
    compiled.line(&format!(
        "IF array::len($u{index}) == 0 {{ THROW \"{DOCUMENT_MISSING}: \" + {key} }};"
    ));
    Ok(())
}

fn compile_version_check(compiled: &mut Compiled, path: &DocumentPath, version: u64) {
    let key = compiled.param(Value::String(path.key()));
    let expected = compiled.param(json!(version));
    compiled.line(&format!(
        "IF ((SELECT VALUE version FROM ONLY {}) ?? 0) != {expected} {{ THROW \"{VERSION_CONFLICT}\" }};",
        record(&key)
    ));
}

/// One transaction script: read-version checks first, then every update.
/// Any THROW cancels the whole script.
fn compile_write_script(
    reads: &[(DocumentPath, u64)],
    writes: &[(DocumentPath, FieldPatch)],
) -> Result<Compiled, StoreError> {
    let mut compiled = Compiled::default();
    compiled.line("BEGIN TRANSACTION;");
    for (path, version) in reads {
        compile_version_check(&mut compiled, path, *version);
    }
    for (index, (path, patch)) in writes.iter().enumerate() {
        compile_update(&mut compiled, index, path, patch)?;
    }
    compiled.line("COMMIT TRANSACTION;");
    Ok(compiled)
}

fn compile_query(collection: &CollectionPath, query: &DocumentQuery) -> Result<Compiled, StoreError> {
    let mut compiled = Compiled::default();
    let collection_param = compiled.param(Value::String(collection.as_str().to_string()));
    let mut conditions = vec![format!("collection = {collection_param}")];
    for filter in &query.filters {
        let field = field_ident(&filter.field)?;
        let op = match filter.op {
            FilterOp::Eq => "=",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
        };
        let value = compiled.param(filter.value.clone());
        conditions.push(format!("body.{field} {op} {value}"));
    }

    let mut projection = "doc_id, version, body".to_string();
    let mut ordering = String::new();
    if let Some(order_by) = &query.order_by {
        let field = field_ident(&order_by.field)?;
        projection.push_str(&format!(", body.{field} AS sort_key"));
        let direction = match order_by.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        ordering = format!(" ORDER BY sort_key {direction}");
    }

    compiled.line(&format!(
        "SELECT {projection} FROM document WHERE {}{ordering};",
        conditions.join(" AND ")
    ));
    Ok(compiled)
}

/// Picks the most specific failure out of a script's statement errors; a
/// cancelled transaction reports a generic error on every other statement.
fn classify_errors<I>(messages: I) -> StoreError
where
    I: IntoIterator<Item = String>,
{
    let messages: Vec<String> = messages.into_iter().collect();
    if messages.iter().any(|m| m.contains(VERSION_CONFLICT)) {
        return StoreError::Conflict;
    }
    if let Some(message) = messages.iter().find(|m| m.contains(DOCUMENT_MISSING)) {
        let key = message
            .split(DOCUMENT_MISSING)
            .nth(1)
            .map(|rest| rest.trim_start_matches(':').trim().to_string())
            .unwrap_or_default();
        return StoreError::NotFound(key);
    }
    map_error_message(messages.first().map(String::as_str).unwrap_or("unknown error"))
}

fn map_error_message(message: &str) -> StoreError {
    let lowered = message.to_lowercase();
    if lowered.contains("already exists") || lowered.contains("duplicate") {
        return StoreError::AlreadyExists(message.to_string());
    }
    if lowered.contains("can be retried") || lowered.contains("conflict") {
        return StoreError::Conflict;
    }
    if lowered.contains("connection") || lowered.contains("websocket") || lowered.contains("timed out")
    {
        return StoreError::Unavailable(message.to_string());
    }
    StoreError::Operation(format!("surreal query failed: {message}"))
}

fn map_surreal_error(err: surrealdb::Error) -> StoreError {
    map_error_message(&err.to_string())
}

async fn run(client: &Surreal<Client>, compiled: Compiled) -> Result<Vec<Value>, StoreError> {
    tracing::trace!(sql = %compiled.sql, "surreal statement");
    let mut response = client
        .query(compiled.sql)
        .bind(("p", Value::Object(compiled.params)))
        .await
        .map_err(map_surreal_error)?;
    let errors = response.take_errors();
    if !errors.is_empty() {
        let mut ordered: Vec<(usize, String)> = errors
            .into_iter()
            .map(|(index, err)| (index, err.to_string()))
            .collect();
        ordered.sort_by_key(|(index, _)| *index);
        return Err(classify_errors(ordered.into_iter().map(|(_, m)| m)));
    }
    let statements = response.num_statements();
    if statements == 0 {
        return Ok(Vec::new());
    }
    response
        .take::<Vec<Value>>(statements - 1)
        .map_err(map_surreal_error)
}

async fn read_row(
    client: &Surreal<Client>,
    path: &DocumentPath,
) -> Result<Option<DocumentRow>, StoreError> {
    let mut compiled = Compiled::default();
    let key = compiled.param(Value::String(path.key()));
    compiled.line(&format!("SELECT doc_id, version, body FROM {};", record(&key)));
    let rows = run(client, compiled).await?;
    rows.into_iter()
        .next()
        .map(|row| {
            serde_json::from_value::<DocumentRow>(row)
                .map_err(|err| StoreError::Operation(format!("invalid document row: {err}")))
        })
        .transpose()
}

impl DocumentStore for SurrealDocumentStore {
    fn name(&self) -> &'static str {
        "surrealdb"
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            self.client
                .query("RETURN true;")
                .await
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;
            Ok(())
        })
    }

    fn get(&self, path: &DocumentPath) -> BoxFuture<'_, Result<DocumentSnapshot, StoreError>> {
        let path = path.clone();
        Box::pin(async move {
            Ok(match read_row(&self.client, &path).await? {
                Some(row) => DocumentSnapshot::found(row.doc_id, row.body),
                None => DocumentSnapshot::missing(path.id()),
            })
        })
    }

    fn create(&self, path: &DocumentPath, body: Value) -> BoxFuture<'_, Result<(), StoreError>> {
        let path = path.clone();
        Box::pin(async move {
            if !body.is_object() {
                return Err(StoreError::Operation(
                    "document body must be a JSON object".into(),
                ));
            }
            let mut compiled = Compiled::default();
            let key = compiled.param(Value::String(path.key()));
            let content = compiled.param(json!({
                "collection": path.collection().as_str(),
                "doc_id": path.id(),
                "version": 1,
                "body": body,
            }));
            compiled.line(&format!("CREATE {} CONTENT {content};", record(&key)));
            run(&self.client, compiled).await.map_err(|err| match err {
                StoreError::AlreadyExists(_) => StoreError::AlreadyExists(path.to_string()),
                other => other,
            })?;
            Ok(())
        })
    }

    fn add(
        &self,
        collection: &CollectionPath,
        body: Value,
    ) -> BoxFuture<'_, Result<String, StoreError>> {
        let path = collection.doc(uuid_v7_without_dashes());
        Box::pin(async move {
            self.create(&path, body).await?;
            Ok(path.id().to_string())
        })
    }

    fn update(
        &self,
        path: &DocumentPath,
        patch: FieldPatch,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        let mut batch = WriteBatch::new();
        batch.update(path.clone(), patch);
        self.commit_batch(batch)
    }

    fn commit_batch(&self, batch: WriteBatch) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(());
            }
            let compiled = compile_write_script(&[], batch.updates())?;
            run(&self.client, compiled).await?;
            Ok(())
        })
    }

    fn query(
        &self,
        collection: &CollectionPath,
        query: &DocumentQuery,
    ) -> BoxFuture<'_, Result<Vec<DocumentSnapshot>, StoreError>> {
        let compiled = compile_query(collection, query);
        Box::pin(async move {
            let rows = run(&self.client, compiled?).await?;
            rows.into_iter()
                .map(|row| {
                    serde_json::from_value::<DocumentRow>(row)
                        .map(|row| DocumentSnapshot::found(row.doc_id, row.body))
                        .map_err(|err| StoreError::Operation(format!("invalid document row: {err}")))
                })
                .collect()
        })
    }

    fn begin_transaction(
        &self,
    ) -> BoxFuture<'_, Result<Box<dyn DocumentTransaction>, StoreError>> {
        let client = Arc::clone(&self.client);
        Box::pin(async move {
            let tx: Box<dyn DocumentTransaction> = Box::new(SurrealTransaction {
                client,
                reads: HashMap::new(),
                writes: Vec::new(),
            });
            Ok(tx)
        })
    }
}

/// Optimistic transaction: reads record versions, and the commit script
/// re-checks them before applying the buffered updates.
struct SurrealTransaction {
    client: Arc<Surreal<Client>>,
    reads: HashMap<DocumentPath, u64>,
    writes: Vec<(DocumentPath, FieldPatch)>,
}

impl DocumentTransaction for SurrealTransaction {
    fn get(&mut self, path: &DocumentPath) -> BoxFuture<'_, Result<DocumentSnapshot, StoreError>> {
        let path = path.clone();
        Box::pin(async move {
            let row = read_row(&self.client, &path).await?;
            let version = row.as_ref().map(|row| row.version).unwrap_or(0);
            self.reads.entry(path.clone()).or_insert(version);
            Ok(match row {
                Some(row) => DocumentSnapshot::found(row.doc_id, row.body),
                None => DocumentSnapshot::missing(path.id()),
            })
        })
    }

    fn update(&mut self, path: &DocumentPath, patch: FieldPatch) {
        self.writes.push((path.clone(), patch));
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        let SurrealTransaction {
            client,
            reads,
            writes,
        } = *self;
        Box::pin(async move {
            if writes.is_empty() {
                return Ok(());
            }
            let mut reads: Vec<(DocumentPath, u64)> = reads.into_iter().collect();
            reads.sort();
            let compiled = compile_write_script(&reads, &writes)?;
            run(&client, compiled).await?;
            Ok(())
        })
    }
}
