pub mod documents;

use anyhow::Context;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;

use crate::config::AppConfig;

pub use documents::SurrealDocumentStore;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username: config.surreal_user.clone(),
            password: config.surreal_pass.clone(),
        }
    }
}

/// Opens a websocket session, signs in as root and selects ns/db.
pub async fn connect(db_config: &DbConfig) -> anyhow::Result<Surreal<Client>> {
    let endpoint = normalize_endpoint(&db_config.endpoint);
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(endpoint.as_str())
        .await
        .with_context(|| format!("connect surrealdb endpoint {}", db_config.endpoint))?;
    db.signin(Root {
        username: db_config.username.clone(),
        password: db_config.password.clone(),
    })
    .await
    .context("surrealdb root signin")?;
    db.use_ns(&db_config.namespace)
        .use_db(&db_config.database)
        .await
        .context("select surrealdb namespace/database")?;
    tracing::info!(
        endpoint = %db_config.endpoint,
        namespace = %db_config.namespace,
        database = %db_config.database,
        "connected to surrealdb"
    );
    Ok(db)
}

/// The ws engine wants `host:port`; accept full URLs from config too.
fn normalize_endpoint(endpoint: &str) -> String {
    match url::Url::parse(endpoint) {
        Ok(parsed) if parsed.has_host() => {
            let host = parsed.host_str().unwrap_or_default();
            match parsed.port_or_known_default() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            }
        }
        _ => endpoint.to_string(),
    }
}
