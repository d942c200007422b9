use std::sync::Arc;

use blessing_domain::documents::{InMemoryDocumentStore, TransactionPolicy};
use blessing_domain::groups::GroupService;
use blessing_domain::media::InMemoryMediaUploader;
use blessing_domain::ports::auth::TokenVerifier;
use blessing_domain::ports::documents::DocumentStore;
use blessing_domain::ports::media::MediaUploader;
use blessing_domain::posts::PostService;
use blessing_domain::users::UserService;
use blessing_infra::auth::JwtTokenVerifier;
use blessing_infra::config::AppConfig;
use blessing_infra::db::{DbConfig, SurrealDocumentStore};
use blessing_infra::storage::S3MediaUploader;

use crate::observability::MeteredUploader;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn DocumentStore>,
    pub token_verifier: Arc<dyn TokenVerifier>,
    pub users: UserService,
    pub groups: GroupService,
    pub posts: PostService,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn DocumentStore> = match config.data_backend.as_str() {
            "surreal" | "surrealdb" => {
                let db_config = DbConfig::from_app_config(&config);
                Arc::new(SurrealDocumentStore::new(&db_config).await?)
            }
            "memory" => Arc::new(InMemoryDocumentStore::new()),
            other => anyhow::bail!("unknown data_backend '{other}'"),
        };
        let media: Arc<dyn MediaUploader> = match config.media_backend.as_str() {
            "s3" => Arc::new(S3MediaUploader::from_config(&config)?),
            "memory" => Arc::new(InMemoryMediaUploader::new()),
            other => anyhow::bail!("unknown media_backend '{other}'"),
        };
        let token_verifier: Arc<dyn TokenVerifier> =
            Arc::new(JwtTokenVerifier::from_config(&config));

        tracing::info!(
            data_backend = store.name(),
            media_backend = media.name(),
            "backends selected"
        );
        Ok(Self::with_backends(config, store, media, token_verifier))
    }

    pub fn with_backends(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        media: Arc<dyn MediaUploader>,
        token_verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let media = MeteredUploader::wrap(media);
        let policy = TransactionPolicy::with_max_attempts(config.transaction_max_attempts);
        Self {
            users: UserService::new(store.clone(), media.clone()),
            groups: GroupService::new(store.clone(), media.clone(), policy),
            posts: PostService::new(store.clone(), media),
            config,
            store,
            token_verifier,
        }
    }
}
