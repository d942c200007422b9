use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
    pub data_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
    pub jwt_secret: String,
    #[serde(default)]
    pub jwt_audience: Option<String>,
    #[serde(default)]
    pub jwt_issuer: Option<String>,
    pub media_backend: String,
    pub s3_endpoint: String,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    #[serde(default)]
    pub s3_public_base_url: Option<String>,
    pub media_timeout_ms: u64,
    pub max_upload_bytes: usize,
    pub transaction_max_attempts: u32,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let mut builder = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 8080)?
            .set_default("log_level", "info")?
            .set_default("log_format", "auto")?
            .set_default("data_backend", "memory")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "blessing")?
            .set_default("surreal_db", "main")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .set_default("jwt_secret", "dev-secret")?
            .set_default("media_backend", "memory")?
            .set_default("s3_endpoint", "http://127.0.0.1:9000")?
            .set_default("s3_bucket", "blessing-media-dev")?
            .set_default("s3_region", "us-east-1")?
            .set_default("s3_access_key", "minioadmin")?
            .set_default("s3_secret_key", "minioadmin")?
            .set_default("media_timeout_ms", 15000)?
            .set_default("max_upload_bytes", 10 * 1024 * 1024)?
            .set_default("transaction_max_attempts", 5)?
            .add_source(config::Environment::default().separator("__"));

        // Container platforms inject a bare PORT.
        if let Ok(port) = std::env::var("PORT") {
            builder = builder.set_override("port", port)?;
        }
        builder.build()?.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn is_test(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("test")
    }

    /// `json` or `compact`; `auto` picks json in production.
    pub fn wants_json_logs(&self) -> bool {
        match self.log_format.to_ascii_lowercase().as_str() {
            "json" => true,
            "compact" | "pretty" => false,
            _ => self.is_production(),
        }
    }
}
