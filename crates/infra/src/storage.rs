use std::time::Duration;

use blessing_domain::ports::BoxFuture;
use blessing_domain::ports::media::{MediaError, MediaFile, MediaFolder, MediaUploader};
use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use url::Url;

use crate::config::AppConfig;

/// How long a signed PUT URL stays valid; it is used immediately.
const PRESIGN_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub public_base_url: Option<String>,
    pub timeout_ms: u64,
}

impl S3Config {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.s3_endpoint.trim_end_matches('/').to_string(),
            bucket: config.s3_bucket.clone(),
            region: config.s3_region.clone(),
            access_key: config.s3_access_key.clone(),
            secret_key: config.s3_secret_key.clone(),
            public_base_url: config
                .s3_public_base_url
                .as_ref()
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            timeout_ms: config.media_timeout_ms,
        }
    }
}

/// Path-style `PUT {endpoint}/{bucket}/{key}` against any S3-compatible
/// object store, through a SigV4 presigned URL.
#[derive(Debug, Clone)]
pub struct S3MediaUploader {
    http: reqwest::Client,
    bucket: Bucket,
    credentials: Credentials,
    public_base_url: Option<String>,
}

impl S3MediaUploader {
    pub fn new(config: S3Config) -> anyhow::Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|err| anyhow::anyhow!("invalid s3 endpoint '{}': {err}", config.endpoint))?;
        let bucket = Bucket::new(endpoint, UrlStyle::Path, config.bucket, config.region)
            .map_err(|err| anyhow::anyhow!("invalid s3 bucket settings: {err}"))?;
        let credentials = Credentials::new(config.access_key, config.secret_key);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            http,
            bucket,
            credentials,
            public_base_url: config.public_base_url,
        })
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Self::new(S3Config::from_app_config(config))
    }

    fn signed_put_url(&self, key: &str) -> Url {
        self.bucket
            .put_object(Some(&self.credentials), key)
            .sign(PRESIGN_TTL)
    }

    fn public_url(&self, key: &str) -> Result<String, MediaError> {
        match &self.public_base_url {
            Some(base) => Ok(format!("{base}/{key}")),
            None => self
                .bucket
                .object_url(key)
                .map(String::from)
                .map_err(|err| MediaError::Unavailable(format!("object url for '{key}': {err}"))),
        }
    }
}

impl MediaUploader for S3MediaUploader {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn upload(
        &self,
        folder: MediaFolder,
        file: MediaFile,
    ) -> BoxFuture<'_, Result<String, MediaError>> {
        Box::pin(async move {
            let key = file.object_key(folder);
            let url = self.signed_put_url(&key);
            let content_type = file.content_type_or_default().to_string();

            let response = self
                .http
                .put(url)
                .header("content-type", content_type)
                .body(file.bytes)
                .send()
                .await
                .map_err(|err| MediaError::Unavailable(format!("s3 put failed: {err}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status = status.as_u16(), %key, "s3 rejected upload");
                return Err(MediaError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            tracing::debug!(%key, bucket = %self.bucket.name(), "s3 object stored");
            self.public_url(&key)
        })
    }
}
