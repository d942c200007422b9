use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::http::StatusCode;
use blessing_domain::ports::BoxFuture;
use blessing_domain::ports::media::{MediaError, MediaFile, MediaFolder, MediaUploader};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const HTTP_REQUESTS_TOTAL: &str = "blessing_api_http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "blessing_api_http_request_duration_seconds";
const HTTP_REQUEST_ERRORS_TOTAL: &str = "blessing_api_http_errors_total";
const MEDIA_UPLOADS_TOTAL: &str = "blessing_api_media_uploads_total";
const MEDIA_UPLOAD_DURATION_SECONDS: &str = "blessing_api_media_upload_duration_seconds";
const GROUP_FANOUT_MEMBERS_TOTAL: &str = "blessing_api_group_fanout_members_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

pub fn register_http_request(method: &str, route: &str, status: StatusCode, elapsed: Duration) {
    let status_code = status.as_u16().to_string();
    let duration_seconds = elapsed.as_secs_f64();
    let result = if status.is_server_error() {
        "error"
    } else {
        "success"
    };

    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code.clone(),
        "result" => result
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code
    )
    .record(duration_seconds);

    if status.is_server_error() {
        counter!(
            HTTP_REQUEST_ERRORS_TOTAL,
            "method" => method.to_string(),
            "route" => route.to_string(),
            "status" => status.as_u16().to_string()
        )
        .increment(1);
    }
}

pub fn register_media_upload(folder: MediaFolder, backend: &'static str, ok: bool, elapsed: Duration) {
    let result = if ok { "success" } else { "error" };
    counter!(
        MEDIA_UPLOADS_TOTAL,
        "folder" => folder.as_str(),
        "backend" => backend,
        "result" => result
    )
    .increment(1);
    histogram!(
        MEDIA_UPLOAD_DURATION_SECONDS,
        "folder" => folder.as_str(),
        "backend" => backend
    )
    .record(elapsed.as_secs_f64());
}

pub fn register_group_fanout(linked: usize, skipped: usize) {
    counter!(GROUP_FANOUT_MEMBERS_TOTAL, "outcome" => "linked").increment(linked as u64);
    counter!(GROUP_FANOUT_MEMBERS_TOTAL, "outcome" => "skipped").increment(skipped as u64);
}

/// Wraps a media uploader and records count, duration and outcome per folder.
pub struct MeteredUploader {
    inner: Arc<dyn MediaUploader>,
}

impl MeteredUploader {
    pub fn wrap(inner: Arc<dyn MediaUploader>) -> Arc<dyn MediaUploader> {
        Arc::new(Self { inner })
    }
}

impl MediaUploader for MeteredUploader {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn upload(
        &self,
        folder: MediaFolder,
        file: MediaFile,
    ) -> BoxFuture<'_, Result<String, MediaError>> {
        Box::pin(async move {
            let start = Instant::now();
            let result = self.inner.upload(folder, file).await;
            register_media_upload(folder, self.inner.name(), result.is_ok(), start.elapsed());
            result
        })
    }
}
