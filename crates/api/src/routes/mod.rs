use axum::extract::{DefaultBodyLimit, Query, State};
use axum::{
    Json, Router,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use blessing_domain::error::DomainError;
use serde::Serialize;

use crate::{error::ApiError, middleware as app_middleware, observability, state::AppState};

mod groups;
mod posts;
mod users;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/users", post(users::register_user).get(users::get_users))
        .route("/v1/users/update", patch(users::update_user))
        .route(
            "/v1/groups",
            post(groups::create_group)
                .get(groups::get_groups)
                .patch(groups::add_group_member),
        )
        .route("/v1/groups/update", patch(groups::update_group))
        .route("/v1/posts", post(posts::create_post).get(posts::query_posts))
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.is_test() {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    store: &'static str,
}

async fn ready(State(state): State<AppState>) -> Response {
    let store = state.store.name();
    match state.store.health_check().await {
        Ok(()) => Json(ReadyResponse {
            status: "ready",
            store,
        })
        .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, store, "document store health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    status: "unavailable",
                    store,
                }),
            )
                .into_response()
        }
    }
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => {
            tracing::error!("metrics requested but no recorder is installed");
            ApiError::Internal.into_response()
        }
    }
}

/// Collects every `id` parameter of `?id=a&id=b`.
pub(super) fn ids_from_query(
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Vec<String>, ApiError> {
    let ids: Vec<String> = pairs
        .into_iter()
        .filter(|(key, _)| key == "id")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(ApiError::Validation("at least one id is required".into()));
    }
    Ok(ids)
}

pub(super) fn map_domain_error(err: DomainError) -> ApiError {
    match err {
        DomainError::Validation(message) => ApiError::Validation(message),
        DomainError::NotFound(what) => ApiError::NotFound(what),
        DomainError::Conflict(message) => ApiError::Conflict(message),
        DomainError::Upstream(message) => {
            tracing::error!(error = %message, "upstream dependency failed");
            ApiError::Upstream
        }
        DomainError::Unavailable(message) => {
            tracing::warn!(error = %message, "request could not complete");
            ApiError::Unavailable
        }
        DomainError::Decode(message) => {
            tracing::error!(error = %message, "stored document failed to decode");
            ApiError::StoredDocumentUnreadable
        }
    }
}
