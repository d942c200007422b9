use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use blessing_domain::documents::InMemoryDocumentStore;
use blessing_domain::media::InMemoryMediaUploader;
use blessing_infra::auth::JwtTokenVerifier;
use blessing_infra::config::AppConfig;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::routes;
use crate::state::AppState;

const SECRET: &str = "test-secret";
const BOUNDARY: &str = "blessing-test-boundary";

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: usize,
}

fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".to_string(),
        port: 0,
        log_level: "info".to_string(),
        log_format: "compact".to_string(),
        data_backend: "memory".to_string(),
        surreal_endpoint: "ws://127.0.0.1:8000".to_string(),
        surreal_ns: "blessing".to_string(),
        surreal_db: "test".to_string(),
        surreal_user: "root".to_string(),
        surreal_pass: "root".to_string(),
        jwt_secret: SECRET.to_string(),
        jwt_audience: None,
        jwt_issuer: None,
        media_backend: "memory".to_string(),
        s3_endpoint: "http://127.0.0.1:9000".to_string(),
        s3_bucket: "blessing-media-test".to_string(),
        s3_region: "us-east-1".to_string(),
        s3_access_key: "test-access-key".to_string(),
        s3_secret_key: "test-secret-key".to_string(),
        s3_public_base_url: None,
        media_timeout_ms: 1_000,
        max_upload_bytes: 1024 * 1024,
        transaction_max_attempts: 3,
    }
}

fn token_for(sub: &str, expires_in_secs: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_secs() as i64;
    let claims = Claims {
        sub: sub.to_string(),
        exp: (now + expires_in_secs) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("token")
}

fn test_token() -> String {
    token_for("caller-1", 3600)
}

struct TestApp {
    router: axum::Router,
    store: InMemoryDocumentStore,
    media: InMemoryMediaUploader,
}

fn test_app_with_media(media: InMemoryMediaUploader) -> TestApp {
    let config = test_config();
    let store = InMemoryDocumentStore::new();
    let verifier = JwtTokenVerifier::from_config(&config);
    let state = AppState::with_backends(
        config,
        Arc::new(store.clone()),
        Arc::new(media.clone()),
        Arc::new(verifier),
    );
    TestApp {
        router: routes::router(state),
        store,
        media,
    }
}

fn test_app() -> TestApp {
    test_app_with_media(InMemoryMediaUploader::new())
}

#[derive(Default)]
struct MultipartBody {
    bytes: Vec<u8>,
}

impl MultipartBody {
    fn text(mut self, name: &str, value: &str) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    fn file(mut self, name: &str, file_name: &str, content: &[u8]) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        self.bytes.extend_from_slice(content);
        self.bytes.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> Body {
        self.bytes
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(self.bytes)
    }
}

fn multipart_request(method: &str, uri: &str, token: &str, body: MultipartBody) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header("authorization", format!("Bearer {token}"))
        .body(body.finish())
        .expect("request")
}

fn json_request(method: &str, uri: &str, token: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(payload.to_string()))
        .expect("request")
}

fn get_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request")
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn register_user(app: &TestApp, token: &str, id: &str, name: &str) -> (StatusCode, Value) {
    let body = MultipartBody::default()
        .text("id", id)
        .text("name", name)
        .text("email", &format!("{id}@example.com"));
    send(app, multipart_request("POST", "/v1/users", token, body)).await
}

async fn create_group(app: &TestApp, token: &str, name: &str, members: &[&str]) -> Value {
    let mut body = MultipartBody::default()
        .text("name", name)
        .text("title", "Weekly gathering")
        .text("content", "Thursday evenings");
    for member in members {
        body = body.text("members", member);
    }
    let (status, value) = send(app, multipart_request("POST", "/v1/groups", token, body)).await;
    assert_eq!(status, StatusCode::CREATED, "group create: {value}");
    value
}

#[tokio::test]
async fn health_and_ready_are_public() {
    let app = test_app();

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["environment"], "test");

    let request = Request::builder()
        .uri("/ready")
        .body(Body::empty())
        .expect("request");
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn protected_routes_reject_missing_and_expired_tokens() {
    let app = test_app();

    let request = Request::builder()
        .uri("/v1/users?id=u1")
        .body(Body::empty())
        .expect("request");
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let expired = token_for("caller-1", -3600);
    let (status, _) = send(&app, get_request("/v1/users?id=u1", &expired)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, get_request("/v1/users?id=u1", "not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn metrics_without_recorder_is_an_internal_error() {
    let app = test_app();
    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .expect("request");
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "internal_error");
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let app = test_app();
    let request = Request::builder()
        .uri("/health")
        .header("x-correlation-id", "corr-42")
        .body(Body::empty())
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("response");
    assert_eq!(
        response
            .headers()
            .get("x-correlation-id")
            .and_then(|value| value.to_str().ok()),
        Some("corr-42")
    );
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn user_registration_is_idempotent() {
    let app = test_app();
    let token = test_token();

    let body = MultipartBody::default()
        .text("id", "u1")
        .text("name", "Maria")
        .text("groups", "g1")
        .file("image", "me.png", b"png-bytes");
    let (status, created) = send(&app, multipart_request("POST", "/v1/users", &token, body)).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["status"], "created");
    assert_eq!(created["user"]["id"], "u1");
    assert_eq!(created["user"]["groups"], json!(["g1"]));
    let image_url = created["user"]["profile_image_url"]
        .as_str()
        .expect("profile image url")
        .to_string();
    assert!(image_url.starts_with("memory://blessing_users/"));

    let body = MultipartBody::default()
        .text("id", "u1")
        .text("name", "Someone Else")
        .file("image", "other.png", b"other");
    let (status, again) = send(&app, multipart_request("POST", "/v1/users", &token, body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["status"], "already_exists");
    assert_eq!(again["user"]["name"], "Maria");
    assert_eq!(again["user"]["profile_image_url"], image_url.as_str());
    assert_eq!(app.media.uploaded().len(), 1);
}

#[tokio::test]
async fn user_registration_requires_id_and_name() {
    let app = test_app();
    let token = test_token();

    let body = MultipartBody::default().text("name", "Maria");
    let (status, value) = send(&app, multipart_request("POST", "/v1/users", &token, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["error"]["code"], "validation_error");

    let (status, _) = register_user(&app, &token, "u1", "Al").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn get_users_returns_found_ids_and_404_when_none_exist() {
    let app = test_app();
    let token = test_token();
    register_user(&app, &token, "u1", "Maria").await;
    register_user(&app, &token, "u2", "Joseph").await;

    let (status, users) = send(&app, get_request("/v1/users?id=u2&id=missing&id=u1", &token)).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = users
        .as_array()
        .expect("list")
        .iter()
        .filter_map(|user| user["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["u2", "u1"]);

    let (status, body) = send(&app, get_request("/v1/users?id=nobody", &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = send(&app, get_request("/v1/users", &token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn user_update_applies_only_supplied_fields() {
    let app = test_app();
    let token = test_token();
    register_user(&app, &token, "u1", "Maria").await;

    let body = MultipartBody::default()
        .text("user_id", "u1")
        .text("name", "Maria Clara");
    let (status, applied) =
        send(&app, multipart_request("PATCH", "/v1/users/update", &token, body)).await;
    assert_eq!(status, StatusCode::OK, "{applied}");
    assert_eq!(applied["id"], "u1");
    assert_eq!(applied["updates"], json!({ "name": "Maria Clara" }));

    let (_, users) = send(&app, get_request("/v1/users?id=u1", &token)).await;
    assert_eq!(users[0]["name"], "Maria Clara");
    assert_eq!(users[0]["email"], "u1@example.com");

    let body = MultipartBody::default()
        .text("user_id", "ghost")
        .file("image", "x.png", b"x");
    let (status, _) = send(&app, multipart_request("PATCH", "/v1/users/update", &token, body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.media.uploaded().is_empty());
}

#[tokio::test]
async fn group_creation_links_existing_members_only() {
    let app = test_app();
    let token = test_token();
    register_user(&app, &token, "u1", "Maria").await;

    let created = create_group(&app, &token, "Choir", &["u1", "ghost"]).await;
    let group_id = created["group"]["id"].as_str().expect("group id").to_string();
    assert_eq!(created["group"]["members"], json!(["ghost", "u1"]));
    assert_eq!(created["linked_members"], json!(["u1"]));
    assert_eq!(created["skipped_members"], json!(["ghost"]));

    let (_, users) = send(&app, get_request("/v1/users?id=u1", &token)).await;
    assert_eq!(users[0]["groups"], json!([group_id]));

    let (status, groups) = send(&app, get_request(&format!("/v1/groups?id={group_id}"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(groups[0]["name"], "Choir");
}

#[tokio::test]
async fn group_creation_rejects_missing_fields() {
    let app = test_app();
    let token = test_token();

    let body = MultipartBody::default()
        .text("name", "Choir")
        .text("title", "Weekly");
    let (status, value) = send(&app, multipart_request("POST", "/v1/groups", &token, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        value["error"]["message"]
            .as_str()
            .unwrap_or_default()
            .contains("content")
    );
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn add_member_links_both_documents() {
    let app = test_app();
    let token = test_token();
    register_user(&app, &token, "u1", "Maria").await;
    let created = create_group(&app, &token, "Choir", &[]).await;
    let group_id = created["group"]["id"].as_str().expect("group id").to_string();

    let payload = json!({ "group_id": group_id, "user_id": "u1" });
    let (status, group) = send(&app, json_request("PATCH", "/v1/groups", &token, payload.clone())).await;
    assert_eq!(status, StatusCode::OK, "{group}");
    assert_eq!(group["members"], json!(["u1"]));

    let (status, group) = send(&app, json_request("PATCH", "/v1/groups", &token, payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(group["members"], json!(["u1"]));

    let (_, users) = send(&app, get_request("/v1/users?id=u1", &token)).await;
    assert_eq!(users[0]["groups"], json!([group_id]));

    let payload = json!({ "group_id": group_id, "user_id": "ghost" });
    let (status, body) = send(&app, json_request("PATCH", "/v1/groups", &token, payload)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let payload = json!({ "group_id": "", "user_id": "u1" });
    let (status, _) = send(&app, json_request("PATCH", "/v1/groups", &token, payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn group_update_is_sparse() {
    let app = test_app();
    let token = test_token();
    let created = create_group(&app, &token, "Choir", &[]).await;
    let group_id = created["group"]["id"].as_str().expect("group id").to_string();

    let body = MultipartBody::default()
        .text("group_id", &group_id)
        .text("title", "Sunday rehearsal")
        .file("image", "cover.png", b"cover");
    let (status, applied) =
        send(&app, multipart_request("PATCH", "/v1/groups/update", &token, body)).await;
    assert_eq!(status, StatusCode::OK, "{applied}");
    let updates = applied["updates"].as_object().expect("updates");
    let mut keys: Vec<&str> = updates.keys().map(String::as_str).collect();
    keys.sort();
    assert_eq!(keys, vec!["image_url", "title"]);

    let (_, groups) = send(&app, get_request(&format!("/v1/groups?id={group_id}"), &token)).await;
    assert_eq!(groups[0]["title"], "Sunday rehearsal");
    assert_eq!(groups[0]["content"], "Thursday evenings");
    assert!(
        groups[0]["image_url"]
            .as_str()
            .unwrap_or_default()
            .starts_with("memory://blessing_groups/")
    );
}

#[tokio::test]
async fn posts_fan_out_and_query_by_range() {
    let app = test_app();
    let token = test_token();
    let first = create_group(&app, &token, "Choir", &[]).await;
    let second = create_group(&app, &token, "Youth", &[]).await;
    let first_id = first["group"]["id"].as_str().expect("id").to_string();
    let second_id = second["group"]["id"].as_str().expect("id").to_string();

    for (title, date) in [
        ("Spring cleanup", "2024-03-10T09:00:00Z"),
        ("Summer picnic", "2024-06-15T12:00:00+02:00"),
    ] {
        let body = MultipartBody::default()
            .text("group_ids", &first_id)
            .text("group_ids", &format!("{second_id}, {first_id}"))
            .text("title", title)
            .text("activity_date", date);
        let (status, created) = send(&app, multipart_request("POST", "/v1/posts", &token, body)).await;
        assert_eq!(status, StatusCode::CREATED, "{created}");
        assert_eq!(created["created_post_ids"].as_array().map(Vec::len), Some(2));
        assert_eq!(created["post"]["author_id"], "caller-1");
        assert_eq!(created["post"]["group_id"], first_id.as_str());
    }

    let uri = format!("/v1/posts?group_id={second_id}&start_date=2024-01-01&end_date=2024-12-31");
    let (status, posts) = send(&app, get_request(&uri, &token)).await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = posts
        .as_array()
        .expect("list")
        .iter()
        .filter_map(|post| post["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Summer picnic", "Spring cleanup"]);
    assert_eq!(posts[0]["activity_date"], "2024-06-15T10:00:00Z");

    let uri = format!("/v1/posts?group_id={first_id}&start_date=2024-04-01&end_date=2024-12-31");
    let (_, posts) = send(&app, get_request(&uri, &token)).await;
    assert_eq!(posts.as_array().map(Vec::len), Some(1));

    let uri = format!("/v1/posts?group_id={first_id}&start_date=2024-04-01");
    let (status, body) = send(&app, get_request(&uri, &token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn posts_filter_by_author_and_id() {
    let app = test_app();
    let token = test_token();
    let group = create_group(&app, &token, "Choir", &[]).await;
    let group_id = group["group"]["id"].as_str().expect("id").to_string();

    let mut post_ids = Vec::new();
    for author in ["a1", "a2"] {
        let body = MultipartBody::default()
            .text("group_ids", &group_id)
            .text("title", "Rehearsal notes")
            .text("content", "Bring sheet music")
            .text("author_id", author)
            .text("activity_date", "2024-05-01");
        let (_, created) = send(&app, multipart_request("POST", "/v1/posts", &token, body)).await;
        post_ids.push(created["post"]["id"].as_str().expect("post id").to_string());
    }

    let uri = format!("/v1/posts?group_id={group_id}&author_id=a2");
    let (_, posts) = send(&app, get_request(&uri, &token)).await;
    assert_eq!(posts.as_array().map(Vec::len), Some(1));
    assert_eq!(posts[0]["id"], post_ids[1].as_str());

    let uri = format!("/v1/posts?group_id={group_id}&post_id={}&author_id=a2", post_ids[0]);
    let (status, posts) = send(&app, get_request(&uri, &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(posts[0]["author_id"], "a1");

    let uri = format!("/v1/posts?group_id={group_id}&post_id=missing");
    let (status, _) = send(&app, get_request(&uri, &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn post_creation_validates_before_uploading() {
    let app = test_app();
    let token = test_token();

    let body = MultipartBody::default()
        .text("group_ids", "ghost-group")
        .text("title", "Hello")
        .text("activity_date", "2024-05-01")
        .file("image", "p.png", b"p");
    let (status, _) = send(&app, multipart_request("POST", "/v1/posts", &token, body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.media.uploaded().is_empty());

    let body = MultipartBody::default()
        .text("group_ids", "ghost-group")
        .text("title", "Hello")
        .text("activity_date", "last tuesday");
    let (status, body) = send(&app, multipart_request("POST", "/v1/posts", &token, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap_or_default()
            .contains("activity_date")
    );
}

#[tokio::test]
async fn failed_upload_maps_to_bad_gateway() {
    let app = test_app_with_media(InMemoryMediaUploader::failing());
    let token = test_token();

    let body = MultipartBody::default()
        .text("id", "u1")
        .text("name", "Maria")
        .file("image", "me.png", b"png");
    let (status, value) = send(&app, multipart_request("POST", "/v1/users", &token, body)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(value["error"]["code"], "upstream_error");
    assert!(app.store.is_empty());
}
