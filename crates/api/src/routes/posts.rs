use axum::extract::{Extension, Multipart, Query, State};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use blessing_domain::posts::{Post, PostCreate, PostQuery};
use blessing_domain::util::{format_ms_rfc3339, parse_timestamp_ms};
use serde::{Deserialize, Serialize};

use super::map_domain_error;
use crate::forms::FormData;
use crate::middleware::AuthContext;
use crate::{error::ApiError, state::AppState, validation::required_text};

const IMAGE_FIELDS: &[&str] = &["image", "image_file"];

/// A post as returned over HTTP, with its timestamps also rendered as RFC 3339.
#[derive(Serialize)]
pub(super) struct PostView {
    #[serde(flatten)]
    post: Post,
    activity_date: String,
    created_at: String,
}

impl From<Post> for PostView {
    fn from(post: Post) -> Self {
        Self {
            activity_date: format_ms_rfc3339(post.record.activity_at_ms),
            created_at: format_ms_rfc3339(post.record.created_at_ms),
            post,
        }
    }
}

#[derive(Serialize)]
pub(super) struct PostsCreatedResponse {
    post: PostView,
    created_post_ids: Vec<String>,
}

fn parse_date(field: &str, value: &str) -> Result<i64, ApiError> {
    parse_timestamp_ms(value).map_err(|err| ApiError::Validation(format!("{field}: {err}")))
}

pub(super) async fn create_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let actor = auth.actor()?;
    let mut form = FormData::read(multipart).await?;
    let activity_date = required_text("activity_date", form.text("activity_date"))?;
    let input = PostCreate {
        group_ids: form.list("group_ids"),
        title: required_text("title", form.text("title"))?,
        content: form.text("content"),
        activity_at_ms: parse_date("activity_date", &activity_date)?,
        author_id: form
            .text("author_id")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| actor.user_id.clone()),
        image: form.file(IMAGE_FIELDS),
    };

    let created = state.posts.create(input).await.map_err(map_domain_error)?;
    let body = PostsCreatedResponse {
        post: created.post.into(),
        created_post_ids: created.created_post_ids,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
pub(super) struct PostListQuery {
    group_id: Option<String>,
    post_id: Option<String>,
    author_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

pub(super) async fn query_posts(
    State(state): State<AppState>,
    Query(params): Query<PostListQuery>,
) -> Result<Json<Vec<PostView>>, ApiError> {
    let group_id = required_text("group_id", params.group_id)?;
    let start_ms = params
        .start_date
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_date("start_date", &value))
        .transpose()?;
    let end_ms = params
        .end_date
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_date("end_date", &value))
        .transpose()?;

    let query = PostQuery::new(&group_id, params.post_id, params.author_id, start_ms, end_ms)
        .map_err(map_domain_error)?;
    let posts = state.posts.query(&query).await.map_err(map_domain_error)?;
    Ok(Json(posts.into_iter().map(PostView::from).collect()))
}
