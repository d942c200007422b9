use axum::extract::{Multipart, Query, State};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use blessing_domain::groups::{Group, GroupCreate, GroupPatch};
use blessing_domain::users::AppliedPatch;
use serde::Deserialize;
use validator::Validate;

use super::{ids_from_query, map_domain_error};
use crate::forms::FormData;
use crate::{error::ApiError, observability, state::AppState, validation};

const IMAGE_FIELDS: &[&str] = &["image", "image_file"];

pub(super) async fn create_group(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut form = FormData::read(multipart).await?;
    let input = GroupCreate {
        name: validation::required_text("name", form.text("name"))?,
        title: validation::required_text("title", form.text("title"))?,
        content: validation::required_text("content", form.text("content"))?,
        members: form.list("members"),
        image: form.file(IMAGE_FIELDS),
    };

    let created = state.groups.create(input).await.map_err(map_domain_error)?;
    observability::register_group_fanout(
        created.linked_members.len(),
        created.skipped_members.len(),
    );
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub(super) async fn get_groups(
    State(state): State<AppState>,
    query: Query<Vec<(String, String)>>,
) -> Result<Json<Vec<Group>>, ApiError> {
    let ids = ids_from_query(query)?;
    let groups = state.groups.get_many(&ids).await.map_err(map_domain_error)?;
    Ok(Json(groups))
}

#[derive(Debug, Deserialize, Validate)]
pub(super) struct AddMemberRequest {
    #[validate(length(min = 1, max = 128))]
    group_id: String,
    #[validate(length(min = 1, max = 128))]
    user_id: String,
}

pub(super) async fn add_group_member(
    State(state): State<AppState>,
    Json(payload): Json<AddMemberRequest>,
) -> Result<Json<Group>, ApiError> {
    validation::validate(&payload)?;
    let group = state
        .groups
        .add_member(&payload.group_id, &payload.user_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(group))
}

pub(super) async fn update_group(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AppliedPatch>, ApiError> {
    let mut form = FormData::read(multipart).await?;
    let input = GroupPatch {
        group_id: validation::required_text("group_id", form.text("group_id"))?,
        name: form.text("name"),
        title: form.text("title"),
        content: form.text("content"),
        image: form.file(IMAGE_FIELDS),
    };
    let applied = state.groups.update(input).await.map_err(map_domain_error)?;
    Ok(Json(applied))
}
