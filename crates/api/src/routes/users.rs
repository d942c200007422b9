use axum::extract::{Multipart, Query, State};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use blessing_domain::users::{
    AppliedPatch, RegistrationStatus, User, UserPatch, UserRegistration,
};

use super::{ids_from_query, map_domain_error};
use crate::forms::FormData;
use crate::{error::ApiError, state::AppState, validation::required_text};

const IMAGE_FIELDS: &[&str] = &["image", "image_file", "profile_image"];

pub(super) async fn register_user(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut form = FormData::read(multipart).await?;
    let input = UserRegistration {
        user_id: required_text("id", form.text("id"))?,
        name: required_text("name", form.text("name"))?,
        email: form.text("email"),
        groups: form.list("groups"),
        profile_image: form.file(IMAGE_FIELDS),
    };

    let registration = state.users.register(input).await.map_err(map_domain_error)?;
    let status = match registration.status {
        RegistrationStatus::Created => StatusCode::CREATED,
        RegistrationStatus::AlreadyExists => StatusCode::OK,
    };
    Ok((status, Json(registration)).into_response())
}

pub(super) async fn get_users(
    State(state): State<AppState>,
    query: Query<Vec<(String, String)>>,
) -> Result<Json<Vec<User>>, ApiError> {
    let ids = ids_from_query(query)?;
    let users = state.users.get_many(&ids).await.map_err(map_domain_error)?;
    Ok(Json(users))
}

pub(super) async fn update_user(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AppliedPatch>, ApiError> {
    let mut form = FormData::read(multipart).await?;
    let input = UserPatch {
        user_id: required_text("user_id", form.text("user_id"))?,
        name: form.text("name"),
        profile_image: form.file(IMAGE_FIELDS),
    };
    let applied = state.users.update(input).await.map_err(map_domain_error)?;
    Ok(Json(applied))
}
