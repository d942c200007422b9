use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::DomainResult;
use crate::documents::{decode_snapshot, fetch_many};
use crate::error::DomainError;
use crate::media::upload_optional;
use crate::ports::documents::{CollectionPath, DocumentPath, DocumentStore, FieldPatch, StoreError};
use crate::ports::media::{MediaFile, MediaFolder, MediaUploader};
use crate::util::{dedupe_and_trim, non_blank, now_ms, require_id, require_length};

pub const USERS: &str = "users";

pub fn users_collection() -> CollectionPath {
    CollectionPath::root(USERS)
}

pub fn user_path(user_id: &str) -> DocumentPath {
    users_collection().doc(user_id)
}

/// Stored body of a `users/{id}` document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    pub created_at_ms: i64,
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    #[serde(flatten)]
    pub record: UserRecord,
}

#[derive(Clone, Debug, Default)]
pub struct UserRegistration {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub groups: Vec<String>,
    pub profile_image: Option<MediaFile>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Created,
    AlreadyExists,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub status: RegistrationStatus,
    pub user: User,
}

#[derive(Clone, Debug, Default)]
pub struct UserPatch {
    pub user_id: String,
    pub name: Option<String>,
    pub profile_image: Option<MediaFile>,
}

/// The fields a sparse update actually wrote. Empty for a no-op patch.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppliedPatch {
    pub id: String,
    pub updates: Map<String, Value>,
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn DocumentStore>,
    media: Arc<dyn MediaUploader>,
}

impl UserService {
    pub fn new(store: Arc<dyn DocumentStore>, media: Arc<dyn MediaUploader>) -> Self {
        Self { store, media }
    }

    /// Creates the user at the caller's id, or returns what is already stored
    /// there. Never overwrites.
    pub async fn register(&self, input: UserRegistration) -> DomainResult<Registration> {
        let user_id = require_id("user_id", &input.user_id)?;
        let name = require_length("name", &input.name, 3, 100)?;
        let email = non_blank(input.email);
        // Stored as given. The named groups' `members` are not updated here;
        // `GroupService::add_member` links both sides.
        let groups: BTreeSet<String> = dedupe_and_trim(&input.groups).into_iter().collect();
        let path = user_path(&user_id);

        if let Some(existing) = self.load(&path).await? {
            debug!(user_id = %user_id, "user already registered");
            return Ok(Registration {
                status: RegistrationStatus::AlreadyExists,
                user: existing,
            });
        }

        let profile_image_url =
            upload_optional(self.media.as_ref(), MediaFolder::Users, input.profile_image).await?;
        let record = UserRecord {
            name,
            email,
            profile_image_url,
            created_at_ms: now_ms(),
            groups,
        };
        let body = serde_json::to_value(&record)
            .map_err(|err| DomainError::Validation(format!("invalid user payload: {err}")))?;

        match self.store.create(&path, body).await {
            Ok(()) => {
                info!(user_id = %user_id, "user registered");
                Ok(Registration {
                    status: RegistrationStatus::Created,
                    user: User {
                        id: user_id,
                        record,
                    },
                })
            }
            Err(StoreError::AlreadyExists(_)) => {
                // Lost a creation race; the winner's body is authoritative.
                let existing = self
                    .load(&path)
                    .await?
                    .ok_or_else(|| DomainError::NotFound(format!("user {user_id}")))?;
                Ok(Registration {
                    status: RegistrationStatus::AlreadyExists,
                    user: existing,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_many(&self, ids: &[String]) -> DomainResult<Vec<User>> {
        let found =
            fetch_many::<UserRecord>(self.store.as_ref(), &users_collection(), "user", ids).await?;
        Ok(found
            .into_iter()
            .map(|(id, record)| User { id, record })
            .collect())
    }

    pub async fn update(&self, input: UserPatch) -> DomainResult<AppliedPatch> {
        let user_id = require_id("user_id", &input.user_id)?;
        let name = non_blank(input.name)
            .map(|name| require_length("name", &name, 3, 100))
            .transpose()?;
        let path = user_path(&user_id);

        let snapshot = self.store.get(&path).await?;
        if !snapshot.exists() {
            return Err(DomainError::NotFound(format!("user {user_id}")));
        }

        let profile_image_url =
            upload_optional(self.media.as_ref(), MediaFolder::Users, input.profile_image).await?;

        let mut patch = FieldPatch::new();
        if let Some(name) = name {
            patch = patch.set("name", name);
        }
        if let Some(url) = profile_image_url {
            patch = patch.set("profile_image_url", url);
        }

        let updates = patch.to_values();
        if patch.is_empty() {
            debug!(user_id = %user_id, "empty user patch, nothing to write");
        } else {
            self.store.update(&path, patch).await?;
            info!(user_id = %user_id, fields = updates.len(), "user updated");
        }
        Ok(AppliedPatch {
            id: user_id,
            updates,
        })
    }

    async fn load(&self, path: &DocumentPath) -> DomainResult<Option<User>> {
        let snapshot = self.store.get(path).await?;
        Ok(decode_snapshot::<UserRecord>("user", &snapshot)?.map(|record| User {
            id: path.id().to_string(),
            record,
        }))
    }
}
