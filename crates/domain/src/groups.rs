use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::DomainResult;
use crate::documents::{TransactionPolicy, decode_snapshot, fetch_many, run_transaction};
use crate::error::DomainError;
use crate::media::upload_optional;
use crate::ports::documents::{CollectionPath, DocumentPath, DocumentStore, FieldPatch, WriteBatch};
use crate::ports::media::{MediaFile, MediaFolder, MediaUploader};
use crate::users::{AppliedPatch, user_path};
use crate::util::{dedupe_and_trim, non_blank, now_ms, require_id, require_length, require_text};

pub const GROUPS: &str = "groups";

pub fn groups_collection() -> CollectionPath {
    CollectionPath::root(GROUPS)
}

pub fn group_path(group_id: &str) -> DocumentPath {
    groups_collection().doc(group_id)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at_ms: i64,
    #[serde(default)]
    pub members: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Group {
    pub id: String,
    #[serde(flatten)]
    pub record: GroupRecord,
}

#[derive(Clone, Debug, Default)]
pub struct GroupCreate {
    pub name: String,
    pub title: String,
    pub content: String,
    pub members: Vec<String>,
    pub image: Option<MediaFile>,
}

/// Result of group creation. Members that had no user document yet are
/// reported in `skipped_members` and do not list the group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupCreated {
    pub group: Group,
    pub linked_members: Vec<String>,
    pub skipped_members: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct GroupPatch {
    pub group_id: String,
    pub name: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub image: Option<MediaFile>,
}

#[derive(Clone)]
pub struct GroupService {
    store: Arc<dyn DocumentStore>,
    media: Arc<dyn MediaUploader>,
    policy: TransactionPolicy,
}

impl GroupService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        media: Arc<dyn MediaUploader>,
        policy: TransactionPolicy,
    ) -> Self {
        Self {
            store,
            media,
            policy,
        }
    }

    /// Writes the group, then links every registered member to it with one
    /// atomic batch. The two writes are not atomic with each other: if the
    /// batch fails the group exists without back-links, and `add_member`
    /// repairs them.
    pub async fn create(&self, input: GroupCreate) -> DomainResult<GroupCreated> {
        let name = require_length("name", &input.name, 3, 100)?;
        let title = require_text("title", &input.title)?;
        let content = require_text("content", &input.content)?;
        let members = dedupe_and_trim(&input.members)
            .iter()
            .map(|member| require_id("members", member))
            .collect::<DomainResult<BTreeSet<String>>>()?;

        let image_url =
            upload_optional(self.media.as_ref(), MediaFolder::Groups, input.image).await?;
        let record = GroupRecord {
            name,
            title,
            content,
            image_url,
            created_at_ms: now_ms(),
            members,
        };
        let body = serde_json::to_value(&record)
            .map_err(|err| DomainError::Validation(format!("invalid group payload: {err}")))?;
        let group_id = self.store.add(&groups_collection(), body).await?;
        info!(group_id = %group_id, members = record.members.len(), "group created");

        let mut batch = WriteBatch::new();
        let mut linked_members = Vec::new();
        let mut skipped_members = Vec::new();
        for member in &record.members {
            let path = user_path(member);
            if self.store.get(&path).await?.exists() {
                batch.update(path, FieldPatch::new().array_union("groups", [group_id.as_str()]));
                linked_members.push(member.clone());
            } else {
                debug!(group_id = %group_id, user_id = %member, "member not registered, skipping");
                skipped_members.push(member.clone());
            }
        }

        if !batch.is_empty() {
            if let Err(err) = self.store.commit_batch(batch).await {
                error!(
                    group_id = %group_id,
                    error = %err,
                    "group written but member links failed to commit"
                );
                return Err(err.into());
            }
        }

        Ok(GroupCreated {
            group: Group {
                id: group_id,
                record,
            },
            linked_members,
            skipped_members,
        })
    }

    pub async fn get_many(&self, ids: &[String]) -> DomainResult<Vec<Group>> {
        let found =
            fetch_many::<GroupRecord>(self.store.as_ref(), &groups_collection(), "group", ids)
                .await?;
        Ok(found
            .into_iter()
            .map(|(id, record)| Group { id, record })
            .collect())
    }

    /// Links one user and one group on both sides inside a transaction and
    /// returns the group as it reads after the union.
    pub async fn add_member(&self, group_id: &str, user_id: &str) -> DomainResult<Group> {
        let group_id = require_id("group_id", group_id)?;
        let user_id = require_id("user_id", user_id)?;

        let group = run_transaction(self.store.as_ref(), &self.policy, |tx| {
            let group_id = group_id.clone();
            let user_id = user_id.clone();
            Box::pin(async move {
                let user_doc = user_path(&user_id);
                let group_doc = group_path(&group_id);

                let user = tx.get(&user_doc).await?;
                let group = tx.get(&group_doc).await?;
                if !user.exists() {
                    return Err(DomainError::NotFound(format!("user {user_id}")));
                }
                let Some(mut record) = decode_snapshot::<GroupRecord>("group", &group)? else {
                    return Err(DomainError::NotFound(format!("group {group_id}")));
                };

                tx.update(
                    &user_doc,
                    FieldPatch::new().array_union("groups", [group_id.as_str()]),
                );
                tx.update(
                    &group_doc,
                    FieldPatch::new().array_union("members", [user_id.as_str()]),
                );
                record.members.insert(user_id);
                Ok(Group {
                    id: group_id,
                    record,
                })
            })
        })
        .await?;

        info!(group_id = %group.id, members = group.record.members.len(), "member added");
        Ok(group)
    }

    pub async fn update(&self, input: GroupPatch) -> DomainResult<AppliedPatch> {
        let group_id = require_id("group_id", &input.group_id)?;
        let name = non_blank(input.name)
            .map(|name| require_length("name", &name, 3, 100))
            .transpose()?;
        let title = non_blank(input.title);
        let content = non_blank(input.content);
        let path = group_path(&group_id);

        if !self.store.get(&path).await?.exists() {
            return Err(DomainError::NotFound(format!("group {group_id}")));
        }

        let image_url =
            upload_optional(self.media.as_ref(), MediaFolder::Groups, input.image).await?;

        let mut patch = FieldPatch::new();
        for (field, value) in [
            ("name", name),
            ("title", title),
            ("content", content),
            ("image_url", image_url),
        ] {
            if let Some(value) = value {
                patch = patch.set(field, value);
            }
        }

        let updates = patch.to_values();
        if patch.is_empty() {
            debug!(group_id = %group_id, "empty group patch, nothing to write");
        } else {
            self.store.update(&path, patch).await?;
            info!(group_id = %group_id, fields = updates.len(), "group updated");
        }
        Ok(AppliedPatch {
            id: group_id,
            updates,
        })
    }
}
