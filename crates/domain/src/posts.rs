use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::DomainResult;
use crate::documents::decode_snapshot;
use crate::error::DomainError;
use crate::groups::group_path;
use crate::media::upload_optional;
use crate::ports::documents::{CollectionPath, DocumentQuery, DocumentStore, SortDirection};
use crate::ports::media::{MediaFile, MediaFolder, MediaUploader};
use crate::util::{dedupe_and_trim, non_blank, now_ms, require_id, require_length};

pub const POSTS: &str = "posts";

pub fn posts_collection(group_id: &str) -> CollectionPath {
    CollectionPath::nested(&group_path(group_id), POSTS)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at_ms: i64,
    pub activity_at_ms: i64,
    pub author_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: String,
    pub group_id: String,
    #[serde(flatten)]
    pub record: PostRecord,
}

#[derive(Clone, Debug, Default)]
pub struct PostCreate {
    pub group_ids: Vec<String>,
    pub title: String,
    pub content: Option<String>,
    pub activity_at_ms: i64,
    pub author_id: String,
    pub image: Option<MediaFile>,
}

/// One document is written per target group; `post` carries the first id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PostsCreated {
    pub post: Post,
    pub created_post_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
enum Selection {
    ById(String),
    Filtered {
        author_id: Option<String>,
        activity_range: Option<(i64, i64)>,
    },
}

/// A read over one group's posts. A post id wins over every other filter.
#[derive(Clone, Debug, PartialEq)]
pub struct PostQuery {
    group_id: String,
    selection: Selection,
}

impl PostQuery {
    pub fn new(
        group_id: &str,
        post_id: Option<String>,
        author_id: Option<String>,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> DomainResult<Self> {
        let group_id = require_id("group_id", group_id)?;
        let activity_range = match (start_ms, end_ms) {
            (Some(start), Some(end)) => Some((start, end)),
            (None, None) => None,
            _ => {
                return Err(DomainError::Validation(
                    "start_date and end_date must be supplied together".into(),
                ));
            }
        };

        let selection = match non_blank(post_id) {
            Some(post_id) => Selection::ById(require_id("post_id", &post_id)?),
            None => Selection::Filtered {
                author_id: non_blank(author_id),
                activity_range,
            },
        };
        Ok(Self {
            group_id,
            selection,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// The store query for the filtered case; `None` for a by-id lookup.
    pub fn to_document_query(&self) -> Option<DocumentQuery> {
        match &self.selection {
            Selection::ById(_) => None,
            Selection::Filtered {
                author_id,
                activity_range,
            } => Some(filtered_query(author_id.as_deref(), *activity_range)),
        }
    }
}

fn filtered_query(author_id: Option<&str>, activity_range: Option<(i64, i64)>) -> DocumentQuery {
    let mut query = DocumentQuery::new();
    if let Some(author_id) = author_id {
        query = query.where_eq("author_id", author_id);
    }
    if let Some((start, end)) = activity_range {
        query = query
            .where_gte("activity_at_ms", start)
            .where_lte("activity_at_ms", end);
    }
    query.order_by("activity_at_ms", SortDirection::Descending)
}

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn DocumentStore>,
    media: Arc<dyn MediaUploader>,
}

impl PostService {
    pub fn new(store: Arc<dyn DocumentStore>, media: Arc<dyn MediaUploader>) -> Self {
        Self { store, media }
    }

    /// Writes one copy of the post into each target group, in order. Copies
    /// already written stay in place if a later one fails.
    pub async fn create(&self, input: PostCreate) -> DomainResult<PostsCreated> {
        let group_ids = dedupe_and_trim(&input.group_ids)
            .iter()
            .map(|id| require_id("group_ids", id))
            .collect::<DomainResult<Vec<String>>>()?;
        if group_ids.is_empty() {
            return Err(DomainError::Validation(
                "at least one group id is required".into(),
            ));
        }
        let title = require_length("title", &input.title, 3, 100)?;
        let author_id = require_id("author_id", &input.author_id)?;
        let content = input.content.map(|c| c.trim().to_string()).unwrap_or_default();

        for group_id in &group_ids {
            if !self.store.get(&group_path(group_id)).await?.exists() {
                return Err(DomainError::NotFound(format!("group {group_id}")));
            }
        }

        let image_url =
            upload_optional(self.media.as_ref(), MediaFolder::Posts, input.image).await?;
        let record = PostRecord {
            title,
            content,
            image_url,
            created_at_ms: now_ms(),
            activity_at_ms: input.activity_at_ms,
            author_id,
        };
        let body = serde_json::to_value(&record)
            .map_err(|err| DomainError::Validation(format!("invalid post payload: {err}")))?;

        let mut created_post_ids = Vec::with_capacity(group_ids.len());
        for group_id in &group_ids {
            let post_id = self
                .store
                .add(&posts_collection(group_id), body.clone())
                .await?;
            debug!(group_id = %group_id, post_id = %post_id, "post copy written");
            created_post_ids.push(post_id);
        }
        info!(
            author_id = %record.author_id,
            groups = group_ids.len(),
            "post created"
        );

        // `group_ids` and `created_post_ids` are both non-empty and aligned.
        let post = Post {
            id: created_post_ids[0].clone(),
            group_id: group_ids[0].clone(),
            record,
        };
        Ok(PostsCreated {
            post,
            created_post_ids,
        })
    }

    pub async fn query(&self, query: &PostQuery) -> DomainResult<Vec<Post>> {
        let collection = posts_collection(query.group_id());
        let snapshots = match &query.selection {
            Selection::ById(post_id) => {
                let snapshot = self.store.get(&collection.doc(post_id.clone())).await?;
                if !snapshot.exists() {
                    return Err(DomainError::NotFound(format!(
                        "post {post_id} in group {}",
                        query.group_id()
                    )));
                }
                vec![snapshot]
            }
            Selection::Filtered {
                author_id,
                activity_range,
            } => {
                let document_query = filtered_query(author_id.as_deref(), *activity_range);
                self.store.query(&collection, &document_query).await?
            }
        };

        let mut posts = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            if let Some(record) = decode_snapshot::<PostRecord>("post", snapshot)? {
                posts.push(Post {
                    id: snapshot.id.clone(),
                    group_id: query.group_id().to_string(),
                    record,
                });
            }
        }
        Ok(posts)
    }
}
