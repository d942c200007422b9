use std::fmt;

use thiserror::Error;

use super::BoxFuture;

/// Object-storage folders, one per kind of owning document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaFolder {
    Groups,
    Posts,
    Users,
}

impl MediaFolder {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaFolder::Groups => "blessing_groups",
            MediaFolder::Posts => "blessing_posts",
            MediaFolder::Users => "blessing_users",
        }
    }
}

impl fmt::Display for MediaFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }

    /// `{folder}/{uuidv7}-{file name}` with the file name reduced to a safe
    /// character set.
    pub fn object_key(&self, folder: MediaFolder) -> String {
        format!(
            "{}/{}-{}",
            folder.as_str(),
            crate::util::uuid_v7_without_dashes(),
            sanitize_file_name(&self.file_name)
        )
    }
}

impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("media gateway unavailable: {0}")]
    Unavailable(String),
}

pub trait MediaUploader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stores the file and returns its publicly resolvable URL.
    fn upload(&self, folder: MediaFolder, file: MediaFile) -> BoxFuture<'_, Result<String, MediaError>>;
}
