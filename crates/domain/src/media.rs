use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ports::BoxFuture;
use crate::ports::media::{MediaError, MediaFile, MediaFolder, MediaUploader};

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub folder: MediaFolder,
    pub file: MediaFile,
}

/// Keeps uploads in memory and hands out `memory://` URLs.
#[derive(Clone, Default)]
pub struct InMemoryMediaUploader {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    failing: bool,
}

impl InMemoryMediaUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// An uploader whose every call is rejected, for exercising upload failures.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn uploaded(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn object(&self, url: &str) -> Option<StoredObject> {
        let key = url.strip_prefix("memory://")?;
        self.objects.lock().ok()?.get(key).cloned()
    }
}

impl MediaUploader for InMemoryMediaUploader {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn upload(
        &self,
        folder: MediaFolder,
        file: MediaFile,
    ) -> BoxFuture<'_, Result<String, MediaError>> {
        Box::pin(async move {
            if self.failing {
                return Err(MediaError::Rejected {
                    status: 500,
                    body: "upload rejected".into(),
                });
            }
            let key = file.object_key(folder);
            let mut objects = self
                .objects
                .lock()
                .map_err(|_| MediaError::Unavailable("in-memory media lock poisoned".into()))?;
            objects.insert(key.clone(), StoredObject { folder, file });
            Ok(format!("memory://{key}"))
        })
    }
}

/// Uploads `file` when one was supplied with content; empty files count as
/// no file at all.
pub(crate) async fn upload_optional(
    uploader: &dyn MediaUploader,
    folder: MediaFolder,
    file: Option<MediaFile>,
) -> crate::DomainResult<Option<String>> {
    let Some(file) = file.filter(|file| !file.is_empty()) else {
        return Ok(None);
    };
    let file_name = file.file_name.clone();
    let url = uploader.upload(folder, file).await.map_err(|err| {
        tracing::warn!(%folder, %file_name, error = %err, "media upload failed");
        err
    })?;
    tracing::debug!(%folder, %url, "media uploaded");
    Ok(Some(url))
}
