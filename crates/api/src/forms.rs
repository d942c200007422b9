use std::collections::HashMap;

use axum::extract::Multipart;
use blessing_domain::ports::media::MediaFile;

use crate::error::ApiError;

/// A decoded `multipart/form-data` body.
///
/// Field names are matched case-insensitively with `_` and `-` ignored, so
/// `group_ids`, `groupIds` and `GroupIds` address the same field. Empty file
/// parts are dropped.
#[derive(Debug, Default)]
pub struct FormData {
    text: HashMap<String, Vec<String>>,
    files: HashMap<String, MediaFile>,
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|ch| !matches!(ch, '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

impl FormData {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = FormData::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::Validation(format!("invalid multipart body: {err}")))?
        {
            let Some(name) = field.name().map(normalize) else {
                continue;
            };
            if let Some(file_name) = field.file_name().map(str::to_string) {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|err| {
                    ApiError::Validation(format!("invalid file field '{name}': {err}"))
                })?;
                if !bytes.is_empty() {
                    form.files
                        .insert(name, MediaFile::new(file_name, content_type, bytes.to_vec()));
                }
            } else {
                let value = field.text().await.map_err(|err| {
                    ApiError::Validation(format!("invalid text field '{name}': {err}"))
                })?;
                form.text.entry(name).or_default().push(value);
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.text
            .get(&normalize(name))
            .and_then(|values| values.first().cloned())
    }

    /// Every value of a repeated field; comma-separated values are split.
    pub fn list(&self, name: &str) -> Vec<String> {
        self.text
            .get(&normalize(name))
            .map(|values| {
                values
                    .iter()
                    .flat_map(|value| value.split(','))
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The first non-empty file under any of `names`.
    pub fn file(&mut self, names: &[&str]) -> Option<MediaFile> {
        names
            .iter()
            .find_map(|name| self.files.remove(&normalize(name)))
    }
}
