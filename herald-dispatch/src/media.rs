//! Media/audio artifact store: campaign media references to sendable
//! payloads.

use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use herald_common::MediaRef;
use herald_provider::{MediaAttachment, MediaPayload};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Media reference is empty")]
    EmptyReference,

    /// The reference tries to leave the media directory
    #[error("Media reference {0:?} is outside the media store")]
    OutsideStore(String),

    #[error("Media {reference:?} could not be read: {source}")]
    Read {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait MediaStore: Send + Sync + fmt::Debug {
    async fn resolve(&self, media: &MediaRef) -> Result<MediaAttachment, MediaError>;
}

fn file_name(reference: &str) -> String {
    reference
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .map_or_else(|| "attachment".to_string(), |name| {
            name.split(['?', '#']).next().unwrap_or(name).to_string()
        })
}

fn mime_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "ogg" | "opus" => "audio/ogg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

/// Artifacts published behind a URL prefix. Absolute `http(s)` references
/// are passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMediaStore {
    pub base_url: String,
}

impl UrlMediaStore {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }

        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            reference.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl MediaStore for UrlMediaStore {
    async fn resolve(&self, media: &MediaRef) -> Result<MediaAttachment, MediaError> {
        let reference = media.reference.trim();
        if reference.is_empty() {
            return Err(MediaError::EmptyReference);
        }

        Ok(MediaAttachment {
            kind: media.kind,
            file_name: file_name(reference),
            payload: MediaPayload::Url(self.url_for(reference)),
        })
    }
}

/// Artifacts read from a local directory and sent as bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMediaStore {
    pub root: PathBuf,
}

#[async_trait]
impl MediaStore for DirectoryMediaStore {
    async fn resolve(&self, media: &MediaRef) -> Result<MediaAttachment, MediaError> {
        let reference = media.reference.trim().trim_start_matches('/');
        if reference.is_empty() {
            return Err(MediaError::EmptyReference);
        }
        if reference.split('/').any(|segment| segment == "..") {
            return Err(MediaError::OutsideStore(reference.to_string()));
        }

        let data = tokio::fs::read(self.root.join(reference))
            .await
            .map_err(|source| MediaError::Read {
                reference: reference.to_string(),
                source,
            })?;

        let file_name = file_name(reference);
        Ok(MediaAttachment {
            kind: media.kind,
            payload: MediaPayload::Bytes {
                data: Arc::from(data),
                mime_type: mime_type(&file_name).to_string(),
            },
            file_name,
        })
    }
}

/// Media store selected in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaConfig {
    Url(UrlMediaStore),
    Directory(DirectoryMediaStore),
}

impl MediaConfig {
    #[must_use]
    pub fn build(&self) -> Arc<dyn MediaStore> {
        match self {
            Self::Url(store) => Arc::new(store.clone()),
            Self::Directory(store) => Arc::new(store.clone()),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self::Url(UrlMediaStore::new("http://localhost/media"))
    }
}
