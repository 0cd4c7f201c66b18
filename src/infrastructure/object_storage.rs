// Object Storage - where article images live. Only the returned descriptor is
// persisted with the article.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Folder prefix of every public id handed out by this service.
pub const UPLOAD_FOLDER: &str = "live-articles";

/// Opaque reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub public_id: String,
    pub url: String,
    pub secure_url: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes`; `file_name` is only used to keep the extension.
    async fn upload(&self, bytes: Vec<u8>, file_name: Option<&str>) -> AppResult<ImageDescriptor>;

    async fn delete(&self, public_id: &str) -> AppResult<()>;
}

/// Blobs as files under a local directory, served elsewhere at
/// `public_base_url`.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, public_id: &str) -> AppResult<PathBuf> {
        let relative = Path::new(public_id);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if public_id.is_empty() || !is_plain {
            return Err(AppError::Validation(format!("Invalid public id {}", public_id)));
        }
        Ok(self.root.join(relative))
    }

    fn secure(url: &str) -> String {
        match url.strip_prefix("http://") {
            Some(rest) => format!("https://{}", rest),
            None => url.to_string(),
        }
    }
}

fn extension_of(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn upload(&self, bytes: Vec<u8>, file_name: Option<&str>) -> AppResult<ImageDescriptor> {
        let public_id = format!("{}/{}{}", UPLOAD_FOLDER, Uuid::new_v4(), extension_of(file_name));
        let path = self.path_for(&public_id)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Dependency(format!("Failed to prepare upload directory: {}", e))
            })?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| AppError::Dependency(format!("Failed to upload image: {}", e)))?;

        debug!("Stored {} bytes as {}", bytes.len(), public_id);

        let url = format!("{}/{}", self.public_base_url, public_id);
        Ok(ImageDescriptor {
            secure_url: Self::secure(&url),
            url,
            public_id,
            created_at: Utc::now(),
        })
    }

    async fn delete(&self, public_id: &str) -> AppResult<()> {
        let path = self.path_for(public_id)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| AppError::Dependency(format!("Failed to delete image {}: {}", public_id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path(), "http://localhost:5000/media/");

        let image = storage.upload(b"png-bytes".to_vec(), Some("cat.PNG")).await.unwrap();
        assert!(image.public_id.starts_with("live-articles/"));
        assert!(image.public_id.ends_with(".png"));
        assert_eq!(image.url, format!("http://localhost:5000/media/{}", image.public_id));
        assert!(image.secure_url.starts_with("https://localhost:5000/media/"));

        let stored = tokio::fs::read(dir.path().join(&image.public_id)).await.unwrap();
        assert_eq!(stored, b"png-bytes");

        storage.delete(&image.public_id).await.unwrap();
        assert!(!dir.path().join(&image.public_id).exists());

        // Second delete has nothing to remove
        let err = storage.delete(&image.public_id).await.unwrap_err();
        assert!(matches!(err, AppError::Dependency(_)));
    }

    #[tokio::test]
    async fn test_rejects_escaping_public_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path(), "http://localhost/media");
        let err = storage.delete("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_extension_filtering() {
        assert_eq!(extension_of(Some("a.JPG")), ".jpg");
        assert_eq!(extension_of(Some("noext")), "");
        assert_eq!(extension_of(Some("weird.p/g")), "");
        assert_eq!(extension_of(None), "");
    }
}
