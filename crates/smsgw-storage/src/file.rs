//! Blob storage for uploaded destination files

use crate::models::NumFileType;
use async_trait::async_trait;
use smsgw_common::config::StorageConfig;
use smsgw_common::{Error, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// File storage trait
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store a blob under a relative name
    async fn store(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Read a blob
    async fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// Delete a blob
    async fn delete(&self, name: &str) -> Result<()>;

    /// Check if a blob exists
    async fn exists(&self, name: &str) -> Result<bool>;
}

/// Relative blob name for a new upload: `<username>/<uuid><ext>`
pub fn blob_name(username: &str, file_type: NumFileType) -> String {
    let owner: String = username
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("{}/{}{}", owner, Uuid::new_v4().simple(), file_type.as_str())
}

/// Local filesystem storage
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage instance from config
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::from_path(&config.path)
    }

    /// Create a new local storage instance rooted at `path`
    pub fn from_path(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Internal(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized file storage");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    /// Resolve a relative name, refusing anything that could leave the root
    fn full_path(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let clean = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(Error::Request(format!("Invalid file name {}", name)));
        }
        Ok(self.base_path.join(relative))
    }
}

fn io_err(action: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound("File".to_string())
    } else {
        Error::Internal(format!("Failed to {} file: {}", action, e))
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, name: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(name)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err("create directory for", e))?;
        }
        fs::write(&full_path, data)
            .await
            .map_err(|e| io_err("write", e))?;

        debug!(name = %name, size = data.len(), "Stored file");
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(name)?;
        fs::read(&full_path).await.map_err(|e| io_err("read", e))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let full_path = self.full_path(name)?;
        fs::remove_file(&full_path)
            .await
            .map_err(|e| io_err("delete", e))?;

        debug!(name = %name, "Deleted file");
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let full_path = self.full_path(name)?;
        Ok(fs::try_exists(&full_path).await.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(&StorageConfig {
            path: temp_dir.path().to_path_buf(),
        })
        .unwrap();

        let name = blob_name("alice", NumFileType::Csv);
        assert!(name.starts_with("alice/"));
        assert!(name.ends_with(".csv"));

        storage.store(&name, b"923001234567,923011234567").await.unwrap();
        assert!(storage.exists(&name).await.unwrap());
        assert_eq!(storage.read(&name).await.unwrap(), b"923001234567,923011234567");

        storage.delete(&name).await.unwrap();
        assert!(!storage.exists(&name).await.unwrap());
        assert!(matches!(storage.read(&name).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_path_traversal_prevention() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::from_path(temp_dir.path()).unwrap();

        assert!(storage.store("../../../etc/passwd", b"evil").await.is_err());
        assert!(storage.read("/etc/shadow").await.is_err());
        assert!(storage.exists("a/../../b").await.is_err());
        assert!(storage.store("", b"empty").await.is_err());

        assert_eq!(blob_name("../root", NumFileType::Txt).split('/').count(), 2);
    }
}
