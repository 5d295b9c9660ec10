//! Uploaded destination files.

use crate::campaign::numbers::{parse_file, Row, MAX_FILE_SIZE};
use crate::context::{require, require_owner};
use smsgw_common::types::{now_epoch, FileId, Permission};
use smsgw_common::{Error, Result};
use smsgw_storage::{blob_name, FileStorage, NumFile, NumFileCriteria, NumFileStore, NumFileType, User};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct NumFileService {
    store: Arc<dyn NumFileStore>,
    storage: Arc<dyn FileStorage>,
}

impl NumFileService {
    pub fn new(store: Arc<dyn NumFileStore>, storage: Arc<dyn FileStorage>) -> Self {
        Self { store, storage }
    }

    /// Validate, store the blob and record the file
    pub async fn upload(
        &self,
        user: &User,
        name: &str,
        description: &str,
        data: &[u8],
    ) -> Result<NumFile> {
        let file_type = NumFileType::from_name(name)?;
        if data.len() > MAX_FILE_SIZE {
            return Err(Error::field("File", "File must be smaller than 5 MB"));
        }
        let rows = parse_file(file_type, data).map_err(|e| Error::field("File", e.to_string()))?;

        let local_name = blob_name(&user.username, file_type);
        self.storage.store(&local_name, data).await?;
        let file = self
            .store
            .save(NumFile {
                id: 0,
                name: name.to_string(),
                description: description.to_string(),
                local_name,
                file_type,
                username: user.username.clone(),
                submitted_at: now_epoch(),
                deleted: false,
            })
            .await?;
        info!(
            file_id = file.id,
            name = %file.name,
            numbers = rows.len(),
            username = %user.username,
            "Destination file uploaded"
        );
        Ok(file)
    }

    /// The caller's files, or everyone's with `List number files`
    pub async fn list(&self, user: &User, mut criteria: NumFileCriteria) -> Result<Vec<NumFile>> {
        if !user.can(Permission::ListNumFiles) {
            criteria.username = Some(user.username.clone());
        }
        if criteria.deleted.is_none() {
            criteria.deleted = Some(false);
        }
        self.store.list(&criteria).await
    }

    pub async fn delete(&self, user: &User, id: FileId) -> Result<()> {
        require(user, Permission::DeleteNumFile)?;
        let file = self.store.get(id).await?;
        require_owner(user, &file.username, Permission::ListNumFiles)?;
        self.store.delete(id).await?;
        // the row is kept for campaigns that reference it, the blob is not
        if let Err(e) = self.storage.delete(&file.local_name).await {
            warn!(file_id = id, error = %e, "Couldn't remove file blob");
        }
        info!(file_id = id, username = %user.username, "Destination file deleted");
        Ok(())
    }

    /// Parsed rows of a file visible to `user`
    pub async fn rows(&self, user: &User, id: FileId) -> Result<(NumFile, Vec<Row>)> {
        let file = self.store.get(id).await.map_err(|e| match e {
            Error::NotFound(_) => Error::field("FileID", "File doesn't exist"),
            other => other,
        })?;
        require_owner(user, &file.username, Permission::ListNumFiles)?;
        let data = self.storage.read(&file.local_name).await?;
        let rows =
            parse_file(file.file_type, &data).map_err(|e| Error::field("FileID", e.to_string()))?;
        Ok((file, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::numbers::tests::workbook;
    use crate::message::tests::user;
    use smsgw_storage::{LocalStorage, MemoryNumFileStore};
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> NumFileService {
        NumFileService::new(
            Arc::new(MemoryNumFileStore::new()),
            Arc::new(LocalStorage::from_path(dir.path()).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_upload_and_read_rows() {
        let dir = TempDir::new().unwrap();
        let files = service(&dir);
        let alice = user(vec![]);

        let file = files
            .upload(&alice, "list.csv", "friends", b"923001234567,923001234568\n923001234567")
            .await
            .unwrap();
        assert_eq!(file.file_type, NumFileType::Csv);
        assert_eq!(file.username, "alice");

        let (_, rows) = files.rows(&alice, file.id).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_content() {
        let dir = TempDir::new().unwrap();
        let files = service(&dir);
        let alice = user(vec![]);

        let err = files.upload(&alice, "list.csv", "", b"123").await.unwrap_err();
        assert!(matches!(err, Error::Form(_)));
        let err = files.upload(&alice, "list.pdf", "", b"923001234567").await.unwrap_err();
        assert!(matches!(err, Error::Form(_)));
        let big = vec![b'1'; MAX_FILE_SIZE + 1];
        assert!(files.upload(&alice, "big.txt", "", &big).await.is_err());
        assert!(files.list(&alice, NumFileCriteria::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_xlsx() {
        let dir = TempDir::new().unwrap();
        let files = service(&dir);
        let data = workbook(&[&["Destination", "Name"], &["923001234567", "Ali"]]);
        let file = files.upload(&user(vec![]), "people.xlsx", "", &data).await.unwrap();
        let (_, rows) = files.rows(&user(vec![]), file.id).await.unwrap();
        assert_eq!(rows[0].params.get("Name").map(String::as_str), Some("Ali"));
    }

    #[tokio::test]
    async fn test_delete_and_visibility() {
        let dir = TempDir::new().unwrap();
        let files = service(&dir);
        let alice = user(vec![Permission::DeleteNumFile]);
        let mut bob = user(vec![Permission::DeleteNumFile]);
        bob.username = "bob".to_string();

        let file = files.upload(&alice, "list.txt", "", b"923001234567").await.unwrap();
        assert!(files.list(&bob, NumFileCriteria::default()).await.unwrap().is_empty());
        assert!(matches!(
            files.rows(&bob, file.id).await.unwrap_err(),
            Error::Forbidden(_)
        ));
        assert!(matches!(
            files.delete(&bob, file.id).await.unwrap_err(),
            Error::Forbidden(_)
        ));

        files.delete(&alice, file.id).await.unwrap();
        assert!(files.list(&alice, NumFileCriteria::default()).await.unwrap().is_empty());
        assert!(matches!(
            files.rows(&alice, file.id).await.unwrap_err(),
            Error::Form(_)
        ));
    }
}
