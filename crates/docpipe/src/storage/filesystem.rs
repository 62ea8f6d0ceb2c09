use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{validate_key, ContentStore, ObjectMetadata, StorageError};

const METADATA_SUFFIX: &str = ".meta.json";

/// Write `content` to `dst` via a sibling temp file and a rename, so readers
/// never observe a half-written object and an overwrite is all-or-nothing.
async fn write_atomic(dst: &Path, content: &[u8]) -> Result<(), StorageError> {
    let file_name = dst
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("object");
    let tmp = dst.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| StorageError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;

    if let Err(e) = tokio::fs::rename(&tmp, dst).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageError::WriteFile {
            path: dst.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

/// Object store rooted at a local directory. Metadata is kept in a
/// `<key>.meta.json` sidecar next to each object.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    pub async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        let path = self.metadata_path(key)?;
        let raw = read(&path, key).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn metadata_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{}{}", key, METADATA_SUFFIX)))
    }

    async fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

async fn read(path: &Path, key: &str) -> Result<Vec<u8>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StorageError::NotFound(key.to_string()))
        }
        Err(e) => Err(StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[async_trait]
impl ContentStore for FilesystemStore {
    async fn put(
        &self,
        key: &str,
        content: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            self.ensure_directory(parent).await?;
        }

        // Object first: a sidecar without its object would be misleading.
        write_atomic(&path, content).await?;
        let meta = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&self.metadata_path(key)?, &meta).await?;

        log::debug!("Stored {} ({} bytes)", key, content.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        read(&path, key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::ReadFile { path, source: e })
    }
}
