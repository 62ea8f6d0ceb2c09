use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{validate_key, ContentStore, ObjectMetadata, StorageError};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub metadata: ObjectMetadata,
}

/// In-process store. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StorageError {
    StorageError::Unavailable("store lock poisoned".to_string())
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        content: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        self.objects.lock().map_err(|_| poisoned())?.insert(
            key.to_string(),
            StoredObject {
                content: content.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        self.objects
            .lock()
            .map_err(|_| poisoned())?
            .get(key)
            .map(|o| o.content.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        Ok(self
            .objects
            .lock()
            .map_err(|_| poisoned())?
            .contains_key(key))
    }
}
