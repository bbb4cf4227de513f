//! Object storage capability for profile pictures.
//!
//! The engine only needs `upload` and `public_url`; the production bucket
//! adapter lives outside this crate.

use crate::error::AccountResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store the bytes and return the stored object name.
    async fn upload(&self, bytes: Vec<u8>, suggested_name: &str) -> AccountResult<String>;

    /// Public URL for a stored object name.
    fn public_url(&self, stored_name: &str) -> String;
}

/// In-memory implementation of [`ObjectStorage`] (for development and
/// testing).
#[derive(Debug, Default, Clone)]
pub struct InMemoryObjectStorage {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    base_url: String,
}

impl InMemoryObjectStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            base_url: base_url.into(),
        }
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn upload(&self, bytes: Vec<u8>, suggested_name: &str) -> AccountResult<String> {
        let stored_name = format!("{}-{}", Uuid::new_v4(), suggested_name);
        self.objects
            .write()
            .await
            .insert(stored_name.clone(), bytes);
        Ok(stored_name)
    }

    fn public_url(&self, stored_name: &str) -> String {
        format!("{}/{}", self.base_url, stored_name)
    }
}
