//! Content store - opaque blobs addressed by the id the store hands back

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use zebu_core::{ContentId, ZebuError, ZebuResult};

/// Content-addressed blob store
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a blob, returning its id
    async fn put(&self, data: Bytes) -> ZebuResult<ContentId>;

    /// Fetch a blob. `ContentNotFound` when the id is unknown.
    async fn get(&self, id: &ContentId) -> ZebuResult<Bytes>;
}

/// Prefix on ids minted by [`MemoryContentStore`]
pub const MEMORY_CID_PREFIX: &str = "sha256-";

/// Id for a blob: identical bytes always map to the identical id
pub fn content_id_for(data: &[u8]) -> ContentId {
    ContentId::new(format!("{MEMORY_CID_PREFIX}{}", hex::encode(Sha256::digest(data))))
}

/// Process-local content store
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<ContentId, Bytes>>,
    latency: RwLock<Option<Duration>>,
    offline: RwLock<bool>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        MemoryContentStore::default()
    }

    /// Delay every `get` by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Fail every call with a content store error
    pub fn set_offline(&self, offline: bool) {
        *self.offline.write() = offline;
    }

    /// Forget a blob
    pub fn remove(&self, id: &ContentId) -> bool {
        self.blobs.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    fn check_online(&self) -> ZebuResult<()> {
        if *self.offline.read() {
            return Err(ZebuError::ContentStore("store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, data: Bytes) -> ZebuResult<ContentId> {
        self.check_online()?;
        let id = content_id_for(&data);
        self.blobs.write().insert(id.clone(), data);
        tracing::trace!(cid = %id, "stored blob");
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> ZebuResult<Bytes> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.check_online()?;
        self.blobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ZebuError::ContentNotFound(id.clone()))
    }
}
