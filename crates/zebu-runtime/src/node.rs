//! Zebu node - directory, replication and content access behind one handle

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;

use zebu_core::{ContentId, Identity, NameRecord, Post, UserProfile, ZebuError, ZebuResult};
use zebu_state::{FileRecordStorage, RecordDirectory, RecordStorage};
use zebu_transport::{BroadcastTransport, ContentStore};

use crate::{
    health, read_chain, within, ChainError, ChainWalk, EngineHandle, EngineHealth, NodeConfig,
    ReplicationEngine,
};

/// Blob written at startup and read back by `healthz`
const HEALTH_PROBE: &[u8] = b"zebu health probe";

/// A running replica
pub struct ZebuNode {
    config: NodeConfig,
    directory: Arc<RecordDirectory>,
    content: Arc<dyn ContentStore>,
    engine: EngineHandle,
    health_probe: ContentId,
    health_server: Option<JoinHandle<ZebuResult<()>>>,
}

impl ZebuNode {
    /// Load the directory from `storage` and start replicating
    ///
    /// Fails if the configuration is invalid, storage cannot be listed, or
    /// the content store cannot take the health probe.
    pub async fn start(
        config: NodeConfig,
        storage: Arc<dyn RecordStorage>,
        content: Arc<dyn ContentStore>,
        transport: Arc<dyn BroadcastTransport>,
    ) -> ZebuResult<Self> {
        config.validate()?;

        let directory = Arc::new(RecordDirectory::new(storage));
        let loaded = directory.load()?;

        let limit = config.replication.request_timeout;
        let health_probe = within(limit, content.put(Bytes::from_static(HEALTH_PROBE))).await?;

        let engine =
            ReplicationEngine::new(directory.clone(), transport, config.replication.clone())
                .spawn();
        engine.engine().health().mark_loaded();

        let health_server = config.health.listen_addr.map(|addr| {
            tokio::spawn(health::serve(
                addr,
                Arc::clone(engine.engine().health()),
                engine.cancel_token(),
            ))
        });

        tracing::info!(
            identities = directory.len(),
            skipped = loaded.skipped,
            "zebu node started"
        );
        Ok(ZebuNode {
            config,
            directory,
            content,
            engine,
            health_probe,
            health_server,
        })
    }

    /// Start with one record file per identity under `config.records_dir()`
    pub async fn open(
        config: NodeConfig,
        content: Arc<dyn ContentStore>,
        transport: Arc<dyn BroadcastTransport>,
    ) -> ZebuResult<Self> {
        let storage = Arc::new(FileRecordStorage::open(config.records_dir())?);
        ZebuNode::start(config, storage, content, transport).await
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<RecordDirectory> {
        &self.directory
    }

    pub fn engine(&self) -> &Arc<ReplicationEngine> {
        self.engine.engine()
    }

    pub fn health(&self) -> &Arc<EngineHealth> {
        self.engine.engine().health()
    }

    /// Profile currently published by `owner`
    pub async fn get_user(&self, owner: &Identity) -> ZebuResult<UserProfile> {
        let record = self
            .directory
            .lookup(owner)
            .ok_or(ZebuError::NotFound(*owner))?;
        let bytes = self.cat(&record.content_id).await?;
        UserProfile::decode(&bytes)
    }

    /// Store a profile and stage the record that would point at it
    ///
    /// The returned record is unsigned; the owner signs it and hands it to
    /// [`publish_user`](Self::publish_user).
    pub async fn save_user(&self, owner: &Identity, profile: &UserProfile) -> ZebuResult<NameRecord> {
        let content_id = self.add(Bytes::from(profile.encode()?)).await?;
        Ok(self.directory.stage_next_sequence(owner, content_id))
    }

    /// Publish a signed record. A lost race against a newer write comes
    /// back as `Superseded`.
    pub async fn publish_user(&self, record: NameRecord) -> ZebuResult<()> {
        let owner = record.owner;
        let sequence = record.sequence;
        let result = self.engine.engine().publish(record).await;
        match &result {
            Err(error) if error.is_superseded() => {
                tracing::debug!(%owner, sequence, %error, "profile write superseded")
            }
            Err(error) => tracing::warn!(%owner, sequence, %error, "profile publish rejected"),
            Ok(()) => {}
        }
        result
    }

    pub async fn save_post(&self, post: &Post) -> ZebuResult<ContentId> {
        self.add(Bytes::from(post.encode()?)).await
    }

    /// Store a blob
    pub async fn add(&self, data: Bytes) -> ZebuResult<ContentId> {
        within(self.config.replication.request_timeout, self.content.put(data)).await
    }

    /// Fetch a blob
    pub async fn cat(&self, id: &ContentId) -> ZebuResult<Bytes> {
        within(self.config.replication.request_timeout, self.content.get(id)).await
    }

    /// Up to `count` of the profile's newest posts
    pub async fn get_posts(&self, profile: &UserProfile, count: usize) -> Result<Vec<Post>, ChainError> {
        read_chain(
            self.content.clone(),
            profile.last_post.clone(),
            count,
            self.config.replication.request_timeout,
        )
        .await
    }

    /// Lazy form of [`get_posts`](Self::get_posts)
    pub fn walk_posts(&self, profile: &UserProfile, count: usize) -> ChainWalk {
        ChainWalk::new(
            self.content.clone(),
            profile.last_post.clone(),
            count,
            self.config.replication.request_timeout,
        )
    }

    /// Up to `n` known identities
    pub fn random_users(&self, n: usize) -> Vec<Identity> {
        self.directory.snapshot(n)
    }

    /// Content store answers within the health timeout and gossip is flowing
    pub async fn healthz(&self) -> bool {
        let probe = within(
            self.config.replication.health_timeout,
            self.content.get(&self.health_probe),
        )
        .await;
        if let Err(error) = &probe {
            tracing::warn!(%error, "content store health probe failed");
        }
        probe.is_ok() && self.health().is_subscribed()
    }

    /// Stop replication and the health endpoint
    pub async fn shutdown(self) {
        self.engine.shutdown().await;
        if let Some(server) = self.health_server {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => tracing::error!(%error, "health endpoint failed"),
                Err(error) => tracing::error!(%error, "health endpoint panicked"),
            }
        }
        tracing::info!("zebu node stopped");
    }
}

impl std::fmt::Debug for ZebuNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZebuNode")
            .field("directory", &self.directory)
            .field("health_probe", &self.health_probe)
            .finish_non_exhaustive()
    }
}
