//! Replication engine - gossip in, periodic republish out
//!
//! Inbound: every record heard on the shared topic is offered to the
//! directory. A broken subscription is retried with exponential backoff for
//! as long as the engine runs.
//!
//! Outbound: the full directory is re-broadcast on a fixed period, which is
//! what heals lost messages and brings late joiners up to date.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use zebu_core::{identity_topic, NameRecord, ZebuError, ZebuResult, CENTRAL_TOPIC};
use zebu_state::{MergeOutcome, RecordDirectory};
use zebu_transport::{BroadcastTransport, Subscription};

use crate::ReplicationConfig;

/// Run `fut`, failing with `Timeout` once `limit` has passed
pub async fn within<T, F>(limit: Duration, fut: F) -> ZebuResult<T>
where
    F: Future<Output = ZebuResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ZebuError::Timeout(limit))?
}

/// Liveness and traffic counters shared by the engine loops
#[derive(Debug, Default)]
pub struct EngineHealth {
    alive: AtomicBool,
    subscribed: AtomicBool,
    loaded: AtomicBool,
    resubscribes: AtomicU64,
    received: AtomicU64,
    merged: AtomicU64,
    malformed: AtomicU64,
    published: AtomicU64,
    last_message: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`EngineHealth`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub alive: bool,
    pub subscribed: bool,
    pub ready: bool,
    pub resubscribes: u64,
    pub received: u64,
    pub merged: u64,
    pub malformed: u64,
    pub published: u64,
    pub last_message: Option<DateTime<Utc>>,
}

impl EngineHealth {
    pub fn new() -> Self {
        EngineHealth::default()
    }

    /// Inbound loop is running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Inbound loop holds a live subscription
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Subscribed and the directory has been loaded
    pub fn is_ready(&self) -> bool {
        self.is_subscribed() && self.loaded.load(Ordering::SeqCst)
    }

    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::SeqCst);
    }

    pub fn resubscribes(&self) -> u64 {
        self.resubscribes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            alive: self.is_alive(),
            subscribed: self.is_subscribed(),
            ready: self.is_ready(),
            resubscribes: self.resubscribes(),
            received: self.received.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            last_message: *self.last_message.lock(),
        }
    }

    fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::SeqCst);
    }

    fn record_message(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        *self.last_message.lock() = Some(Utc::now());
    }
}

/// Why a subscription stopped being drained
enum DrainEnd {
    Cancelled,
    Broken(ZebuError),
}

/// Replicates name records between the local directory and the broadcast topic
pub struct ReplicationEngine {
    directory: Arc<RecordDirectory>,
    transport: Arc<dyn BroadcastTransport>,
    config: ReplicationConfig,
    health: Arc<EngineHealth>,
}

impl ReplicationEngine {
    pub fn new(
        directory: Arc<RecordDirectory>,
        transport: Arc<dyn BroadcastTransport>,
        config: ReplicationConfig,
    ) -> Self {
        ReplicationEngine {
            directory,
            transport,
            config,
            health: Arc::new(EngineHealth::new()),
        }
    }

    pub fn directory(&self) -> &Arc<RecordDirectory> {
        &self.directory
    }

    pub fn health(&self) -> &Arc<EngineHealth> {
        &self.health
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Publish a record signed by its owner
    ///
    /// The record is merged and persisted locally first. Broadcast failures
    /// after that are only logged; the republish sweep sends it again.
    pub async fn publish(&self, record: NameRecord) -> ZebuResult<()> {
        if !record.is_signed() {
            return Err(ZebuError::UnsignedRecord(record.owner));
        }

        match self.directory.try_merge(record.clone())? {
            MergeOutcome::Accepted => {
                match self.broadcast(&record).await {
                    Ok(()) => {
                        self.health.published.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(owner = %record.owner, sequence = record.sequence, "published record");
                    }
                    Err(error) => tracing::warn!(
                        owner = %record.owner,
                        sequence = record.sequence,
                        %error,
                        "broadcast failed, record will go out with the next sweep"
                    ),
                }
                Ok(())
            }
            MergeOutcome::RejectedStale { current } => Err(ZebuError::Superseded {
                owner: record.owner,
                attempted: record.sequence,
                current,
            }),
            MergeOutcome::RejectedInvalid => Err(ZebuError::InvalidSignature),
        }
    }

    /// Send a record to the shared topic and to its owner's topic
    pub async fn broadcast(&self, record: &NameRecord) -> ZebuResult<()> {
        let data = Bytes::from(record.encode()?);
        let limit = self.config.request_timeout;

        let shared = within(limit, self.transport.publish(CENTRAL_TOPIC, data.clone())).await;
        let own_topic = identity_topic(&record.owner);
        let own = within(limit, self.transport.publish(&own_topic, data)).await;
        shared.and(own)
    }

    /// Offer one inbound message to the directory
    ///
    /// Returns `None` when the message could not be decoded or persisted.
    pub fn handle_message(&self, data: &[u8]) -> Option<MergeOutcome> {
        self.health.record_message();

        let record = match NameRecord::decode(data) {
            Ok(record) => record,
            Err(error) => {
                self.health.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%error, len = data.len(), "skipping malformed message");
                return None;
            }
        };

        match self.directory.try_merge(record) {
            Ok(outcome) => {
                if outcome.is_accepted() {
                    self.health.merged.fetch_add(1, Ordering::Relaxed);
                }
                Some(outcome)
            }
            Err(error) => {
                tracing::error!(%error, "failed to persist inbound record");
                None
            }
        }
    }

    /// Re-broadcast every held record. Returns how many went out cleanly.
    pub async fn republish_all(&self) -> usize {
        let records = self.directory.records();
        let mut sent = 0;
        for record in &records {
            match self.broadcast(record).await {
                Ok(()) => sent += 1,
                Err(error) => tracing::warn!(
                    owner = %record.owner,
                    sequence = record.sequence,
                    %error,
                    "republish failed"
                ),
            }
        }
        tracing::debug!(sent, total = records.len(), "republish sweep done");
        sent
    }

    /// Start the inbound and republish loops
    pub fn spawn(self) -> EngineHandle {
        let engine = Arc::new(self);
        let cancel = CancellationToken::new();
        engine.health.set_alive(true);

        let inbound = tokio::spawn(Arc::clone(&engine).run_inbound(cancel.clone()));
        let republish = tokio::spawn(Arc::clone(&engine).run_republish(cancel.clone()));

        EngineHandle {
            engine,
            cancel,
            inbound,
            republish,
        }
    }

    fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.backoff_initial)
            .with_max_interval(self.config.backoff_max)
            .with_max_elapsed_time(None)
            .build()
    }

    async fn run_inbound(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = self.new_backoff();

        loop {
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.transport.subscribe(CENTRAL_TOPIC) => result,
            };

            match subscribed {
                Ok(mut subscription) => {
                    self.health.set_subscribed(true);
                    tracing::info!(topic = CENTRAL_TOPIC, "subscribed");
                    let end = self.drain(&mut subscription, &cancel, &mut backoff).await;
                    self.health.set_subscribed(false);
                    match end {
                        DrainEnd::Cancelled => break,
                        DrainEnd::Broken(error) => {
                            tracing::warn!(topic = CENTRAL_TOPIC, %error, "subscription broken")
                        }
                    }
                }
                Err(error) => tracing::warn!(topic = CENTRAL_TOPIC, %error, "subscribe failed"),
            }

            let delay = backoff.next_backoff().unwrap_or(self.config.backoff_max);
            self.health.resubscribes.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?delay, "resubscribing");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.health.set_subscribed(false);
        self.health.set_alive(false);
        tracing::debug!("inbound loop stopped");
    }

    async fn drain(
        &self,
        subscription: &mut Subscription,
        cancel: &CancellationToken,
        backoff: &mut ExponentialBackoff,
    ) -> DrainEnd {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => return DrainEnd::Cancelled,
                item = subscription.recv() => item,
            };
            match item {
                Some(Ok(data)) => {
                    backoff.reset();
                    self.handle_message(&data);
                }
                Some(Err(error)) => return DrainEnd::Broken(error),
                None => {
                    return DrainEnd::Broken(ZebuError::SubscriptionClosed(
                        subscription.topic().to_string(),
                    ))
                }
            }
        }
    }

    async fn run_republish(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.republish_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.republish_all() => {}
            }
        }
        tracing::debug!("republish loop stopped");
    }
}

impl std::fmt::Debug for ReplicationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationEngine")
            .field("directory", &self.directory)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Running engine
#[derive(Debug)]
pub struct EngineHandle {
    engine: Arc<ReplicationEngine>,
    cancel: CancellationToken,
    inbound: JoinHandle<()>,
    republish: JoinHandle<()>,
}

impl EngineHandle {
    pub fn engine(&self) -> &Arc<ReplicationEngine> {
        &self.engine
    }

    /// Token that stops both loops when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop both loops and wait for them to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, task) in [("inbound", self.inbound), ("republish", self.republish)] {
            if let Err(error) = task.await {
                tracing::error!(task = name, %error, "engine task panicked");
            }
        }
        tracing::info!("replication engine stopped");
    }
}
