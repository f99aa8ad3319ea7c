//! Multi-replica simulation over a chaos broadcast

use std::sync::Arc;
use std::time::Duration;

use zebu_core::{Identity, NameRecord, ZebuResult};
use zebu_runtime::{EngineHandle, ReplicationConfig, ReplicationEngine};
use zebu_state::{MemoryRecordStorage, RecordDirectory};
use zebu_transport::MemoryBroadcast;

use crate::chaos::{ChaosBroadcast, ChaosConfig, ChaosStats};

/// Per-subscriber buffer on the shared medium
const BUS_CAPACITY: usize = 1024;

/// Replication settings tuned for simulations that finish in seconds
pub fn fast_replication() -> ReplicationConfig {
    ReplicationConfig {
        republish_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(1),
        health_timeout: Duration::from_secs(1),
        backoff_initial: Duration::from_millis(5),
        backoff_max: Duration::from_millis(50),
    }
}

/// A set of replicas sharing one lossy broadcast medium
pub struct ReplicaNetwork {
    bus: Arc<ChaosBroadcast<MemoryBroadcast>>,
    replicas: Vec<EngineHandle>,
}

impl ReplicaNetwork {
    /// Start `count` replicas, each with its own directory
    pub fn start(count: usize, chaos: ChaosConfig, seed: u64, replication: ReplicationConfig) -> Self {
        let inner = Arc::new(MemoryBroadcast::with_capacity(BUS_CAPACITY));
        let bus = Arc::new(ChaosBroadcast::new(inner, chaos, seed));

        let replicas = (0..count)
            .map(|_| {
                let directory = Arc::new(RecordDirectory::new(Arc::new(MemoryRecordStorage::new())));
                ReplicationEngine::new(directory, bus.clone(), replication.clone()).spawn()
            })
            .collect();

        ReplicaNetwork { bus, replicas }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn replica(&self, index: usize) -> &Arc<ReplicationEngine> {
        self.replicas[index].engine()
    }

    pub fn chaos_stats(&self) -> ChaosStats {
        self.bus.stats()
    }

    /// Publish through one replica
    pub async fn publish_from(&self, index: usize, record: NameRecord) -> ZebuResult<()> {
        self.replica(index).publish(record).await
    }

    /// Sequence each replica holds for `owner`
    pub fn sequences(&self, owner: &Identity) -> Vec<Option<u64>> {
        self.replicas
            .iter()
            .map(|r| r.engine().directory().lookup(owner).map(|rec| rec.sequence))
            .collect()
    }

    /// Every replica holds exactly `sequence` for each owner
    pub fn converged_on(&self, expected: &[(Identity, u64)]) -> bool {
        expected.iter().all(|(owner, sequence)| {
            self.sequences(owner).iter().all(|held| *held == Some(*sequence))
        })
    }

    /// Wait until every replica has subscribed
    pub async fn wait_subscribed(&self, limit: Duration) -> bool {
        self.wait_until(limit, |net| {
            net.replicas.iter().all(|r| r.engine().health().is_subscribed())
        })
        .await
    }

    /// Poll `condition` until it holds or `limit` passes
    pub async fn wait_until(&self, limit: Duration, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if condition(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop every replica
    pub async fn shutdown(self) {
        for replica in self.replicas {
            replica.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use zebu_core::ContentId;
    use zebu_crypto::{sign_record, Keypair};

    fn signed(keypair: &Keypair, seq: u64) -> NameRecord {
        let record = NameRecord::unsigned(keypair.identity(), ContentId::new(format!("Qmprofile{seq}")), seq);
        sign_record(&record, keypair).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replicas_converge_over_hostile_network() {
        let net = ReplicaNetwork::start(4, ChaosConfig::hostile(), 42, fast_replication());
        assert!(net.wait_subscribed(Duration::from_secs(5)).await);

        let writers: Vec<Keypair> = (0..3).map(|_| Keypair::generate()).collect();
        let mut rng = StdRng::seed_from_u64(7);

        // writers publish through random replicas, in shuffled sequence order
        for writer in &writers {
            let mut seqs: Vec<u64> = (1..=6).collect();
            for i in (1..seqs.len()).rev() {
                seqs.swap(i, rng.gen_range(0..=i));
            }
            for seq in seqs {
                let replica = rng.gen_range(0..net.len());
                // a replica that already holds a newer record reports Superseded
                let _ = net.publish_from(replica, signed(writer, seq)).await;
            }
        }

        let expected: Vec<(Identity, u64)> = writers.iter().map(|w| (w.identity(), 6)).collect();
        let converged = net
            .wait_until(Duration::from_secs(20), |n| n.converged_on(&expected))
            .await;
        assert!(converged, "stats: {:?}", net.chaos_stats());
        assert!(net.chaos_stats().messages_lost > 0);

        net.shutdown().await;
    }

    #[tokio::test]
    async fn test_late_joiner_catches_up_by_republish() {
        let net = ReplicaNetwork::start(1, ChaosConfig::none(), 1, fast_replication());
        assert!(net.wait_subscribed(Duration::from_secs(5)).await);
        let keypair = Keypair::generate();
        net.publish_from(0, signed(&keypair, 3)).await.unwrap();

        // a second replica on the same medium, started after the publish
        let late_directory = Arc::new(RecordDirectory::new(Arc::new(MemoryRecordStorage::new())));
        let late = ReplicationEngine::new(late_directory, net.bus.clone(), fast_replication()).spawn();

        let caught_up = net
            .wait_until(Duration::from_secs(5), |_| {
                late.engine().directory().lookup(&keypair.identity()).map(|r| r.sequence) == Some(3)
            })
            .await;
        assert!(caught_up);

        late.shutdown().await;
        net.shutdown().await;
    }

    #[tokio::test]
    async fn test_forged_records_never_spread() {
        let net = ReplicaNetwork::start(3, ChaosConfig::none(), 1, fast_replication());
        assert!(net.wait_subscribed(Duration::from_secs(5)).await);

        let victim = Keypair::generate();
        let mut forged = signed(&Keypair::generate(), 99);
        forged.owner = victim.identity();
        assert!(net.publish_from(0, forged).await.is_err());

        net.publish_from(1, signed(&victim, 1)).await.unwrap();
        let expected = [(victim.identity(), 1)];
        assert!(net.wait_until(Duration::from_secs(5), |n| n.converged_on(&expected)).await);

        net.shutdown().await;
    }
}
