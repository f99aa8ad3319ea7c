//! Chaos broadcast for zebu replication tests
//!
//! Wraps a broadcast transport and makes it hostile:
//! - Message loss
//! - Duplication
//! - Reordering
//!
//! All decisions come from a seeded RNG so a failing run can be replayed.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use zebu_core::ZebuResult;
use zebu_transport::{BroadcastTransport, Subscription};

/// Broadcast chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Message loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Duplicate probability
    pub duplicate_prob: f64,
    /// Reorder probability
    pub reorder_prob: f64,
    /// How many later publishes a reordered message is held behind
    pub reorder_depth: u32,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            loss_rate: 0.01,
            duplicate_prob: 0.01,
            reorder_prob: 0.05,
            reorder_depth: 3,
        }
    }
}

impl ChaosConfig {
    /// Perfect delivery
    pub fn none() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            duplicate_prob: 0.0,
            reorder_prob: 0.0,
            reorder_depth: 0,
        }
    }

    /// Poor network conditions
    pub fn poor() -> Self {
        ChaosConfig {
            loss_rate: 0.05,
            duplicate_prob: 0.02,
            reorder_prob: 0.1,
            reorder_depth: 5,
        }
    }

    /// Hostile network conditions
    pub fn hostile() -> Self {
        ChaosConfig {
            loss_rate: 0.3,
            duplicate_prob: 0.1,
            reorder_prob: 0.3,
            reorder_depth: 8,
        }
    }
}

/// Chaos broadcast statistics
#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub messages_sent: u64,
    pub messages_forwarded: u64,
    pub messages_lost: u64,
    pub messages_reordered: u64,
    pub messages_duplicated: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            0.0
        } else {
            self.messages_lost as f64 / self.messages_sent as f64
        }
    }
}

/// A message held back to be delivered out of order
#[derive(Debug)]
struct HeldMessage {
    topic: String,
    data: Bytes,
    remaining: u32,
}

#[derive(Debug)]
struct ChaosState {
    rng: StdRng,
    held: VecDeque<HeldMessage>,
    stats: ChaosStats,
}

/// Broadcast transport that loses, duplicates and reorders what it is given
#[derive(Debug)]
pub struct ChaosBroadcast<T> {
    inner: Arc<T>,
    config: ChaosConfig,
    state: Mutex<ChaosState>,
}

impl<T: BroadcastTransport> ChaosBroadcast<T> {
    /// Create a chaos layer over `inner` with seed
    pub fn new(inner: Arc<T>, config: ChaosConfig, seed: u64) -> Self {
        ChaosBroadcast {
            inner,
            config,
            state: Mutex::new(ChaosState {
                rng: StdRng::seed_from_u64(seed),
                held: VecDeque::new(),
                stats: ChaosStats::default(),
            }),
        }
    }

    pub fn inner(&self) -> &Arc<T> {
        &self.inner
    }

    /// Get current statistics
    pub fn stats(&self) -> ChaosStats {
        self.state.lock().stats.clone()
    }

    /// Messages currently held back
    pub fn held(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Deliver every held message now
    pub async fn flush(&self) -> ZebuResult<()> {
        let held: Vec<HeldMessage> = self.state.lock().held.drain(..).collect();
        for message in held {
            self.forward(&message.topic, message.data).await?;
        }
        Ok(())
    }

    /// Decide the fate of one message; returns the copies to send now
    fn plan(&self, topic: &str, data: Bytes) -> Vec<(String, Bytes)> {
        let mut state = self.state.lock();
        state.stats.messages_sent += 1;

        // Held messages move one step closer to release
        let mut out = Vec::new();
        let mut still_held = VecDeque::new();
        while let Some(mut held) = state.held.pop_front() {
            if held.remaining <= 1 {
                out.push((held.topic, held.data));
            } else {
                held.remaining -= 1;
                still_held.push_back(held);
            }
        }
        state.held = still_held;

        if state.rng.gen::<f64>() < self.config.loss_rate {
            state.stats.messages_lost += 1;
            return out;
        }

        let copies = if state.rng.gen::<f64>() < self.config.duplicate_prob {
            state.stats.messages_duplicated += 1;
            2
        } else {
            1
        };

        if self.config.reorder_depth > 0 && state.rng.gen::<f64>() < self.config.reorder_prob {
            let remaining = state.rng.gen_range(1..=self.config.reorder_depth);
            state.stats.messages_reordered += 1;
            for _ in 0..copies {
                state.held.push_back(HeldMessage {
                    topic: topic.to_string(),
                    data: data.clone(),
                    remaining,
                });
            }
        } else {
            for _ in 0..copies {
                out.insert(0, (topic.to_string(), data.clone()));
            }
        }
        out
    }

    async fn forward(&self, topic: &str, data: Bytes) -> ZebuResult<()> {
        self.inner.publish(topic, data).await?;
        self.state.lock().stats.messages_forwarded += 1;
        Ok(())
    }
}

#[async_trait]
impl<T: BroadcastTransport> BroadcastTransport for ChaosBroadcast<T> {
    async fn publish(&self, topic: &str, data: Bytes) -> ZebuResult<()> {
        let planned = self.plan(topic, data);
        for (topic, data) in planned {
            self.forward(&topic, data).await?;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> ZebuResult<Subscription> {
        self.inner.subscribe(topic).await
    }
}
