use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use fxhash::FxHasher;
use log::info;
use parking_lot::Mutex;

use crate::alert::Alert;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::flow::FlowKey;
use crate::matcher::PatternMatcher;
use crate::rules::{Rule, RuleSet};

use super::{Engine, EngineStats, SegmentInput};

/// Shared-nothing parallel front for [`Engine`].
///
/// Segments are routed by the hash of the canonical flow key, so both
/// directions of a flow always land on the same shard and per-flow
/// processing stays serialized without any flow-level locking. The rule
/// set and the compiled automaton are built once and shared read-only.
pub struct ShardedEngine {
    shards: Vec<Mutex<Engine>>,
    shard_count: usize,
    stats: Arc<DashMap<usize, EngineStats>>,
}

impl ShardedEngine {
    pub fn new(config: EngineConfig, rules: Vec<Rule>) -> Result<Self> {
        let shard_count = config.shard_count.max(1);
        let rules = Arc::new(RuleSet::new(rules, config.max_rules)?);
        let matcher = Arc::new(PatternMatcher::new(&rules)?);
        let shards = (0..shard_count)
            .map(|_| {
                Mutex::new(Engine::with_shared(
                    config.clone(),
                    Arc::clone(&rules),
                    Arc::clone(&matcher),
                ))
            })
            .collect();
        info!("sharded engine up: {} shards", shard_count);
        Ok(Self {
            shards,
            shard_count,
            stats: Arc::new(DashMap::new()),
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    fn shard_of(&self, key: &FlowKey) -> usize {
        let mut hasher = FxHasher::default();
        key.canonical().hash(&mut hasher);
        (hasher.finish() as usize) % self.shard_count
    }

    /// Processes one segment on its owning shard.
    pub fn process(&self, input: &SegmentInput) -> Vec<Alert> {
        let index = self.shard_of(&input.key);
        let mut shard = self.shards[index].lock();
        let alerts = shard.process(input);
        self.stats.insert(index, shard.stats());
        alerts
    }

    /// Sweeps idle flows on every shard.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().sweep_idle(now))
            .sum()
    }

    pub fn flow_count(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().flow_count()).sum()
    }

    /// Aggregated counters across all shards, from the last snapshot each
    /// shard published.
    pub fn stats(&self) -> EngineStats {
        let mut total = EngineStats::default();
        for entry in self.stats.iter() {
            let s = entry.value();
            total.segments += s.segments;
            total.flows_created += s.flows_created;
            total.flows_destroyed += s.flows_destroyed;
            total.flows_evicted += s.flows_evicted;
            total.bytes_assembled += s.bytes_assembled;
            total.alerts += s.alerts;
        }
        total
    }
}
