use serde::{Deserialize, Serialize};

/// Engine tuning knobs, shared by every flow.
///
/// Defaults: an 8 KiB reassembly buffer, 32 resident ranges per flow and
/// a 2048-rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Resident reassembly bytes per flow.
    pub buffer_capacity: usize,
    /// Disjoint range records per flow; the tail range is dropped beyond this.
    pub max_ranges: usize,
    /// Upper bound on the rule table, fixed at setup.
    pub max_rules: usize,
    /// Concurrent flows per worker before LRU eviction kicks in.
    pub max_flows: usize,
    /// Idle seconds before the sweep destroys a flow.
    pub flow_timeout_secs: u64,
    /// Worker shards for `ShardedEngine`.
    pub shard_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 8 * 1024,
            max_ranges: 32,
            max_rules: 2048,
            max_flows: 10_000,
            flow_timeout_secs: 300,
            shard_count: num_cpus::get(),
        }
    }
}
