use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, trace};
use serde::Serialize;

use crate::alert::{Alert, AlertDeduper};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::flow::{FlowEntry, FlowKey, FlowTable};
use crate::matcher::PatternMatcher;
use crate::reassembly::InsertOutcome;
use crate::rules::{PacketContext, Rule, RuleSet};

/// One parsed segment, ready for processing. The key is oriented the way
/// the packet travelled; the table resolves either orientation to the
/// same flow.
#[derive(Debug, Clone)]
pub struct SegmentInput {
    pub key: FlowKey,
    /// Stream offset of the first payload byte.
    pub offset: u64,
    pub payload: Bytes,
    /// Declared length; zero means "exactly the payload". Larger values
    /// announce a trailing span that was not captured.
    pub logical_len: u64,
    /// Receive window `(left, right)`; both zero means unbounded.
    pub window: (u64, u64),
    /// Connection teardown: the flow is destroyed after this segment.
    pub terminal: bool,
    pub ctx: PacketContext,
}

impl SegmentInput {
    pub fn new(key: FlowKey, offset: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            key,
            offset,
            payload: payload.into(),
            logical_len: 0,
            window: (0, 0),
            terminal: false,
            ctx: PacketContext::default(),
        }
    }
}

/// Aggregate counters for one engine instance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub segments: u64,
    pub flows_created: u64,
    pub flows_destroyed: u64,
    pub flows_evicted: u64,
    pub bytes_assembled: u64,
    pub alerts: u64,
}

/// Single-threaded processing core: flow table, reassembly, pattern scan
/// and alert dedup wired together.
///
/// `process` is the whole per-segment pipeline. Wrap instances in
/// [`ShardedEngine`](crate::engine::ShardedEngine) for parallelism.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    rules: Arc<RuleSet>,
    matcher: Arc<PatternMatcher>,
    deduper: AlertDeduper,
    table: FlowTable,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig, rules: Vec<Rule>) -> Result<Self> {
        let rules = Arc::new(RuleSet::new(rules, config.max_rules)?);
        let matcher = Arc::new(PatternMatcher::new(&rules)?);
        Ok(Self::with_shared(config, rules, matcher))
    }

    /// Builds an engine around an already-compiled rule set and automaton.
    /// Shards share both through `Arc` instead of compiling per shard.
    pub fn with_shared(
        config: EngineConfig,
        rules: Arc<RuleSet>,
        matcher: Arc<PatternMatcher>,
    ) -> Self {
        info!(
            "engine up: {} rules, max {} flows",
            rules.len(),
            config.max_flows
        );
        let table = FlowTable::new(config.max_flows);
        let deduper = AlertDeduper::new(Arc::clone(&rules));
        Self {
            config,
            rules,
            matcher,
            deduper,
            table,
            stats: EngineStats::default(),
        }
    }

    pub fn flow_count(&self) -> usize {
        self.table.len()
    }

    /// Counter snapshot, with table-level eviction totals folded in.
    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats.clone();
        stats.flows_evicted = self.table.evictions();
        stats
    }

    /// Runs one segment through the full pipeline and returns the alerts
    /// it raised. Every alert is emitted at most once per flow and rule.
    pub fn process(&mut self, input: &SegmentInput) -> Vec<Alert> {
        let mut alerts = Vec::new();
        self.stats.segments += 1;

        let logical_len = if input.logical_len == 0 {
            input.payload.len() as u64
        } else {
            input.logical_len
        };

        let slot = match self.table.lookup(&input.key) {
            Some((slot, _)) => slot,
            None if input.payload.is_empty() && logical_len == 0 => {
                // Nothing to reassemble and no state to create.
                if input.terminal {
                    trace!("terminal for unknown flow {}", input.key);
                }
                return alerts;
            }
            None => {
                self.stats.flows_created += 1;
                let entry = FlowEntry::new(
                    &self.config,
                    self.rules.len(),
                    &self.matcher,
                    input.key.clone(),
                );
                self.table.create(entry)
            }
        };

        if let Some(entry) = self.table.entry_mut(slot) {
            entry.last_seen = Instant::now();
            let outcome = entry.seq.insert(
                input.offset,
                &input.payload,
                logical_len,
                true,
                input.window,
            );
            if outcome != InsertOutcome::Accepted {
                trace!("segment at {} on {}: {:?}", input.offset, input.key, outcome);
            }

            let FlowEntry {
                seq,
                matcher_state,
                active,
                alerted,
                ..
            } = entry;
            let matcher = &self.matcher;
            while let Some(run) = seq.assemble() {
                let bytes = run.as_ref();
                self.stats.bytes_assembled += bytes.len() as u64;
                matcher.feed(matcher_state, bytes, |rule| {
                    if !alerted.get(rule) {
                        active.set(rule);
                    }
                });
            }

            self.deduper.evaluate(active, alerted, &input.ctx, &mut alerts);
            self.stats.alerts += alerts.len() as u64;
        }

        if input.terminal && self.table.destroy(&input.key) {
            self.stats.flows_destroyed += 1;
        }
        alerts
    }

    /// Destroys flows idle past the configured timeout.
    pub fn sweep_idle(&mut self, now: Instant) -> usize {
        let timeout = Duration::from_secs(self.config.flow_timeout_secs);
        let swept = self.table.sweep_idle(now, timeout);
        if swept > 0 {
            debug!("swept {} idle flows, {} remain", swept, self.table.len());
            self.stats.flows_destroyed += swept as u64;
        }
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::HalfKey;
    use crate::rules::Predicate;
    use std::net::{IpAddr, Ipv4Addr};

    fn key(src_port: u16, dst_port: u16) -> FlowKey {
        FlowKey::new(
            HalfKey::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), src_port),
            HalfKey::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), dst_port),
        )
    }

    fn engine(rules: Vec<Rule>) -> Engine {
        Engine::new(EngineConfig::default(), rules).unwrap()
    }

    #[test]
    fn test_alert_once_per_flow() {
        let mut e = engine(vec![Rule::new(b"attack".to_vec(), "hit")]);
        let k = key(1234, 80);

        let alerts = e.process(&SegmentInput::new(k.clone(), 0, &b"..attack.."[..]));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "hit");

        // Same pattern again on the same flow stays silent.
        let alerts = e.process(&SegmentInput::new(k, 10, &b"attack"[..]));
        assert!(alerts.is_empty());
        assert_eq!(e.stats().alerts, 1);
    }

    #[test]
    fn test_pattern_across_out_of_order_segments() {
        let mut e = engine(vec![Rule::new(b"attack".to_vec(), "hit")]);
        let k = key(1234, 80);

        // Tail arrives first; nothing is scannable yet.
        let alerts = e.process(&SegmentInput::new(k.clone(), 3, &b"ack"[..]));
        assert!(alerts.is_empty());

        // Head completes the run and the split pattern fires.
        let alerts = e.process(&SegmentInput::new(k, 0, &b"att"[..]));
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_predicate_gates_alert() {
        let rule = Rule::new(b"GET".to_vec(), "http get")
            .with_predicates(vec![Predicate::DestPort(80)]);
        let mut e = engine(vec![rule]);

        let mut input = SegmentInput::new(key(5555, 8080), 0, &b"GET /"[..]);
        input.ctx.dst_port = 8080;
        assert!(e.process(&input).is_empty());

        let mut input = SegmentInput::new(key(5555, 80), 0, &b"GET /"[..]);
        input.ctx.dst_port = 80;
        assert_eq!(e.process(&input).len(), 1);
    }

    #[test]
    fn test_terminal_destroys_flow() {
        let mut e = engine(vec![Rule::new(b"x".to_vec(), "x")]);
        let k = key(1, 2);

        e.process(&SegmentInput::new(k.clone(), 0, &b"hello"[..]));
        assert_eq!(e.flow_count(), 1);

        let mut fin = SegmentInput::new(k.clone(), 5, Bytes::new());
        fin.terminal = true;
        e.process(&fin);
        assert_eq!(e.flow_count(), 0);
        assert_eq!(e.stats().flows_destroyed, 1);

        // A flow torn down and recreated alerts again from scratch.
        let alerts = e.process(&SegmentInput::new(k, 0, &b"x"[..]));
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_reverse_direction_shares_flow() {
        let mut e = engine(vec![Rule::new(b"attack".to_vec(), "hit")]);
        let k = key(1234, 80);

        e.process(&SegmentInput::new(k.clone(), 0, &b"att"[..]));
        assert_eq!(e.flow_count(), 1);

        // Reply-oriented key resolves to the same entry and stream.
        let alerts = e.process(&SegmentInput::new(k.reversed(), 3, &b"ack"[..]));
        assert_eq!(e.flow_count(), 1);
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_idle_sweep_counts() {
        let mut e = engine(vec![Rule::new(b"x".to_vec(), "x")]);
        e.process(&SegmentInput::new(key(1, 2), 0, &b"a"[..]));
        e.process(&SegmentInput::new(key(3, 4), 0, &b"b"[..]));

        let far_future = Instant::now() + Duration::from_secs(3600);
        assert_eq!(e.sweep_idle(far_future), 2);
        assert_eq!(e.flow_count(), 0);
    }
}
