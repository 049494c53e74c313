use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::rules::{PacketContext, RuleSet};

/// One-shot detection report for a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub rule_id: u32,
    pub message: String,
}

/// Fixed-size per-flow rule flags, one bit per rule, word-packed.
#[derive(Debug, Clone)]
pub struct RuleBitmap {
    words: Box<[u64]>,
}

impl RuleBitmap {
    pub fn new(rule_count: usize) -> Self {
        Self {
            words: vec![0u64; rule_count.div_ceil(64)].into_boxed_slice(),
        }
    }

    pub fn get(&self, index: usize) -> bool {
        self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    pub fn set(&mut self, index: usize) {
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    pub fn clear(&mut self, index: usize) {
        self.words[index / 64] &= !(1u64 << (index % 64));
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn word(&self, index: usize) -> u64 {
        self.words[index]
    }
}

/// Turns raw pattern hits into one-shot alerts.
///
/// The matcher callback only flips `active` bits; this is where the
/// auxiliary predicate chain runs, because only here is the full packet
/// context available. `alerted` bits are sticky for the flow's lifetime.
#[derive(Debug)]
pub struct AlertDeduper {
    rules: Arc<RuleSet>,
}

impl AlertDeduper {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    /// Evaluates every `active` rule against `ctx`. Rules whose predicate
    /// chain passes are emitted exactly once and moved to `alerted`;
    /// failing rules stay `active` and are retried on the next call.
    pub fn evaluate(
        &self,
        active: &mut RuleBitmap,
        alerted: &mut RuleBitmap,
        ctx: &PacketContext,
        out: &mut Vec<Alert>,
    ) {
        if !active.any() {
            return;
        }
        for word_index in 0..active.word_count() {
            let mut bits = active.word(word_index);
            while bits != 0 {
                let index = word_index * 64 + bits.trailing_zeros() as usize;
                bits &= bits - 1;
                let Some(rule) = self.rules.get(index) else {
                    // A hit past the table can only mean a stale bitmap.
                    active.clear(index);
                    continue;
                };
                if rule.predicates.iter().all(|p| p.matches(ctx)) {
                    debug!("rule {} fired: {}", index, rule.message);
                    out.push(Alert {
                        rule_id: index as u32,
                        message: rule.message.clone(),
                    });
                    active.clear(index);
                    alerted.set(index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Predicate, Rule};

    fn deduper(rules: Vec<Rule>) -> AlertDeduper {
        AlertDeduper::new(Arc::new(RuleSet::new(rules, 2048).unwrap()))
    }

    #[test]
    fn test_bitmap_set_get_clear() {
        let mut bm = RuleBitmap::new(130);
        assert!(!bm.any());
        bm.set(0);
        bm.set(64);
        bm.set(129);
        assert!(bm.get(0) && bm.get(64) && bm.get(129));
        assert!(!bm.get(1));
        bm.clear(64);
        assert!(!bm.get(64));
        assert!(bm.any());
    }

    #[test]
    fn test_predicate_failure_keeps_active() {
        let d = deduper(vec![Rule::new(b"GET".to_vec(), "http get")
            .with_predicates(vec![Predicate::DestPort(80)])]);
        let mut active = RuleBitmap::new(1);
        let mut alerted = RuleBitmap::new(1);
        active.set(0);

        let mut out = Vec::new();
        let ctx = PacketContext {
            dst_port: 8080,
            ..Default::default()
        };
        d.evaluate(&mut active, &mut alerted, &ctx, &mut out);
        assert!(out.is_empty());
        assert!(active.get(0));
        assert!(!alerted.get(0));

        // Retried with matching context, the rule fires once.
        let ctx = PacketContext {
            dst_port: 80,
            ..Default::default()
        };
        d.evaluate(&mut active, &mut alerted, &ctx, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rule_id, 0);
        assert!(!active.get(0));
        assert!(alerted.get(0));
    }

    #[test]
    fn test_no_predicates_fires_immediately() {
        let d = deduper(vec![Rule::new(b"X".to_vec(), "bare")]);
        let mut active = RuleBitmap::new(1);
        let mut alerted = RuleBitmap::new(1);
        active.set(0);

        let mut out = Vec::new();
        d.evaluate(&mut active, &mut alerted, &PacketContext::default(), &mut out);
        assert_eq!(out.len(), 1);
        assert!(alerted.get(0));
    }
}
