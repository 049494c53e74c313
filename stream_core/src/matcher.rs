use aho_corasick::automaton::{Automaton, StateID};
use aho_corasick::dfa::DFA;
use aho_corasick::{Anchored, MatchKind};
use log::{debug, trace};

use crate::error::{Result, SetupError};
use crate::rules::RuleSet;

/// Opaque per-flow resume position inside the pattern automaton.
///
/// Cheap to copy; one lives in every flow entry so patterns split across
/// segment boundaries still match when the next run is fed.
#[derive(Debug, Clone, Copy)]
pub struct MatcherState(StateID);

/// Adapter over a multi-pattern automaton compiled once, at setup, from
/// the immutable rule pattern set.
///
/// `feed` steps the automaton byte by byte instead of using the one-shot
/// search API, because a flow's scan must resume mid-pattern on the next
/// assembled run.
#[derive(Debug)]
pub struct PatternMatcher {
    dfa: DFA,
    start: StateID,
}

impl PatternMatcher {
    pub fn new(rules: &RuleSet) -> Result<Self> {
        let dfa = DFA::builder()
            .match_kind(MatchKind::Standard)
            .build(rules.patterns())
            .map_err(|e| SetupError::PatternCompile(e.to_string()))?;
        let start = dfa
            .start_state(Anchored::No)
            .map_err(|e| SetupError::PatternCompile(e.to_string()))?;
        debug!("pattern automaton compiled: {} patterns", rules.len());
        Ok(Self { dfa, start })
    }

    /// Automaton position for a freshly created flow.
    pub fn initial_state(&self) -> MatcherState {
        MatcherState(self.start)
    }

    /// Resumes the scan from `state` over `bytes`, invoking `on_match`
    /// with the rule index for every pattern whose end falls inside
    /// `bytes`. The updated position is written back into `state`.
    pub fn feed<F>(&self, state: &mut MatcherState, bytes: &[u8], mut on_match: F)
    where
        F: FnMut(usize),
    {
        let mut sid = state.0;
        for &byte in bytes {
            sid = self.dfa.next_state(Anchored::No, sid, byte);
            if self.dfa.is_match(sid) {
                for i in 0..self.dfa.match_len(sid) {
                    let pattern = self.dfa.match_pattern(sid, i).as_usize();
                    trace!("pattern {} matched", pattern);
                    on_match(pattern);
                }
            }
        }
        state.0 = sid;
    }
}
