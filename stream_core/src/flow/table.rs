use std::time::{Duration, Instant};

use fxhash::FxHashMap;
use log::{debug, trace};

use crate::alert::RuleBitmap;
use crate::config::EngineConfig;
use crate::matcher::{MatcherState, PatternMatcher};
use crate::reassembly::SeqBuffer;

use super::key::{Direction, FlowKey};

const NIL: u32 = u32::MAX;

/// All state owned by one flow: reassembly, matcher resume position and
/// the per-rule bitmaps. Destroyed whole on teardown or eviction.
#[derive(Debug)]
pub struct FlowEntry {
    /// Create-time orientation; lookups compare against it to recover
    /// the probe direction.
    pub key: FlowKey,
    pub seq: SeqBuffer,
    pub matcher_state: MatcherState,
    pub active: RuleBitmap,
    pub alerted: RuleBitmap,
    pub last_seen: Instant,
}

impl FlowEntry {
    pub fn new(
        config: &EngineConfig,
        rule_count: usize,
        matcher: &PatternMatcher,
        key: FlowKey,
    ) -> Self {
        Self {
            key,
            seq: SeqBuffer::new(config.buffer_capacity, config.max_ranges, true),
            matcher_state: matcher.initial_state(),
            active: RuleBitmap::new(rule_count),
            alerted: RuleBitmap::new(rule_count),
            last_seen: Instant::now(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    entry: Option<FlowEntry>,
    prev: u32,
    next: u32,
}

/// Bidirectional flow store: an arena of slots plus a canonical-key index.
///
/// `(A, B)` and `(B, A)` canonicalize to one index record, so create and
/// destroy are atomic for both orientations by construction. Recency is
/// an intrusive LRU list threaded through the arena with slot *indices*,
/// not pointers; the least recently touched flow is evicted when the
/// table is full.
#[derive(Debug)]
pub struct FlowTable {
    index: FxHashMap<FlowKey, u32>,
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: u32,
    tail: u32,
    max_flows: usize,
    evictions: u64,
}

impl FlowTable {
    pub fn new(max_flows: usize) -> Self {
        Self {
            index: FxHashMap::default(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            max_flows: max_flows.max(1),
            evictions: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// O(1) lookup under either orientation. Touches the LRU list.
    pub fn lookup(&mut self, key: &FlowKey) -> Option<(u32, Direction)> {
        let slot = *self.index.get(&key.canonical())?;
        self.touch(slot);
        let entry = self.slots[slot as usize].entry.as_ref()?;
        let direction = if entry.key == *key {
            Direction::Forward
        } else {
            Direction::Reverse
        };
        Some((slot, direction))
    }

    pub fn entry(&self, slot: u32) -> Option<&FlowEntry> {
        self.slots.get(slot as usize)?.entry.as_ref()
    }

    pub fn entry_mut(&mut self, slot: u32) -> Option<&mut FlowEntry> {
        self.slots.get_mut(slot as usize)?.entry.as_mut()
    }

    /// Installs a fresh entry, evicting the least recently used flow when
    /// the table is full.
    pub fn create(&mut self, entry: FlowEntry) -> u32 {
        if self.index.len() >= self.max_flows {
            self.evict_lru();
        }
        let canonical = entry.key.canonical();
        trace!("flow created: {}", entry.key);
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize].entry = Some(entry);
                slot
            }
            None => {
                self.slots.push(Slot {
                    entry: Some(entry),
                    prev: NIL,
                    next: NIL,
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.push_front(slot);
        self.index.insert(canonical, slot);
        slot
    }

    /// Removes the entry under either orientation, releasing all per-flow
    /// state. Both directional views disappear together.
    pub fn destroy(&mut self, key: &FlowKey) -> bool {
        let Some(slot) = self.index.remove(&key.canonical()) else {
            return false;
        };
        self.unlink(slot);
        self.slots[slot as usize].entry = None;
        self.free.push(slot);
        trace!("flow destroyed: {}", key);
        true
    }

    /// Full enumeration, for external consumers of flow state.
    pub fn iter(&self) -> impl Iterator<Item = &FlowEntry> {
        self.slots.iter().filter_map(|s| s.entry.as_ref())
    }

    /// Destroys every flow idle for at least `timeout`. Returns how many
    /// were evicted.
    pub fn sweep_idle(&mut self, now: Instant, timeout: Duration) -> usize {
        let stale: Vec<FlowKey> = self
            .iter()
            .filter(|e| now.duration_since(e.last_seen) >= timeout)
            .map(|e| e.key.clone())
            .collect();
        for key in &stale {
            self.destroy(key);
        }
        if !stale.is_empty() {
            debug!("idle sweep destroyed {} flows", stale.len());
        }
        stale.len()
    }

    fn evict_lru(&mut self) {
        if self.tail == NIL {
            return;
        }
        let slot = self.tail;
        if let Some(entry) = self.slots[slot as usize].entry.take() {
            debug!("flow table full, evicting {}", entry.key);
            self.index.remove(&entry.key.canonical());
        }
        self.unlink(slot);
        self.free.push(slot);
        self.evictions += 1;
    }

    fn touch(&mut self, slot: u32) {
        if self.head == slot {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn push_front(&mut self, slot: u32) {
        let s = &mut self.slots[slot as usize];
        s.prev = NIL;
        s.next = self.head;
        if self.head != NIL {
            self.slots[self.head as usize].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn unlink(&mut self, slot: u32) {
        let (prev, next) = {
            let s = &self.slots[slot as usize];
            (s.prev, s.next)
        };
        if prev != NIL {
            self.slots[prev as usize].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slots[next as usize].prev = prev;
        } else {
            self.tail = prev;
        }
        let s = &mut self.slots[slot as usize];
        s.prev = NIL;
        s.next = NIL;
    }
}
