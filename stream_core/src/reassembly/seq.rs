use log::trace;

/// Half-open span of byte offsets in one flow's monotonic offset space.
///
/// Resident ranges are disjoint, sorted by `left`, and never touch:
/// adjacent or overlapping inserts are merged immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    pub left: u64,
    pub right: u64,
}

impl SegmentRange {
    pub fn len(&self) -> usize {
        (self.right - self.left) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left
    }
}

/// Declared-but-not-resident span beyond the contiguous run.
///
/// A marker established by a short-data insert names bytes that are still
/// missing (`resolved == false`); one established by an explicit zero-byte
/// announcement is a skip/end marker the run may close against.
#[derive(Debug, Clone, Copy)]
struct TrailingMarker {
    span: SegmentRange,
    resolved: bool,
}

/// How an insert was treated. Everything except `Accepted` is a silent,
/// counted drop; none of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Accepted,
    /// Offset below `base`: bytes already delivered.
    Stale,
    /// Data starting at or after the trailing marker's left edge.
    BeyondTrailer,
    /// Fully clipped away by the window or the buffer capacity.
    Clipped,
}

/// Drop/trim counters for one flow's reassembly.
#[derive(Debug, Clone, Default)]
pub struct SeqStats {
    pub accepted: u64,
    pub bytes_assembled: u64,
    pub stale_drops: u64,
    pub window_drops: u64,
    pub capacity_drops: u64,
    pub overlap_retrans: u64,
}

/// An assembled contiguous run.
///
/// The common path borrows straight out of the resident buffer; the
/// borrowed bytes stay valid until the next `insert` on the same flow.
/// The owned variant replaces the reference design's nullable
/// "caller must free" out-parameter.
#[derive(Debug)]
pub enum Assembled<'a> {
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl AsRef<[u8]> for Assembled<'_> {
    fn as_ref(&self) -> &[u8] {
        match self {
            Assembled::Borrowed(b) => b,
            Assembled::Owned(v) => v.as_slice(),
        }
    }
}

/// Per-flow bounded reassembler: rebuilds a contiguous byte stream from
/// out-of-order, overlapping or partially captured segments.
///
/// `base` is the next offset to deliver and never decreases. Resident
/// bytes live in a capacity-bounded buffer indexed by `offset - base`.
#[derive(Debug)]
pub struct SeqBuffer {
    base: u64,
    pending_base: bool,
    capacity: usize,
    max_ranges: usize,
    ranges: Vec<SegmentRange>,
    trailer: Option<TrailingMarker>,
    buffer: Option<Vec<u8>>,
    stats: SeqStats,
}

impl SeqBuffer {
    /// `zero_based` pins `base` to 0 up front (TCP-style relative offsets);
    /// otherwise the first insert's offset becomes the stream head.
    pub fn new(capacity: usize, max_ranges: usize, zero_based: bool) -> Self {
        Self {
            base: 0,
            pending_base: !zero_based,
            capacity,
            max_ranges,
            ranges: Vec::new(),
            trailer: None,
            buffer: None,
            stats: SeqStats::default(),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn resident_bytes(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }

    pub fn stats(&self) -> &SeqStats {
        &self.stats
    }

    /// Inserts one segment.
    ///
    /// `logical_len >= data.len()`; the difference announces a trailing
    /// gap of bytes not captured. `window` (both zero = unbounded) clips
    /// retained memory on both sides. Reversed window bounds are a caller
    /// bug and fail fast; every condition reachable from network data is
    /// a counted drop instead.
    pub fn insert(
        &mut self,
        offset: u64,
        data: &[u8],
        logical_len: u64,
        store_bytes: bool,
        window: (u64, u64),
    ) -> InsertOutcome {
        assert!(
            logical_len >= data.len() as u64,
            "logical length shorter than payload"
        );
        if self.pending_base {
            self.base = offset;
            self.pending_base = false;
        }

        let mut offset = offset;
        let mut data = data;
        let mut logical_len = logical_len;

        let (window_left, window_right) = window;
        if window_left != 0 || window_right != 0 {
            assert!(window_left <= window_right, "reversed window bounds");
            let left = window_left.max(self.base);
            let right = window_right.min(self.base.saturating_add(self.capacity as u64));
            self.clip_resident(left, right);
            if offset >= right || offset.saturating_add(logical_len) < left {
                self.stats.window_drops += 1;
                return InsertOutcome::Clipped;
            }
            if offset < left {
                let cut = left - offset;
                data = if (cut as usize) < data.len() {
                    &data[cut as usize..]
                } else {
                    &[]
                };
                logical_len -= cut;
                offset = left;
            }
            if offset + logical_len > right {
                logical_len = right - offset;
                if offset + data.len() as u64 > right {
                    data = &data[..(right - offset) as usize];
                }
            }
        }

        if logical_len == 0 {
            return InsertOutcome::Accepted;
        }
        if data.is_empty() {
            return self.insert_announcement(SegmentRange {
                left: offset,
                right: offset + logical_len,
            });
        }

        if offset < self.base {
            trace!("hard out of order: {} < base {}", offset, self.base);
            self.stats.stale_drops += 1;
            return InsertOutcome::Stale;
        }
        if let Some(trailer) = self.trailer {
            if offset >= trailer.span.left {
                trace!(
                    "hard out of window: {} >= trailer left {}",
                    offset,
                    trailer.span.left
                );
                self.stats.window_drops += 1;
                return InsertOutcome::BeyondTrailer;
            }
            // Straddling data is trimmed so it never crosses the marker.
            if offset + logical_len > trailer.span.left {
                logical_len = trailer.span.left - offset;
                if offset + data.len() as u64 > trailer.span.left {
                    data = &data[..(trailer.span.left - offset) as usize];
                }
            }
        }

        // Capacity clip: resident bytes always fit [base, base + capacity).
        let hard_right = self.base.saturating_add(self.capacity as u64);
        if offset >= hard_right {
            self.stats.capacity_drops += 1;
            return InsertOutcome::Clipped;
        }
        if offset + logical_len > hard_right {
            logical_len = hard_right - offset;
            if offset + data.len() as u64 > hard_right {
                data = &data[..(hard_right - offset) as usize];
            }
            self.stats.capacity_drops += 1;
            if data.is_empty() {
                return InsertOutcome::Clipped;
            }
        }

        let new = SegmentRange {
            left: offset,
            right: offset + data.len() as u64,
        };

        // Pre-merge coverage drives the earliest-arrival-wins copy below.
        let covered: Vec<SegmentRange> = self
            .ranges
            .iter()
            .filter(|r| r.right > new.left && r.left < new.right)
            .map(|r| SegmentRange {
                left: r.left.max(new.left),
                right: r.right.min(new.right),
            })
            .collect();
        if !covered.is_empty() {
            self.stats.overlap_retrans += 1;
        }

        let pos = self.ranges.partition_point(|r| r.left < offset);
        let mut index = pos;
        if pos > 0 && offset <= self.ranges[pos - 1].right {
            // Overlap or retransmission: extend the predecessor.
            if new.right > self.ranges[pos - 1].right {
                self.ranges[pos - 1].right = new.right;
            }
            index = pos - 1;
        } else {
            if self.ranges.len() >= self.max_ranges {
                if pos >= self.ranges.len() {
                    // The incoming range would be the tail; drop it.
                    self.stats.capacity_drops += 1;
                    return InsertOutcome::Clipped;
                }
                self.ranges.pop();
                self.stats.capacity_drops += 1;
            }
            self.ranges.insert(pos, new);
        }
        // Cascade-merge forward over every range the new span now reaches.
        while index + 1 < self.ranges.len()
            && self.ranges[index].right >= self.ranges[index + 1].left
        {
            let next = self.ranges.remove(index + 1);
            if next.right > self.ranges[index].right {
                self.ranges[index].right = next.right;
            }
        }

        if (data.len() as u64) < logical_len {
            self.declare_gap(SegmentRange {
                left: offset + data.len() as u64,
                right: offset + logical_len,
            });
        }

        if store_bytes {
            self.store(new, data, &covered);
        }
        self.stats.accepted += 1;
        InsertOutcome::Accepted
    }

    /// True iff the head of the stream is deliverable: the earliest range
    /// starts at `base` and any trailing marker is a resolved skip whose
    /// left edge the contiguous run exactly meets.
    pub fn ready(&self) -> bool {
        if let Some(first) = self.ranges.first() {
            if first.left != self.base {
                return false;
            }
        }
        match self.trailer {
            None => true,
            Some(t) if !t.resolved => false,
            Some(t) => match self.ranges.first() {
                None => self.base >= t.span.left,
                Some(first) => first.right == t.span.left,
            },
        }
    }

    /// Delivers the contiguous run starting at `base`, or `None` when not
    /// ready or nothing is resident. Single range: zero-copy borrow valid
    /// until the next insert. Multiple ranges (defensive): owned copy,
    /// remaining resident bytes are shifted to keep `offset - base`
    /// indexing intact. Either way the range is consumed and `base`
    /// advances, so each byte is emitted exactly once.
    pub fn assemble(&mut self) -> Option<Assembled<'_>> {
        if !self.ready() {
            return None;
        }
        let first = *self.ranges.first()?;
        let len = first.len();
        self.ranges.remove(0);
        self.stats.bytes_assembled += len as u64;

        if self.ranges.is_empty() {
            self.base = first.right;
            trace!("assembled {} bytes (borrowed)", len);
            return match self.buffer.as_deref() {
                Some(buf) => Some(Assembled::Borrowed(&buf[..len])),
                // Metadata-only flow: the run is consumed but carries no bytes.
                None => Some(Assembled::Owned(Vec::new())),
            };
        }

        let out = match self.buffer.as_ref() {
            Some(buf) => buf[..len].to_vec(),
            None => Vec::new(),
        };
        self.advance_base(first.right);
        trace!("assembled {} bytes (owned)", len);
        Some(Assembled::Owned(out))
    }

    /// Zero-byte announcement: extend the trailer, skip a prefix, or start
    /// a fresh (resolved) skip marker.
    fn insert_announcement(&mut self, span: SegmentRange) -> InsertOutcome {
        if span.right <= self.base {
            self.stats.stale_drops += 1;
            return InsertOutcome::Stale;
        }
        let span = SegmentRange {
            left: span.left.max(self.base),
            right: span.right,
        };

        if let Some(trailer) = self.trailer.as_mut() {
            if span.left == trailer.span.right {
                trailer.span.right = span.right;
                self.stats.accepted += 1;
                return InsertOutcome::Accepted;
            }
        }

        let precedes_all = match self.ranges.first() {
            None => true,
            Some(first) => span.right <= first.left,
        };
        if precedes_all && span.left == self.base && self.trailer.is_none() {
            trace!("prefix skip: base {} -> {}", self.base, span.right);
            self.advance_base(span.right);
            self.stats.accepted += 1;
            return InsertOutcome::Accepted;
        }

        // Anything else becomes the single tracked marker, now a resolved
        // skip the run may close against. It must sit past resident data.
        if let Some(last) = self.ranges.last() {
            if span.left < last.right {
                self.stats.window_drops += 1;
                return InsertOutcome::BeyondTrailer;
            }
        }
        self.trailer = Some(TrailingMarker {
            span,
            resolved: true,
        });
        self.stats.accepted += 1;
        InsertOutcome::Accepted
    }

    /// Short-data insert declared more bytes than it carried: track the
    /// missing span as an unresolved gap.
    fn declare_gap(&mut self, gap: SegmentRange) {
        match self.trailer.as_mut() {
            None => {
                self.trailer = Some(TrailingMarker {
                    span: gap,
                    resolved: false,
                });
            }
            Some(t) if gap.right >= t.span.left && gap.left <= t.span.right => {
                t.span.left = t.span.left.min(gap.left);
                t.span.right = t.span.right.max(gap.right);
                t.resolved = false;
            }
            // A second disjoint gap: only one marker is tracked.
            Some(_) => {}
        }
    }

    /// Copies accepted bytes into the resident buffer at `offset - base`,
    /// skipping sub-spans already resident so the earliest arrival wins.
    fn store(&mut self, span: SegmentRange, data: &[u8], covered: &[SegmentRange]) {
        let base = self.base;
        let buf = self
            .buffer
            .get_or_insert_with(|| vec![0u8; self.capacity]);
        let mut cursor = span.left;
        let mut copy = |piece: SegmentRange| {
            if piece.is_empty() {
                return;
            }
            let dst = (piece.left - base) as usize;
            let src = (piece.left - span.left) as usize;
            buf[dst..dst + piece.len()].copy_from_slice(&data[src..src + piece.len()]);
        };
        for c in covered {
            copy(SegmentRange {
                left: cursor,
                right: c.left.max(cursor),
            });
            cursor = cursor.max(c.right);
        }
        copy(SegmentRange {
            left: cursor,
            right: span.right.max(cursor),
        });
    }

    /// Trims resident ranges to `[left, right)` and advances `base` when
    /// the window has moved past it.
    fn clip_resident(&mut self, left: u64, right: u64) {
        while let Some(first) = self.ranges.first() {
            if first.right <= left {
                self.ranges.remove(0);
            } else {
                break;
            }
        }
        if let Some(first) = self.ranges.first_mut() {
            if first.left < left {
                first.left = left;
            }
        }
        let mut keep = self.ranges.len();
        for (i, r) in self.ranges.iter_mut().enumerate() {
            if r.right > right {
                if r.left >= right {
                    keep = i;
                } else {
                    r.right = right;
                    keep = i + 1;
                }
                break;
            }
        }
        self.ranges.truncate(keep);
        if self.base < left {
            self.advance_base(left);
        }
    }

    /// Moves `base` forward, shifting resident bytes so buffer positions
    /// stay `offset - base`. All ranges must already sit at/after the new
    /// base.
    fn advance_base(&mut self, new_base: u64) {
        if new_base <= self.base {
            return;
        }
        let shift = (new_base - self.base) as usize;
        let old_base = self.base;
        if let Some(buf) = self.buffer.as_mut() {
            for r in &self.ranges {
                let src = (r.left - old_base) as usize;
                buf.copy_within(src..src + r.len(), src - shift);
            }
        }
        self.base = new_base;
    }
}
