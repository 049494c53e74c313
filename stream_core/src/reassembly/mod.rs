pub mod seq;

pub use seq::{Assembled, InsertOutcome, SegmentRange, SeqBuffer, SeqStats};
