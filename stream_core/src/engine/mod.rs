mod engine;
mod sharded;

pub use engine::{Engine, EngineStats, SegmentInput};
pub use sharded::ShardedEngine;
