pub mod alert;
pub mod config;
pub mod engine;
pub mod error;
pub mod flow;
pub mod matcher;
pub mod reassembly;
pub mod rules;

// Re-export commonly used types
pub use alert::{Alert, AlertDeduper, RuleBitmap};
pub use config::EngineConfig;
pub use engine::{Engine, EngineStats, SegmentInput, ShardedEngine};
pub use error::{Result, SetupError};
pub use flow::{Direction, FlowKey, FlowTable, HalfKey};
pub use matcher::{MatcherState, PatternMatcher};
pub use reassembly::{Assembled, InsertOutcome, SegmentRange, SeqBuffer, SeqStats};
pub use rules::{PacketContext, Predicate, Rule, RuleSet};
