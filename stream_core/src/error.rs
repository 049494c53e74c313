use std::result::Result as StdResult;
use thiserror::Error;

/// Errors raised while building the immutable rule table and matcher.
///
/// Nothing triggered by network data goes through here: adversarial or
/// stale segments are dropped and counted, never surfaced as errors.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("rule count {count} exceeds configured maximum {max}")]
    TooManyRules { count: usize, max: usize },

    #[error("rule {index} has an empty pattern")]
    EmptyPattern { index: usize },

    #[error("pattern compilation failed: {0}")]
    PatternCompile(String),

    #[error("invalid rule definition: {0}")]
    RuleParse(#[from] serde_json::Error),
}

pub type Result<T> = StdResult<T, SetupError>;
