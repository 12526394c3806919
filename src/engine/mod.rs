// Matching engine - compilation, streaming scan and publication
pub mod matcher;
pub mod publisher;
pub mod stream;

pub use matcher::{MatchEngine, PatternMatch};
pub use publisher::{EngineSnapshot, PublishMode, UpdateDistributor};
pub use stream::{EngineStream, DEFAULT_STREAM_WINDOW};

use crate::rules::compiler::DEFAULT_PATTERN_SIZE_LIMIT;
use serde::{Deserialize, Serialize};

/// Engine build and publication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub publish_mode: PublishMode,
    /// Compiled program size limit of a single pattern, in bytes
    #[serde(default = "default_pattern_size_limit")]
    pub pattern_size_limit: usize,
    /// Compiled size limit of the multi-pattern regex set, in bytes
    #[serde(default = "default_set_size_limit")]
    pub set_size_limit: usize,
    /// Maximum number of distinct patterns (0 = unlimited)
    #[serde(default)]
    pub max_patterns: usize,
    /// Bytes of history kept per stream
    #[serde(default = "default_stream_window")]
    pub stream_window: usize,
}

fn default_pattern_size_limit() -> usize {
    DEFAULT_PATTERN_SIZE_LIMIT
}

fn default_set_size_limit() -> usize {
    256 * (1 << 20) // 256MB
}

fn default_stream_window() -> usize {
    DEFAULT_STREAM_WINDOW
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            publish_mode: PublishMode::default(),
            pattern_size_limit: default_pattern_size_limit(),
            set_size_limit: default_set_size_limit(),
            max_patterns: 0,
            stream_window: default_stream_window(),
        }
    }
}
