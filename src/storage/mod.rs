// Persistent rule store interface and implementations
pub mod file;
pub mod memory;

pub use file::FileRuleStore;
pub use memory::MemoryRuleStore;

use crate::error::{Result, SigError};
use crate::rules::{Rule, RowId, RuleUpdate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Durable record of the rule corpus
pub trait RuleStore: Send + Sync {
    /// All stored rules, ordered by id ascending
    fn find_all(&self) -> Result<Vec<Rule>>;

    /// Store a new rule
    fn insert(&self, ctx: &WriteContext, rule: &Rule) -> Result<RowId>;

    /// Apply a metadata update. Returns false if no rule has that id.
    fn update(&self, ctx: &WriteContext, id: RowId, update: &RuleUpdate) -> Result<bool>;
}

/// Deadline and cancellation signal for a store write
#[derive(Debug, Clone, Default)]
pub struct WriteContext {
    deadline: Option<Instant>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl WriteContext {
    /// No deadline, not cancellable
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Cancel the write once `flag` becomes true
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails if the deadline passed or the write was cancelled
    pub fn check(&self) -> Result<()> {
        if let Some(ref flag) = self.cancelled {
            if flag.load(Ordering::Relaxed) {
                return Err(SigError::PersistenceError("write cancelled".to_string()));
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(SigError::PersistenceError("write deadline exceeded".to_string()));
            }
        }
        Ok(())
    }
}
