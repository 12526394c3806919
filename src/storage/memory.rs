/// In-process rule store, used for tests and ephemeral runs
use super::{RuleStore, WriteContext};
use crate::error::{Result, SigError};
use crate::rules::{Rule, RowId, RuleUpdate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: Mutex<Vec<Rule>>,
    fail_writes: AtomicBool,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with rules, stored as given
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        let mut rules = rules;
        rules.sort_by_key(|r| r.id);
        Self {
            rules: Mutex::new(rules),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail with a persistence error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, id: RowId) -> Option<Rule> {
        self.lock().iter().find(|r| r.id == id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Rule>> {
        self.rules.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_write(&self, ctx: &WriteContext) -> Result<()> {
        ctx.check()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SigError::PersistenceError("store unavailable".to_string()));
        }
        Ok(())
    }
}

impl RuleStore for MemoryRuleStore {
    fn find_all(&self) -> Result<Vec<Rule>> {
        Ok(self.lock().clone())
    }

    fn insert(&self, ctx: &WriteContext, rule: &Rule) -> Result<RowId> {
        self.check_write(ctx)?;

        let mut rules = self.lock();
        match rules.binary_search_by_key(&rule.id, |r| r.id) {
            Ok(_) => Err(SigError::PersistenceError(format!(
                "rule {} already stored",
                rule.id
            ))),
            Err(position) => {
                rules.insert(position, rule.clone());
                debug!("Stored rule {} ({} total)", rule.id, rules.len());
                Ok(rule.id)
            }
        }
    }

    fn update(&self, ctx: &WriteContext, id: RowId, update: &RuleUpdate) -> Result<bool> {
        self.check_write(ctx)?;

        let mut rules = self.lock();
        match rules.iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                update.apply(rule);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
