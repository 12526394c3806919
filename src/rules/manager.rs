/// Rule manager - the single entry point for rule mutation and engine updates
use super::annotate::{annotate, Connection, DirectionalMatches};
use super::registry::{Admission, RuleRegistry};
use super::row_id::{RowId, RowIdGenerator};
use super::rule::{Direction, Pattern, Rule, RuleDraft, RuleUpdate};
use crate::engine::{EngineConfig, EngineSnapshot, MatchEngine, UpdateDistributor};
use crate::error::{Result, SigError};
use crate::storage::{RuleStore, WriteContext};
use crossbeam::channel::Receiver;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

pub const FLAG_RULE_NAME: &str = "flag";
pub const FLAG_RULE_COLOR: &str = "#ff0000";
const FLAG_RULE_NOTES: &str = "Mark connections where the flag is stolen";

/// Snapshot of manager counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub rules: usize,
    pub enabled_rules: usize,
    /// Distinct patterns in the corpus
    pub patterns: usize,
    /// Version of the latest published engine
    pub engine_version: Option<RowId>,
}

struct ManagerState {
    registry: RuleRegistry,
    ids: RowIdGenerator,
}

/// Owns the rule corpus. Every mutation, engine build and publish happens
/// under one lock; store writes happen after it is released.
pub struct RuleManager {
    state: Mutex<ManagerState>,
    distributor: UpdateDistributor,
    store: Arc<dyn RuleStore>,
    config: EngineConfig,
}

impl RuleManager {
    pub fn new(store: Arc<dyn RuleStore>, config: EngineConfig) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                registry: RuleRegistry::with_pattern_size_limit(config.pattern_size_limit),
                ids: RowIdGenerator::new(),
            }),
            distributor: UpdateDistributor::new(config.publish_mode),
            store,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        // State is only written after every fallible step succeeded
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register every stored rule and publish one engine for the result.
    /// Invalid rules are skipped. Fails only if the store cannot be read or
    /// the engine cannot be built, in which case nothing is registered.
    pub fn load_rules(&self) -> Result<()> {
        let stored = self.store.find_all()?;
        let total = stored.len();

        let mut state = self.lock();
        let backup = state.registry.clone();
        let mut last_valid = None;
        let mut skipped = 0;

        for rule in stored {
            state.ids.observe(rule.id);
            let (id, name) = (rule.id, rule.name.clone());
            match state.registry.validate_and_register(rule) {
                Ok(id) => last_valid = Some(id),
                Err(e) => {
                    skipped += 1;
                    warn!("Skipping stored rule {} {:?}: {}", id, name, e);
                }
            }
        }

        let Some(version) = last_valid else {
            info!("Loaded 0 rules ({} skipped)", skipped);
            return Ok(());
        };

        let engine = match MatchEngine::build(state.registry.patterns().iter(), &self.config) {
            Ok(engine) => engine,
            Err(e) => {
                error!("Failed to build engine for stored rules: {}", e);
                state.registry = backup;
                return Err(e);
            }
        };

        self.publish(engine, version)?;
        info!(
            "Loaded {} of {} rules ({} skipped), {} distinct patterns",
            total - skipped,
            total,
            skipped,
            state.registry.pattern_count()
        );
        Ok(())
    }

    /// Validate and register a new rule, publish the rebuilt engine, then
    /// persist the rule. Returns the id assigned to the rule.
    pub fn add_rule(&self, ctx: &WriteContext, draft: RuleDraft) -> Result<RowId> {
        let rule = {
            let mut state = self.lock();
            let id = state.ids.next_id();
            let admission = state.registry.prepare(draft.into_rule(id))?;
            let engine = Self::build_engine(&state.registry, &admission, &self.config)?;

            let rule = admission.rule().clone();
            state.registry.commit(admission)?;
            self.publish(engine, id)?;
            rule
        };

        if let Err(e) = self.store.insert(ctx, &rule) {
            warn!("Failed to persist rule {} {:?}: {}", rule.id, rule.name, e);
            self.lock().registry.remove(rule.id);
            return Err(e);
        }

        info!("Added rule {}", rule);
        Ok(rule.id)
    }

    pub fn get_rule(&self, id: RowId) -> Option<Rule> {
        self.lock().registry.get(id).cloned()
    }

    pub fn get_rule_by_name(&self, name: &str) -> Option<Rule> {
        self.lock().registry.get_by_name(name).cloned()
    }

    /// Change the name and color of a rule. Returns false if the id is
    /// unknown. Patterns are untouched and no engine is published.
    pub fn update_rule(&self, ctx: &WriteContext, id: RowId, name: &str, color: &str) -> Result<bool> {
        let previous = match self.lock().registry.update(id, name, color)? {
            Some(previous) => previous,
            None => return Ok(false),
        };

        let update = RuleUpdate {
            name: name.to_string(),
            color: color.to_string(),
            version: previous.version + 1,
        };

        let result = match self.store.update(ctx, id, &update) {
            Ok(true) => Ok(true),
            Ok(false) => Err(SigError::PersistenceError(format!(
                "rule {} is not in the store",
                id
            ))),
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            warn!("Failed to persist update of rule {}: {}", id, e);
            if !self.lock().registry.revert_update(&previous) {
                warn!("Rule {} changed concurrently, not reverting", id);
            }
        } else {
            debug!("Updated rule {}: name {:?}, color {}", id, name, color);
        }

        result
    }

    /// All rules, in no particular order
    pub fn list_rules(&self) -> Vec<Rule> {
        self.lock().registry.list()
    }

    /// Add the rule marking connections where the given flag regex appears in
    /// server responses
    pub fn set_flag_rule(&self, ctx: &WriteContext, regex: &str) -> Result<RowId> {
        let draft = RuleDraft::new(FLAG_RULE_NAME, FLAG_RULE_COLOR)
            .with_notes(FLAG_RULE_NOTES)
            .with_pattern(Pattern::new(regex).with_direction(Direction::ToClient));
        self.add_rule(ctx, draft)
    }

    /// Receiver of published engines
    pub fn subscribe_engine_updates(&self) -> Receiver<EngineSnapshot> {
        self.distributor.subscribe()
    }

    /// Latest published engine, if any
    pub fn current_engine(&self) -> Option<EngineSnapshot> {
        self.distributor.current()
    }

    /// Ids of the rules triggered by a connection and its pattern matches
    pub fn annotate_matches(&self, connection: &Connection, matches: &DirectionalMatches) -> BTreeSet<RowId> {
        let state = self.lock();
        annotate(state.registry.rules(), connection, matches)
    }

    pub fn stats(&self) -> ManagerStats {
        let state = self.lock();
        ManagerStats {
            rules: state.registry.len(),
            enabled_rules: state.registry.rules().filter(|r| r.enabled).count(),
            patterns: state.registry.pattern_count(),
            engine_version: self.distributor.current().map(|s| s.version),
        }
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.config
    }

    fn build_engine(registry: &RuleRegistry, admission: &Admission, config: &EngineConfig) -> Result<MatchEngine> {
        let patterns = registry.patterns().iter().chain(admission.new_patterns());
        MatchEngine::build(patterns, config).map_err(|e| {
            warn!("Refusing rule {:?}: {}", admission.rule().name, e);
            e
        })
    }

    fn publish(&self, engine: MatchEngine, version: RowId) -> Result<()> {
        let pattern_count = engine.pattern_count();
        self.distributor.publish(EngineSnapshot {
            engine: Arc::new(engine),
            pattern_count,
            version,
        })
    }
}
