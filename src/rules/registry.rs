/// Authoritative rule corpus: id index, name index and pattern registry
use super::compiler::{compile_pattern_with_limit, CompiledPattern, DEFAULT_PATTERN_SIZE_LIMIT};
use super::patterns::PatternRegistry;
use super::row_id::RowId;
use super::rule::{validate_color, validate_name, Rule};
use crate::error::{Result, SigError};
use ahash::{AHashMap, AHashSet};
use tracing::debug;

/// A validated rule whose patterns have been compiled and resolved, ready to
/// be committed. Produced by [`RuleRegistry::prepare`].
#[derive(Debug, Clone)]
pub struct Admission {
    rule: Rule,
    /// Patterns not yet known to the registry, in the order they will be
    /// assigned ids starting at `base_id`
    staged: Vec<CompiledPattern>,
    base_id: usize,
}

impl Admission {
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Patterns this admission adds to the corpus
    pub fn new_patterns(&self) -> &[CompiledPattern] {
        &self.staged
    }
}

/// Rule and pattern state. Not synchronized; the owner provides locking.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: AHashMap<RowId, Rule>,
    by_name: AHashMap<String, RowId>,
    patterns: PatternRegistry,
    pattern_size_limit: usize,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::with_pattern_size_limit(DEFAULT_PATTERN_SIZE_LIMIT)
    }

    pub fn with_pattern_size_limit(pattern_size_limit: usize) -> Self {
        Self {
            rules: AHashMap::new(),
            by_name: AHashMap::new(),
            patterns: PatternRegistry::new(),
            pattern_size_limit,
        }
    }

    /// Validate a rule and compile its patterns without touching the
    /// registry. Fails on the first problem, in pattern submission order.
    pub fn prepare(&self, mut rule: Rule) -> Result<Admission> {
        if self.by_name.contains_key(&rule.name) {
            return Err(SigError::DuplicateNameError(rule.name));
        }
        if self.rules.contains_key(&rule.id) {
            return Err(SigError::ValidationError(format!(
                "rule id {} is already registered",
                rule.id
            )));
        }

        rule.validate_metadata()?;

        let base_id = self.patterns.next_id();
        let mut staged: Vec<CompiledPattern> = Vec::new();
        let mut seen = AHashSet::new();

        for pattern in rule.patterns.iter_mut() {
            let compiled = compile_pattern_with_limit(pattern, self.pattern_size_limit)?;

            if !seen.insert(compiled.canonical().to_string()) {
                return Err(SigError::DuplicatePatternError(compiled.canonical().to_string()));
            }

            let id = match self.patterns.lookup(compiled.canonical()) {
                Some(existing) => existing,
                None => {
                    staged.push(compiled);
                    base_id + staged.len() - 1
                }
            };
            pattern.internal_id = Some(id);
        }

        Ok(Admission {
            rule,
            staged,
            base_id,
        })
    }

    /// Register the staged patterns and insert the rule into both indices.
    ///
    /// Fails without touching the registry if the admission no longer fits:
    /// patterns were registered, or the name or id was taken, since it was
    /// prepared.
    pub fn commit(&mut self, admission: Admission) -> Result<RowId> {
        let Admission {
            rule,
            staged,
            base_id,
        } = admission;

        if base_id != self.patterns.next_id() {
            return Err(SigError::ValidationError(format!(
                "rule {} was prepared against an older pattern corpus",
                rule.id
            )));
        }
        if self.by_name.contains_key(&rule.name) {
            return Err(SigError::DuplicateNameError(rule.name));
        }
        if self.rules.contains_key(&rule.id) {
            return Err(SigError::ValidationError(format!(
                "rule id {} is already registered",
                rule.id
            )));
        }

        // staged ids were reserved from base_id onwards
        for pattern in staged {
            self.patterns.register(pattern);
        }

        let id = rule.id;
        debug!(
            "Registered rule {} {:?} ({} distinct patterns in corpus)",
            id,
            rule.name,
            self.patterns.len()
        );
        self.by_name.insert(rule.name.clone(), id);
        self.rules.insert(id, rule);
        Ok(id)
    }

    /// Prepare and commit in one step
    pub fn validate_and_register(&mut self, rule: Rule) -> Result<RowId> {
        let admission = self.prepare(rule)?;
        self.commit(admission)
    }

    /// Change name and color of a rule. Returns the rule as it was before the
    /// update, or `None` if the id is unknown.
    pub fn update(&mut self, id: RowId, name: &str, color: &str) -> Result<Option<Rule>> {
        let Some(current) = self.rules.get(&id) else {
            return Ok(None);
        };

        if let Some(&owner) = self.by_name.get(name) {
            if owner != id {
                return Err(SigError::DuplicateNameError(name.to_string()));
            }
        }

        validate_name(name)?;
        validate_color(color)?;

        let previous = current.clone();
        let mut updated = previous.clone();
        updated.name = name.to_string();
        updated.color = color.to_string();
        updated.version += 1;

        self.replace(updated);
        Ok(Some(previous))
    }

    /// Undo an [`update`](Self::update), unless the rule changed again since
    pub fn revert_update(&mut self, previous: &Rule) -> bool {
        match self.rules.get(&previous.id) {
            Some(current) if current.version == previous.version + 1 => {
                self.replace(previous.clone());
                true
            }
            _ => false,
        }
    }

    fn replace(&mut self, rule: Rule) {
        if let Some(old) = self.rules.get(&rule.id) {
            if self.by_name.get(&old.name) == Some(&rule.id) {
                self.by_name.remove(&old.name);
            }
        }
        self.by_name.insert(rule.name.clone(), rule.id);
        self.rules.insert(rule.id, rule);
    }

    /// Drop a rule from both indices. Its patterns stay registered.
    pub(crate) fn remove(&mut self, id: RowId) -> Option<Rule> {
        let rule = self.rules.remove(&id)?;
        if self.by_name.get(&rule.name) == Some(&id) {
            self.by_name.remove(&rule.name);
        }
        Some(rule)
    }

    pub fn get(&self, id: RowId) -> Option<&Rule> {
        self.rules.get(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Rule> {
        self.by_name.get(name).and_then(|id| self.rules.get(id))
    }

    /// All rules, in no particular order
    pub fn list(&self) -> Vec<Rule> {
        self.rules.values().cloned().collect()
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn patterns(&self) -> &PatternRegistry {
        &self.patterns
    }

    /// Number of distinct patterns in the corpus
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check that both indices agree with each other
    pub fn is_consistent(&self) -> bool {
        self.by_name.len() == self.rules.len()
            && self
                .by_name
                .iter()
                .all(|(name, id)| self.rules.get(id).map(|r| &r.name) == Some(name))
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::rule::{Pattern, RegexFlags, RuleDraft};

    fn rule(seq: u64, name: &str, patterns: Vec<Pattern>) -> Rule {
        let mut draft = RuleDraft::new(name, "#ff0000");
        draft.patterns = patterns;
        draft.into_rule(RowId::new(1, seq))
    }

    fn caseless() -> RegexFlags {
        RegexFlags {
            caseless: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_register_rule() {
        let mut registry = RuleRegistry::new();
        let id = registry
            .validate_and_register(rule(1, "http", vec![Pattern::new("GET"), Pattern::new("POST")]))
            .unwrap();

        let stored = registry.get(id).unwrap();
        assert_eq!(stored.pattern_ids(), vec![0, 1]);
        assert_eq!(registry.pattern_count(), 2);
        assert_eq!(registry.get_by_name("http").unwrap().id, id);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_duplicate_name() {
        let mut registry = RuleRegistry::new();
        registry
            .validate_and_register(rule(1, "same", vec![Pattern::new("a")]))
            .unwrap();
        let err = registry
            .validate_and_register(rule(2, "same", vec![Pattern::new("b")]))
            .unwrap_err();
        assert!(matches!(err, SigError::DuplicateNameError(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pattern_count(), 1);
    }

    #[test]
    fn test_pattern_sharing_across_rules() {
        let mut registry = RuleRegistry::new();
        let r1 = registry
            .validate_and_register(rule(1, "first", vec![Pattern::new("abc").with_flags(caseless())]))
            .unwrap();
        let r2 = registry
            .validate_and_register(rule(
                2,
                "second",
                vec![
                    Pattern::new("xyz"),
                    Pattern::new("abc").with_flags(caseless()),
                ],
            ))
            .unwrap();

        let shared_1 = registry.get(r1).unwrap().patterns[0].internal_id();
        let shared_2 = registry.get(r2).unwrap().patterns[1].internal_id();
        assert_eq!(shared_1, shared_2);
        assert_eq!(registry.get(r2).unwrap().patterns[0].internal_id(), Some(1));
        assert_eq!(registry.pattern_count(), 2);
    }

    #[test]
    fn test_intra_rule_duplicate_rejected_without_side_effects() {
        let mut registry = RuleRegistry::new();
        let err = registry
            .validate_and_register(rule(
                1,
                "dupes",
                vec![
                    Pattern::new("new-one"),
                    Pattern::new("abc"),
                    Pattern::new("abc"),
                ],
            ))
            .unwrap_err();

        assert!(matches!(err, SigError::DuplicatePatternError(_)));
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.pattern_count(), 0);
        assert!(registry.patterns().lookup("/new-one/").is_none());
    }

    #[test]
    fn test_same_regex_different_direction_is_duplicate() {
        let registry = RuleRegistry::new();
        let err = registry
            .prepare(rule(
                1,
                "directions",
                vec![
                    Pattern::new("abc"),
                    Pattern::new("abc").with_direction(crate::rules::Direction::ToClient),
                ],
            ))
            .unwrap_err();
        assert!(matches!(err, SigError::DuplicatePatternError(_)));
    }

    #[test]
    fn test_invalid_pattern_leaves_registry_unchanged() {
        let mut registry = RuleRegistry::new();
        let err = registry
            .validate_and_register(rule(
                1,
                "broken",
                vec![Pattern::new("fine"), Pattern::new("(unclosed")],
            ))
            .unwrap_err();
        assert!(matches!(err, SigError::CompileError { .. }));
        assert_eq!(registry.pattern_count(), 0);
    }

    #[test]
    fn test_metadata_validation() {
        let mut registry = RuleRegistry::new();
        assert!(registry
            .validate_and_register(rule(1, "ab", vec![Pattern::new("x")]))
            .is_err());

        let mut bad_color = rule(2, "valid", vec![Pattern::new("x")]);
        bad_color.color = "red".to_string();
        assert!(matches!(
            registry.validate_and_register(bad_color),
            Err(SigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_prepare_does_not_mutate() {
        let registry = RuleRegistry::new();
        let admission = registry
            .prepare(rule(1, "staged", vec![Pattern::new("one"), Pattern::new("two")]))
            .unwrap();
        assert_eq!(admission.new_patterns().len(), 2);
        assert_eq!(admission.rule().pattern_ids(), vec![0, 1]);
        assert_eq!(registry.pattern_count(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_admission_refused() {
        let mut registry = RuleRegistry::new();
        let first = registry
            .prepare(rule(1, "first", vec![Pattern::new("one")]))
            .unwrap();
        let second = registry
            .prepare(rule(2, "second", vec![Pattern::new("two")]))
            .unwrap();
        assert_eq!(second.rule().pattern_ids(), vec![0]);

        registry.commit(first).unwrap();
        assert!(matches!(
            registry.commit(second),
            Err(SigError::ValidationError(_))
        ));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pattern_count(), 1);
        assert_eq!(registry.patterns().get(0).unwrap().canonical(), "/one/");
        assert!(registry.is_consistent());

        // same name, no new patterns: corpus unchanged but the name is taken
        let again = registry
            .prepare(rule(3, "other", vec![Pattern::new("one")]))
            .unwrap();
        let clash = registry
            .prepare(rule(4, "other", vec![Pattern::new("one")]))
            .unwrap();
        registry.commit(again).unwrap();
        assert!(matches!(
            registry.commit(clash),
            Err(SigError::DuplicateNameError(_))
        ));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_update_metadata() {
        let mut registry = RuleRegistry::new();
        let id = registry
            .validate_and_register(rule(1, "before", vec![Pattern::new("x")]))
            .unwrap();

        let previous = registry.update(id, "after", "#00ff00").unwrap().unwrap();
        assert_eq!(previous.name, "before");

        let current = registry.get(id).unwrap();
        assert_eq!(current.name, "after");
        assert_eq!(current.color, "#00ff00");
        assert_eq!(current.version, 1);
        assert_eq!(current.patterns, previous.patterns);
        assert!(registry.get_by_name("before").is_none());
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_update_unknown_and_collision() {
        let mut registry = RuleRegistry::new();
        let a = registry
            .validate_and_register(rule(1, "alpha", vec![Pattern::new("a")]))
            .unwrap();
        registry
            .validate_and_register(rule(2, "bravo", vec![Pattern::new("b")]))
            .unwrap();

        assert!(registry
            .update(RowId::new(9, 9), "ghost", "#fff")
            .unwrap()
            .is_none());
        assert!(matches!(
            registry.update(a, "bravo", "#fff"),
            Err(SigError::DuplicateNameError(_))
        ));
        // keeping the same name is allowed
        assert!(registry.update(a, "alpha", "#000").unwrap().is_some());
    }

    #[test]
    fn test_revert_update() {
        let mut registry = RuleRegistry::new();
        let id = registry
            .validate_and_register(rule(1, "original", vec![Pattern::new("x")]))
            .unwrap();
        let previous = registry.update(id, "renamed", "#123").unwrap().unwrap();

        assert!(registry.revert_update(&previous));
        assert_eq!(registry.get(id).unwrap().name, "original");
        assert_eq!(registry.get(id).unwrap().version, 0);
        assert!(registry.get_by_name("renamed").is_none());
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_remove_keeps_patterns() {
        let mut registry = RuleRegistry::new();
        let id = registry
            .validate_and_register(rule(1, "temp", vec![Pattern::new("x")]))
            .unwrap();
        assert!(registry.remove(id).is_some());
        assert!(registry.is_empty());
        assert!(registry.get_by_name("temp").is_none());
        assert_eq!(registry.pattern_count(), 1);
    }
}
