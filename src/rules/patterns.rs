/// Corpus-wide pattern deduplication and id assignment
use super::compiler::CompiledPattern;
use ahash::AHashMap;

/// Maps canonical pattern forms to internal pattern ids.
///
/// Ids are dense and assigned in order of first appearance, so the id of a
/// pattern is also its position in [`PatternRegistry::iter`]. Ids are never
/// reused or reassigned.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    patterns: Vec<CompiledPattern>,
    ids: AHashMap<String, usize>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of an already registered canonical form
    pub fn lookup(&self, canonical: &str) -> Option<usize> {
        self.ids.get(canonical).copied()
    }

    /// Register a pattern, returning the existing id when the canonical form
    /// is already known
    pub fn register(&mut self, pattern: CompiledPattern) -> usize {
        if let Some(id) = self.lookup(pattern.canonical()) {
            return id;
        }

        let id = self.patterns.len();
        self.ids.insert(pattern.canonical().to_string(), id);
        self.patterns.push(pattern);
        id
    }

    pub fn get(&self, id: usize) -> Option<&CompiledPattern> {
        self.patterns.get(id)
    }

    /// Id the next new pattern will receive
    pub fn next_id(&self) -> usize {
        self.patterns.len()
    }

    /// Number of distinct patterns in the corpus
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Patterns in id order
    pub fn iter(&self) -> impl Iterator<Item = &CompiledPattern> {
        self.patterns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::compiler::compile_pattern;
    use crate::rules::rule::{Pattern, RegexFlags};

    fn compiled(regex: &str, caseless: bool) -> CompiledPattern {
        let flags = RegexFlags {
            caseless,
            ..Default::default()
        };
        compile_pattern(&Pattern::new(regex).with_flags(flags)).unwrap()
    }

    #[test]
    fn test_register_assigns_dense_ids() {
        let mut registry = PatternRegistry::new();
        assert_eq!(registry.register(compiled("abc", false)), 0);
        assert_eq!(registry.register(compiled("def", false)), 1);
        assert_eq!(registry.register(compiled("ghi", false)), 2);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.next_id(), 3);
    }

    #[test]
    fn test_register_deduplicates() {
        let mut registry = PatternRegistry::new();
        let first = registry.register(compiled("abc", true));
        let again = registry.register(compiled("abc", true));
        assert_eq!(first, again);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_flags_are_part_of_identity() {
        let mut registry = PatternRegistry::new();
        let sensitive = registry.register(compiled("abc", false));
        let insensitive = registry.register(compiled("abc", true));
        assert_ne!(sensitive, insensitive);
        assert_eq!(registry.lookup("/abc/i"), Some(insensitive));
        assert_eq!(registry.lookup("/abc/"), Some(sensitive));
    }

    #[test]
    fn test_iter_in_id_order() {
        let mut registry = PatternRegistry::new();
        registry.register(compiled("one", false));
        registry.register(compiled("two", false));
        let canonical: Vec<&str> = registry.iter().map(|p| p.canonical()).collect();
        assert_eq!(canonical, vec!["/one/", "/two/"]);
        assert_eq!(registry.get(1).unwrap().canonical(), "/two/");
    }
}
