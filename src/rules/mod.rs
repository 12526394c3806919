// Rule corpus - data model, pattern compilation, registry and management
pub mod annotate;
pub mod compiler;
pub mod manager;
pub mod patterns;
pub mod registry;
pub mod row_id;
pub mod rule;

pub use annotate::{annotate, filter_matches, pattern_satisfied, rule_triggered, Connection, DirectionalMatches};
pub use compiler::{canonical_form, compile_pattern, compile_pattern_with_limit, CompiledPattern};
pub use manager::{ManagerStats, RuleManager, FLAG_RULE_COLOR, FLAG_RULE_NAME};
pub use patterns::PatternRegistry;
pub use registry::{Admission, RuleRegistry};
pub use row_id::{RowId, RowIdGenerator};
pub use rule::{Direction, Filter, Pattern, RegexFlags, Rule, RuleDraft, RuleUpdate};
