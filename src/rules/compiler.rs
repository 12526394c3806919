/// Pattern compilation: descriptor -> engine-ready pattern
use super::rule::{Pattern, RegexFlags};
use crate::error::{Result, SigError};
use regex::bytes::{Regex, RegexBuilder};
use std::fmt;

/// Default per-pattern compiled program size limit
pub const DEFAULT_PATTERN_SIZE_LIMIT: usize = 10 * (1 << 20);

/// A validated pattern ready to be placed in a matching engine
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    regex_text: String,
    flags: RegexFlags,
    canonical: String,
    expression: String,
    literal: Option<Vec<u8>>,
    regex: Regex,
}

impl CompiledPattern {
    /// Normalized form used to deduplicate patterns: `/regex/flags`
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Expression with the flags inlined, usable inside a multi-pattern set
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Literal bytes if the regex has no metacharacters and can be matched
    /// without a regex automaton
    pub fn literal(&self) -> Option<&[u8]> {
        self.literal.as_deref()
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn regex_text(&self) -> &str {
        &self.regex_text
    }

    pub fn flags(&self) -> RegexFlags {
        self.flags
    }

    pub fn caseless(&self) -> bool {
        self.flags.caseless
    }

    pub fn single_match(&self) -> bool {
        self.flags.single_match
    }
}

impl fmt::Display for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical)
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for CompiledPattern {}

/// Compile with the default size limit
pub fn compile_pattern(pattern: &Pattern) -> Result<CompiledPattern> {
    compile_pattern_with_limit(pattern, DEFAULT_PATTERN_SIZE_LIMIT)
}

/// Compile and validate a pattern descriptor.
///
/// Every enabled flag is applied independently. The result is refused if the
/// regex does not parse, exceeds `size_limit`, matches the empty input (such
/// a pattern would fire at every position of every stream), or stops parsing
/// once its flags are inlined for a multi-pattern set.
pub fn compile_pattern_with_limit(pattern: &Pattern, size_limit: usize) -> Result<CompiledPattern> {
    pattern.validate()?;

    let flags = pattern.flags;
    let unicode = unicode_enabled(&flags);

    let regex = RegexBuilder::new(&pattern.regex)
        .case_insensitive(flags.caseless)
        .dot_matches_new_line(flags.dot_all)
        .multi_line(flags.multi_line)
        .unicode(unicode)
        .size_limit(size_limit)
        .build()
        .map_err(|e| SigError::CompileError {
            pattern: pattern.regex.clone(),
            reason: e.to_string(),
        })?;

    let canonical = canonical_form(&pattern.regex, &flags);

    if regex.is_match(b"") {
        return Err(SigError::EngineValidationError(format!(
            "{} matches empty input",
            canonical
        )));
    }

    let expression = inline_expression(&pattern.regex, &flags);
    RegexBuilder::new(&expression)
        .size_limit(size_limit)
        .build()
        .map_err(|e| {
            SigError::EngineValidationError(format!("{} cannot be combined: {}", canonical, e))
        })?;

    Ok(CompiledPattern {
        regex_text: pattern.regex.clone(),
        flags,
        expression,
        literal: literal_bytes(&pattern.regex, &flags),
        canonical,
        regex,
    })
}

/// `/regex/` followed by one letter per enabled flag, in a fixed order
pub fn canonical_form(regex: &str, flags: &RegexFlags) -> String {
    let mut out = String::with_capacity(regex.len() + 8);
    out.push('/');
    out.push_str(regex);
    out.push('/');
    if flags.caseless {
        out.push('i');
    }
    if flags.dot_all {
        out.push('s');
    }
    if flags.multi_line {
        out.push('m');
    }
    if flags.single_match {
        out.push('H');
    }
    if flags.utf8_mode {
        out.push('8');
    }
    if flags.unicode_property {
        out.push('W');
    }
    out
}

fn unicode_enabled(flags: &RegexFlags) -> bool {
    flags.utf8_mode || flags.unicode_property
}

fn inline_expression(regex: &str, flags: &RegexFlags) -> String {
    let mut group = String::from("(?");
    if flags.caseless {
        group.push('i');
    }
    if flags.dot_all {
        group.push('s');
    }
    if flags.multi_line {
        group.push('m');
    }
    if unicode_enabled(flags) {
        group.push('u');
    } else {
        group.push_str("-u");
    }
    group.push(')');

    format!("{}(?:{})", group, regex)
}

fn literal_bytes(regex: &str, flags: &RegexFlags) -> Option<Vec<u8>> {
    if regex::escape(regex) != regex {
        return None;
    }
    // the literal matcher only folds ASCII case
    if flags.caseless && (unicode_enabled(flags) || !regex.is_ascii()) {
        return None;
    }
    Some(regex.as_bytes().to_vec())
}
