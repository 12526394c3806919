/// Rule, pattern and connection filter structures
use super::row_id::RowId;
use crate::error::{Result, SigError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Minimum length of a rule name
pub const MIN_NAME_LEN: usize = 3;

/// Matching modes of a single pattern. Each flag is independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RegexFlags {
    /// Case-insensitive matching
    pub caseless: bool,
    /// `.` also matches newlines
    pub dot_all: bool,
    /// `^` and `$` match at line boundaries
    pub multi_line: bool,
    /// Report at most one match per stream
    pub single_match: bool,
    /// Interpret input as UTF-8
    #[serde(rename = "utf_8_mode")]
    pub utf8_mode: bool,
    /// Unicode property classes (`\p{..}`)
    pub unicode_property: bool,
}

/// Which side of the connection a pattern applies to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Direction {
    #[default]
    Both,
    /// Data sent by the client
    ToServer,
    /// Data sent by the server
    ToClient,
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Direction::Both),
            1 => Ok(Direction::ToServer),
            2 => Ok(Direction::ToClient),
            other => Err(format!("invalid direction {}, expected 0, 1 or 2", other)),
        }
    }
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Both => 0,
            Direction::ToServer => 1,
            Direction::ToClient => 2,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Both => write!(f, "both"),
            Direction::ToServer => write!(f, "to_server"),
            Direction::ToClient => write!(f, "to_client"),
        }
    }
}

/// A single regex signature of a rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub regex: String,
    #[serde(default)]
    pub flags: RegexFlags,
    /// 0 = unset
    #[serde(default)]
    pub min_occurrences: u32,
    /// 0 = unset
    #[serde(default)]
    pub max_occurrences: u32,
    #[serde(default)]
    pub direction: Direction,
    /// Assigned by the pattern registry, shared by identical patterns
    #[serde(skip)]
    pub(crate) internal_id: Option<usize>,
}

impl Pattern {
    pub fn new(regex: impl Into<String>) -> Self {
        Self {
            regex: regex.into(),
            ..Default::default()
        }
    }

    pub fn with_flags(mut self, flags: RegexFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_occurrences(mut self, min: u32, max: u32) -> Self {
        self.min_occurrences = min;
        self.max_occurrences = max;
        self
    }

    /// Engine-level pattern id, present once the pattern is registered
    pub fn internal_id(&self) -> Option<usize> {
        self.internal_id
    }

    /// Check field constraints (no compilation)
    pub fn validate(&self) -> Result<()> {
        if self.regex.is_empty() {
            return Err(SigError::ValidationError(
                "pattern regex cannot be empty".to_string(),
            ));
        }

        if self.max_occurrences != 0 && self.max_occurrences < self.min_occurrences {
            return Err(SigError::ValidationError(format!(
                "pattern {:?}: max_occurrences ({}) must be >= min_occurrences ({})",
                self.regex, self.max_occurrences, self.min_occurrences
            )));
        }

        Ok(())
    }
}

/// Connection-level predicate of a rule. Zero / empty fields are unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub service_port: u16,
    pub client_address: String,
    pub client_port: u16,
    /// Milliseconds
    pub min_duration: u64,
    /// Milliseconds
    pub max_duration: u64,
    pub min_bytes: u64,
    pub max_bytes: u64,
}

impl Filter {
    /// Parsed client address, if one is set and valid
    pub fn client_ip(&self) -> Option<IpAddr> {
        if self.client_address.is_empty() {
            None
        } else {
            self.client_address.parse().ok()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Filter::default()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.client_address.is_empty() && self.client_address.parse::<IpAddr>().is_err() {
            return Err(SigError::ValidationError(format!(
                "filter client_address {:?} is not an IP address",
                self.client_address
            )));
        }

        if self.max_duration != 0 && self.max_duration < self.min_duration {
            return Err(SigError::ValidationError(format!(
                "filter max_duration ({}) must be >= min_duration ({})",
                self.max_duration, self.min_duration
            )));
        }

        if self.max_bytes != 0 && self.max_bytes < self.min_bytes {
            return Err(SigError::ValidationError(format!(
                "filter max_bytes ({}) must be >= min_bytes ({})",
                self.max_bytes, self.min_bytes
            )));
        }

        Ok(())
    }
}

/// A detection rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RowId,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub version: i64,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} ({}, {} patterns{})",
            self.id,
            self.name,
            self.color,
            self.patterns.len(),
            if self.enabled { "" } else { ", disabled" }
        )
    }
}

impl Rule {
    /// Check name, color and filter (patterns are checked while compiling)
    pub fn validate_metadata(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_color(&self.color)?;
        self.filter.validate()
    }

    /// Internal ids of all registered patterns, in rule order
    pub fn pattern_ids(&self) -> Vec<usize> {
        self.patterns.iter().filter_map(|p| p.internal_id).collect()
    }
}

/// User submission for a new rule; id, enabled and version are assigned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub filter: Filter,
}

impl RuleDraft {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            ..Default::default()
        }
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// New enabled rule with the given id
    pub fn into_rule(self, id: RowId) -> Rule {
        Rule {
            id,
            name: self.name,
            color: self.color,
            notes: self.notes,
            enabled: true,
            patterns: self.patterns,
            filter: self.filter,
            version: 0,
        }
    }
}

/// Fields changed by a metadata update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub name: String,
    pub color: String,
    pub version: i64,
}

impl RuleUpdate {
    pub fn from_rule(rule: &Rule) -> Self {
        Self {
            name: rule.name.clone(),
            color: rule.color.clone(),
            version: rule.version,
        }
    }

    pub fn apply(&self, rule: &mut Rule) {
        rule.name = self.name.clone();
        rule.color = self.color.clone();
        rule.version = self.version;
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.chars().count() < MIN_NAME_LEN {
        return Err(SigError::ValidationError(format!(
            "rule name {:?} must be at least {} characters",
            name, MIN_NAME_LEN
        )));
    }
    Ok(())
}

/// Accepts `#rgb`, `#rgba`, `#rrggbb` and `#rrggbbaa`
pub fn validate_color(color: &str) -> Result<()> {
    let valid = match color.strip_prefix('#') {
        Some(hex) => {
            matches!(hex.len(), 3 | 4 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(SigError::ValidationError(format!(
            "color {:?} is not a hex color",
            color
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_occurrence_bounds() {
        assert!(Pattern::new("abc").with_occurrences(5, 2).validate().is_err());
        assert!(Pattern::new("abc").with_occurrences(2, 5).validate().is_ok());
        assert!(Pattern::new("abc").with_occurrences(5, 0).validate().is_ok());
        assert!(Pattern::new("abc").with_occurrences(0, 2).validate().is_ok());
        assert!(Pattern::new("abc").with_occurrences(3, 3).validate().is_ok());
    }

    #[test]
    fn test_pattern_empty_regex() {
        assert!(matches!(
            Pattern::new("").validate(),
            Err(SigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_filter_validation() {
        let mut filter = Filter {
            client_address: "10.0.0.1".to_string(),
            min_bytes: 10,
            max_bytes: 100,
            ..Default::default()
        };
        assert!(filter.validate().is_ok());
        assert_eq!(filter.client_ip(), Some("10.0.0.1".parse().unwrap()));

        filter.client_address = "not-an-ip".to_string();
        assert!(filter.validate().is_err());

        let filter = Filter {
            min_duration: 500,
            max_duration: 100,
            ..Default::default()
        };
        assert!(filter.validate().is_err());
    }

    #[test]
    fn test_color_validation() {
        for color in ["#fff", "#ff00", "#ffff", "#ff0000", "#FF0000AA"] {
            assert!(validate_color(color).is_ok(), "{}", color);
        }
        for color in ["ff0000", "#ff", "#ff000", "#ff00000", "#gggggg", "", "#"] {
            assert!(validate_color(color).is_err(), "{}", color);
        }
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("ab").is_err());
        assert!(validate_name("abc").is_ok());
    }

    #[test]
    fn test_direction_serde() {
        let pattern: Pattern =
            serde_json::from_str(r#"{"regex": "abc", "direction": 2}"#).unwrap();
        assert_eq!(pattern.direction, Direction::ToClient);

        let bad = serde_json::from_str::<Pattern>(r#"{"regex": "abc", "direction": 3}"#);
        assert!(bad.is_err());

        let json = serde_json::to_value(Pattern::new("x").with_direction(Direction::ToServer))
            .unwrap();
        assert_eq!(json["direction"], 1);
    }

    #[test]
    fn test_flags_field_names() {
        let flags: RegexFlags =
            serde_json::from_str(r#"{"caseless": true, "utf_8_mode": true}"#).unwrap();
        assert!(flags.caseless);
        assert!(flags.utf8_mode);
        assert!(!flags.dot_all);
    }

    #[test]
    fn test_draft_into_rule() {
        let rule = RuleDraft::new("http", "#00ff00")
            .with_pattern(Pattern::new("GET"))
            .into_rule(RowId::new(1, 1));
        assert!(rule.enabled);
        assert_eq!(rule.version, 0);
        assert_eq!(rule.patterns.len(), 1);
        assert!(rule.validate_metadata().is_ok());
    }

    #[test]
    fn test_internal_id_not_serialized() {
        let mut pattern = Pattern::new("abc");
        pattern.internal_id = Some(3);
        let json = serde_json::to_string(&pattern).unwrap();
        assert!(!json.contains("internal"));
        let back: Pattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back.internal_id(), None);
    }
}
