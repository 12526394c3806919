/// Time-ordered row identifiers for rules
use chrono::Utc;
use serde::de::{self, Deserializer, Visitor};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Globally ordered rule identifier.
///
/// Ordering is by creation timestamp first, then by sequence, so a rule
/// created later always compares greater. Rendered as 24 lowercase hex
/// characters (8 for the timestamp, 16 for the sequence).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId {
    timestamp: u32,
    sequence: u64,
}

impl RowId {
    pub fn new(timestamp: u32, sequence: u64) -> Self {
        Self {
            timestamp,
            sequence,
        }
    }

    /// The all-zero id, used where no rule exists yet
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    /// Creation time in seconds since the Unix epoch
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}{:016x}", self.timestamp, self.sequence)
    }
}

impl FromStr for RowId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // from_str_radix alone would also take a leading sign
        if s.len() != 24 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("row id must be 24 hex characters, got {:?}", s));
        }

        let timestamp = u32::from_str_radix(&s[..8], 16)
            .map_err(|e| format!("invalid row id timestamp {:?}: {}", s, e))?;
        let sequence = u64::from_str_radix(&s[8..], 16)
            .map_err(|e| format!("invalid row id sequence {:?}: {}", s, e))?;

        Ok(Self::new(timestamp, sequence))
    }
}

impl Serialize for RowId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct RowIdVisitor;

impl<'de> Visitor<'de> for RowIdVisitor {
    type Value = RowId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a 24 character hex row id")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RowId, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> serde::Deserialize<'de> for RowId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(RowIdVisitor)
    }
}

/// Hands out strictly increasing row ids
#[derive(Debug, Default)]
pub struct RowIdGenerator {
    last: RowId,
}

impl RowIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id stamped with the current wall-clock time
    pub fn next_id(&mut self) -> RowId {
        let now = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        self.next_at(now)
    }

    /// Next id for the given timestamp. If the clock has not moved past the
    /// last id, the last timestamp is reused so ordering still holds.
    pub fn next_at(&mut self, timestamp: u32) -> RowId {
        let id = RowId::new(
            timestamp.max(self.last.timestamp),
            self.last.sequence.wrapping_add(1),
        );
        // sequence wrap would break ordering within a single second
        let id = if id <= self.last {
            RowId::new(self.last.timestamp.saturating_add(1), 0)
        } else {
            id
        };
        self.last = id;
        id
    }

    /// Record an id created elsewhere (e.g. loaded from the store)
    pub fn observe(&mut self, id: RowId) {
        if id > self.last {
            self.last = id;
        }
    }

    pub fn last(&self) -> RowId {
        self.last
    }
}
