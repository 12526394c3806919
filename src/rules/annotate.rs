/// Turning per-direction pattern hits into triggered rules
use super::row_id::RowId;
use super::rule::{Direction, Filter, Pattern, Rule};
use crate::engine::EngineStream;
use ahash::AHashMap;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;

/// Session attributes of an observed connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub client_address: IpAddr,
    pub client_port: u16,
    pub server_address: IpAddr,
    /// Server port
    pub service_port: u16,
    pub duration: Duration,
    /// Bytes sent by the client
    pub client_bytes: u64,
    /// Bytes sent by the server
    pub server_bytes: u64,
}

impl Connection {
    pub fn total_bytes(&self) -> u64 {
        self.client_bytes.saturating_add(self.server_bytes)
    }
}

/// Pattern occurrence counts for both directions of a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectionalMatches {
    /// Matches in data sent by the client (to server)
    pub client: AHashMap<usize, u32>,
    /// Matches in data sent by the server (to client)
    pub server: AHashMap<usize, u32>,
}

impl DirectionalMatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_streams(client: &EngineStream, server: &EngineStream) -> Self {
        Self {
            client: client.match_counts().clone(),
            server: server.match_counts().clone(),
        }
    }

    /// Record one occurrence. `Direction::Both` is not a stream side and is
    /// ignored.
    pub fn record(&mut self, direction: Direction, pattern_id: usize) {
        let side = match direction {
            Direction::ToServer => &mut self.client,
            Direction::ToClient => &mut self.server,
            Direction::Both => return,
        };
        *side.entry(pattern_id).or_insert(0) += 1;
    }

    /// Occurrences of a pattern as seen from the given direction
    pub fn count(&self, pattern_id: usize, direction: Direction) -> u32 {
        let client = self.client.get(&pattern_id).copied().unwrap_or(0);
        let server = self.server.get(&pattern_id).copied().unwrap_or(0);
        match direction {
            Direction::ToServer => client,
            Direction::ToClient => server,
            Direction::Both => client.saturating_add(server),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.client.is_empty() && self.server.is_empty()
    }
}

/// Unset filter fields always match; bounds are inclusive
pub fn filter_matches(filter: &Filter, connection: &Connection) -> bool {
    if filter.service_port != 0 && filter.service_port != connection.service_port {
        return false;
    }
    if filter.client_port != 0 && filter.client_port != connection.client_port {
        return false;
    }
    if !filter.client_address.is_empty() {
        match filter.client_ip() {
            Some(address) if address == connection.client_address => {}
            _ => return false,
        }
    }

    let duration = connection.duration.as_millis().min(u64::MAX as u128) as u64;
    if !within(duration, filter.min_duration, filter.max_duration) {
        return false;
    }

    within(connection.total_bytes(), filter.min_bytes, filter.max_bytes)
}

fn within(value: u64, min: u64, max: u64) -> bool {
    value >= min && (max == 0 || value <= max)
}

/// A pattern needs at least `max(min_occurrences, 1)` hits in its direction,
/// and no more than `max_occurrences` when that is set
pub fn pattern_satisfied(pattern: &Pattern, matches: &DirectionalMatches) -> bool {
    let Some(id) = pattern.internal_id() else {
        return false;
    };

    let count = matches.count(id, pattern.direction);
    let min = pattern.min_occurrences.max(1);
    count >= min && (pattern.max_occurrences == 0 || count <= pattern.max_occurrences)
}

/// Whether an enabled rule fires: filter matches and every pattern holds.
/// Rules without patterns fire on the filter alone.
pub fn rule_triggered(rule: &Rule, connection: &Connection, matches: &DirectionalMatches) -> bool {
    rule.enabled
        && filter_matches(&rule.filter, connection)
        && rule.patterns.iter().all(|p| pattern_satisfied(p, matches))
}

/// Ids of all rules triggered by a connection
pub fn annotate<'a, I>(rules: I, connection: &Connection, matches: &DirectionalMatches) -> BTreeSet<RowId>
where
    I: IntoIterator<Item = &'a Rule>,
{
    rules
        .into_iter()
        .filter(|rule| rule_triggered(rule, connection, matches))
        .map(|rule| rule.id)
        .collect()
}
