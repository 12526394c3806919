/// Multi-pattern matching engine built from the whole pattern corpus
use super::stream::EngineStream;
use super::EngineConfig;
use crate::error::{Result, SigError};
use crate::rules::compiler::CompiledPattern;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, Input, MatchKind};
use regex::bytes::{Regex, RegexSet, RegexSetBuilder};
use std::sync::Arc;
use tracing::debug;

/// A single pattern occurrence in a scanned buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternMatch {
    /// Internal pattern id
    pub pattern_id: usize,
    /// Start position
    pub start: u64,
    /// End position (exclusive)
    pub end: u64,
}

/// Aho-Corasick automaton over literal patterns
#[derive(Debug)]
struct LiteralAutomaton {
    ac: AhoCorasick,
    /// Automaton pattern index -> internal pattern id
    ids: Vec<usize>,
}

impl LiteralAutomaton {
    fn build(literals: &[(usize, &[u8])], caseless: bool) -> Result<Option<Self>> {
        if literals.is_empty() {
            return Ok(None);
        }

        let ac = AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .ascii_case_insensitive(caseless)
            .build(literals.iter().map(|(_, bytes)| *bytes))
            .map_err(|e| {
                SigError::EngineBuildError(format!("failed to build literal automaton: {}", e))
            })?;

        Ok(Some(Self {
            ac,
            ids: literals.iter().map(|(id, _)| *id).collect(),
        }))
    }

    fn scan(&self, input: Input<'_>, last_end: &mut [usize], out: &mut Vec<PatternMatch>) {
        for mat in self.ac.find_overlapping_iter(input) {
            let id = self.ids[mat.pattern().as_usize()];
            // keep per-pattern matches non-overlapping, like the regex path
            if mat.start() < last_end[id] {
                continue;
            }
            last_end[id] = mat.end();
            out.push(PatternMatch {
                pattern_id: id,
                start: mat.start() as u64,
                end: mat.end() as u64,
            });
        }
    }
}

/// Compiled matcher over every distinct pattern of the corpus.
///
/// Literal patterns go through Aho-Corasick (one automaton per case mode);
/// everything else through a `RegexSet`, with one `Regex` per member to
/// recover offsets for the members the set reports.
#[derive(Debug)]
pub struct MatchEngine {
    pattern_count: usize,
    literal_sensitive: Option<LiteralAutomaton>,
    literal_insensitive: Option<LiteralAutomaton>,
    regex_set: Option<RegexSet>,
    /// Set member index -> (internal pattern id, regex)
    regexes: Vec<(usize, Regex)>,
    single_match: Vec<bool>,
    stream_window: usize,
}

impl MatchEngine {
    /// Build an engine. Pattern ids are the positions in `patterns`.
    pub fn build<'a, I>(patterns: I, config: &EngineConfig) -> Result<Self>
    where
        I: IntoIterator<Item = &'a CompiledPattern>,
    {
        let mut sensitive = Vec::new();
        let mut insensitive = Vec::new();
        let mut expressions = Vec::new();
        let mut regexes = Vec::new();
        let mut single_match = Vec::new();

        for (id, pattern) in patterns.into_iter().enumerate() {
            single_match.push(pattern.single_match());

            match pattern.literal() {
                Some(bytes) if pattern.caseless() => insensitive.push((id, bytes)),
                Some(bytes) => sensitive.push((id, bytes)),
                None => {
                    expressions.push(pattern.expression());
                    regexes.push((id, pattern.regex().clone()));
                }
            }
        }

        let pattern_count = single_match.len();
        if config.max_patterns != 0 && pattern_count > config.max_patterns {
            return Err(SigError::EngineBuildError(format!(
                "{} patterns exceed the engine limit of {}",
                pattern_count, config.max_patterns
            )));
        }

        debug!(
            "Building engine: {} patterns ({} literal, {} caseless literal, {} regex)",
            pattern_count,
            sensitive.len(),
            insensitive.len(),
            expressions.len()
        );

        let regex_set = if expressions.is_empty() {
            None
        } else {
            Some(
                RegexSetBuilder::new(&expressions)
                    .size_limit(config.set_size_limit)
                    .build()
                    .map_err(|e| {
                        SigError::EngineBuildError(format!("failed to build regex set: {}", e))
                    })?,
            )
        };

        Ok(Self {
            pattern_count,
            literal_sensitive: LiteralAutomaton::build(&sensitive, false)?,
            literal_insensitive: LiteralAutomaton::build(&insensitive, true)?,
            regex_set,
            regexes,
            single_match,
            stream_window: config.stream_window,
        })
    }

    /// Number of patterns compiled into the engine
    pub fn pattern_count(&self) -> usize {
        self.pattern_count
    }

    pub fn is_single_match(&self, pattern_id: usize) -> bool {
        self.single_match.get(pattern_id).copied().unwrap_or(false)
    }

    /// Find all pattern occurrences, ordered by end offset then pattern id
    pub fn scan(&self, haystack: &[u8]) -> Vec<PatternMatch> {
        self.scan_from(haystack, 0)
    }

    /// Like `scan`, but only report occurrences starting at or after `start`.
    /// Bytes before `start` are still visible to anchors and word boundaries.
    pub fn scan_from(&self, haystack: &[u8], start: usize) -> Vec<PatternMatch> {
        let mut matches = Vec::new();
        if start > haystack.len() {
            return matches;
        }
        let mut last_end = vec![start; self.pattern_count];

        for automaton in [&self.literal_sensitive, &self.literal_insensitive]
            .into_iter()
            .flatten()
        {
            let input = Input::new(haystack).span(start..haystack.len());
            automaton.scan(input, &mut last_end, &mut matches);
        }

        if let Some(ref set) = self.regex_set {
            for index in set.matches(haystack).iter() {
                let (id, regex) = &self.regexes[index];
                let mut pos = start;
                while pos <= haystack.len() {
                    let Some(mat) = regex.find_at(haystack, pos) else {
                        break;
                    };
                    matches.push(PatternMatch {
                        pattern_id: *id,
                        start: mat.start() as u64,
                        end: mat.end() as u64,
                    });
                    pos = if mat.end() > mat.start() { mat.end() } else { mat.end() + 1 };
                }
            }
        }

        matches.sort_by_key(|m| (m.end, m.pattern_id, m.start));
        matches
    }

    /// Ids of the patterns that occur at least once
    pub fn matching_patterns(&self, haystack: &[u8]) -> Vec<usize> {
        let mut ids: Vec<usize> = self.scan(haystack).iter().map(|m| m.pattern_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Open a stream for one direction of a connection
    pub fn open_stream(self: &Arc<Self>) -> EngineStream {
        EngineStream::new(self.clone(), self.stream_window)
    }
}
