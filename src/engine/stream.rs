/// Streaming scan over one direction of a connection
use super::matcher::{MatchEngine, PatternMatch};
use ahash::AHashMap;
use std::sync::Arc;

/// Default number of bytes of stream history kept for cross-chunk matches
pub const DEFAULT_STREAM_WINDOW: usize = 64 * 1024;

/// Scan state for one byte stream.
///
/// Chunks are appended to a bounded history window; each scan reports only
/// matches that end inside the newly appended chunk, with offsets relative to
/// the start of the stream. Matches longer than the window are not found.
/// One byte in front of the window is kept so anchors and word boundaries
/// see the real preceding byte. A match overlapping one already reported for
/// the same pattern is dropped, so counts do not depend on chunking.
#[derive(Debug)]
pub struct EngineStream {
    engine: Arc<MatchEngine>,
    buffer: Vec<u8>,
    /// Stream offset of `buffer[0]`
    base: u64,
    window: usize,
    fired: Vec<bool>,
    /// Stream offset where the last reported match of each pattern ended
    last_end: Vec<u64>,
    counts: AHashMap<usize, u32>,
}

impl EngineStream {
    pub fn new(engine: Arc<MatchEngine>, window: usize) -> Self {
        let fired = vec![false; engine.pattern_count()];
        let last_end = vec![0; engine.pattern_count()];
        Self {
            engine,
            buffer: Vec::new(),
            base: 0,
            window: window.max(1),
            fired,
            last_end,
            counts: AHashMap::new(),
        }
    }

    /// Feed the next chunk and return the new matches
    pub fn scan(&mut self, chunk: &[u8]) -> Vec<PatternMatch> {
        let previous_len = self.buffer.len() as u64;
        self.buffer.extend_from_slice(chunk);

        // buffer[0] only provides context once history has been trimmed
        let context = usize::from(self.base > 0);

        let mut found = Vec::new();
        for mat in self.engine.scan_from(&self.buffer, context) {
            if mat.end <= previous_len {
                continue;
            }
            let start = mat.start + self.base;
            let end = mat.end + self.base;
            if start < self.last_end[mat.pattern_id] {
                continue;
            }
            if self.engine.is_single_match(mat.pattern_id) {
                if self.fired[mat.pattern_id] {
                    continue;
                }
                self.fired[mat.pattern_id] = true;
            }

            self.last_end[mat.pattern_id] = end;
            *self.counts.entry(mat.pattern_id).or_insert(0) += 1;
            found.push(PatternMatch {
                pattern_id: mat.pattern_id,
                start,
                end,
            });
        }

        let keep = self.window + 1;
        if self.buffer.len() > keep {
            let excess = self.buffer.len() - keep;
            self.buffer.drain(..excess);
            self.base += excess as u64;
        }

        found
    }

    /// Total bytes fed into the stream
    pub fn position(&self) -> u64 {
        self.base + self.buffer.len() as u64
    }

    /// Occurrences reported so far, by pattern id
    pub fn match_counts(&self) -> &AHashMap<usize, u32> {
        &self.counts
    }

    /// Finish the stream, returning the occurrence counts
    pub fn close(self) -> AHashMap<usize, u32> {
        self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::rules::compiler::compile_pattern;
    use crate::rules::rule::{Pattern, RegexFlags};

    fn engine(patterns: &[Pattern]) -> Arc<MatchEngine> {
        let compiled: Vec<_> = patterns.iter().map(|p| compile_pattern(p).unwrap()).collect();
        Arc::new(MatchEngine::build(&compiled, &EngineConfig::default()).unwrap())
    }

    #[test]
    fn test_match_across_chunks() {
        let engine = engine(&[Pattern::new("flag\\{[0-9]+\\}")]);
        let mut stream = engine.open_stream();

        assert!(stream.scan(b"xxflag{12").is_empty());
        let matches = stream.scan(b"34}yy");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start, 2);
        assert_eq!(matches[0].end, 12);
        assert_eq!(stream.position(), 14);
    }

    #[test]
    fn test_matches_reported_once() {
        let engine = engine(&[Pattern::new("GET")]);
        let mut stream = engine.open_stream();

        assert_eq!(stream.scan(b"GET /").len(), 1);
        assert!(stream.scan(b"index").is_empty());
        let matches = stream.scan(b" GET");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start, 11);
        assert_eq!(stream.match_counts().get(&0), Some(&2));
    }

    #[test]
    fn test_single_match() {
        let flags = RegexFlags {
            single_match: true,
            ..Default::default()
        };
        let engine = engine(&[Pattern::new("ping").with_flags(flags), Pattern::new("pong")]);
        let mut stream = engine.open_stream();

        stream.scan(b"ping pong ping pong");
        stream.scan(b"ping pong");
        let counts = stream.close();
        assert_eq!(counts.get(&0), Some(&1));
        assert_eq!(counts.get(&1), Some(&3));
    }

    #[test]
    fn test_window_bounds_history() {
        let compiled = vec![compile_pattern(&Pattern::new("abc")).unwrap()];
        let config = EngineConfig {
            stream_window: 4,
            ..Default::default()
        };
        let engine = Arc::new(MatchEngine::build(&compiled, &config).unwrap());
        let mut stream = engine.open_stream();

        stream.scan(b"0123456789a");
        let matches = stream.scan(b"bc");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start, 10);
        assert_eq!(stream.position(), 13);
    }

    #[test]
    fn test_counts_independent_of_chunking() {
        let pattern = [Pattern::new("a+b?")];

        let mut whole = engine(&pattern).open_stream();
        whole.scan(b"aaaaaaaaaa");

        let mut split = engine(&pattern).open_stream();
        assert_eq!(split.scan(b"aaaaa").len(), 1);
        assert!(split.scan(b"aaaaa").is_empty());

        assert_eq!(whole.match_counts().get(&0), Some(&1));
        assert_eq!(split.match_counts().get(&0), Some(&1));

        let matches = split.scan(b"xab");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start, 11);
    }

    #[test]
    fn test_anchor_after_trimmed_history() {
        let config = EngineConfig {
            stream_window: 2,
            ..Default::default()
        };
        let compiled = vec![
            compile_pattern(&Pattern::new("^abc")).unwrap(),
            compile_pattern(&Pattern::new("abc")).unwrap(),
        ];
        let engine = Arc::new(MatchEngine::build(&compiled, &config).unwrap());
        let mut stream = engine.open_stream();

        assert!(stream.scan(b"xxab").is_empty());
        let matches = stream.scan(b"c");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pattern_id, 1);
        assert_eq!(matches[0].start, 2);
        assert_eq!(matches[0].end, 5);
    }
}
