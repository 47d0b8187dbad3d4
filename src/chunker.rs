//! Splits composed document text into bounded, overlapping chunks.
//!
//! Chunking prefers semantic boundaries (labeled sections, numbered
//! headings) and falls back to fixed-length sliding windows for anything
//! still longer than the size cap. All length arithmetic is in characters,
//! not bytes, because the corpus is largely Japanese.

use regex::Regex;

use crate::normalizer::normalize;

/// Tuning knobs for [`Chunker`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Maximum chunk length in characters.
    pub max_chars: usize,
    /// Characters shared between adjacent fixed-length windows.
    pub overlap: usize,
    /// Carry the overlap tail across semantic boundaries too, not only
    /// inside fixed-length slices.
    pub overlap_at_boundaries: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 900,
            overlap: 120,
            overlap_at_boundaries: false,
        }
    }
}

/// Strategy that decides whether a line starts a new semantic section.
///
/// Failing to find any boundary is a normal outcome, not an error; the
/// chunker then treats the whole text as one part and slices it.
pub trait BoundaryDetector: Send + Sync {
    /// Returns true when `line` begins a new labeled section.
    fn is_boundary_line(&self, line: &str) -> bool;
}

/// Default detector: a short label followed by a colon (ASCII or
/// full-width), or a numbered section heading.
pub struct SectionBoundaryDetector {
    pattern: Regex,
}

impl SectionBoundaryDetector {
    /// Builds the default detector.
    pub fn new() -> Self {
        // Label + colon, "第N回" lecture headings, or "1." / "1)" numbering.
        let pattern = Regex::new(
            r"^(?:[^\n:：]{1,40}[:：]|第[0-9０-９一二三四五六七八九十]+回|[0-9０-９]{1,3}[.)．])",
        )
        .expect("section boundary pattern");
        Self { pattern }
    }
}

impl Default for SectionBoundaryDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundaryDetector for SectionBoundaryDetector {
    fn is_boundary_line(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }
}

/// Splits normalized text into ordered chunks.
pub struct Chunker {
    config: ChunkerConfig,
    detector: Box<dyn BoundaryDetector>,
}

impl Chunker {
    /// Builds a chunker with the default section detector.
    pub fn new(config: ChunkerConfig) -> Self {
        Self::with_detector(config, Box::new(SectionBoundaryDetector::new()))
    }

    /// Builds a chunker with a caller-provided boundary detector.
    pub fn with_detector(config: ChunkerConfig, detector: Box<dyn BoundaryDetector>) -> Self {
        Self { config, detector }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunks `text` into ordered, non-empty segments.
    ///
    /// The input is normalized first. Text at or under `max_chars` comes
    /// back as a single chunk. Longer text is split at semantic boundaries
    /// where possible, and any part still over the cap is sliced into
    /// windows of `max_chars` advancing by `max_chars - overlap`
    /// characters (minimum advance of one, so termination is guaranteed
    /// even with a clamped overlap).
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let text = normalize(text);
        if text.is_empty() {
            return Vec::new();
        }
        let max = self.config.max_chars.max(1);
        // overlap >= max_chars would make the window advance non-positive.
        let overlap = self.config.overlap.min(max - 1);

        if char_len(&text) <= max {
            return vec![text];
        }

        let mut parts = self.split_parts(&text);
        if self.config.overlap_at_boundaries && parts.len() > 1 {
            for i in (1..parts.len()).rev() {
                let tail = tail_chars(&parts[i - 1], overlap);
                if !tail.is_empty() {
                    parts[i] = format!("{tail}\n{}", parts[i]);
                }
            }
        }

        let mut chunks = Vec::new();
        for part in parts {
            if char_len(&part) <= max {
                chunks.push(part);
                continue;
            }
            let cs: Vec<char> = part.chars().collect();
            let step = (max - overlap).max(1);
            let mut start = 0usize;
            loop {
                let end = (start + max).min(cs.len());
                chunks.push(cs[start..end].iter().collect());
                if end == cs.len() {
                    break;
                }
                start += step;
            }
        }
        chunks
    }

    /// Splits at lines the detector flags as section starts. Returns at
    /// least one non-empty part.
    fn split_parts(&self, text: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();
        for line in text.split('\n') {
            if !current.is_empty() && self.detector.is_boundary_line(line) {
                let part = current.trim().to_string();
                if !part.is_empty() {
                    parts.push(part);
                }
                current.clear();
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
        let part = current.trim().to_string();
        if !part.is_empty() {
            parts.push(part);
        }
        if parts.is_empty() {
            parts.push(text.to_string());
        }
        parts
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn tail_chars(s: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let cs: Vec<char> = s.chars().collect();
    cs[cs.len().saturating_sub(n)..].iter().collect()
}
