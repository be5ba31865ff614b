//! Sequential record segmentation.
//!
//! Turns an ordered stream of text lines into [`Block`]s, one per logical
//! record, using a start and an end predicate. Segmentation keeps partial
//! state between lines and is therefore strictly single-threaded; all
//! parallelism happens downstream, on completed blocks.
//!
//! ```text
//! <collection>                      noise (no block open)
//!   <record type="Authority">       start  -> open block
//!     <datafield ...>...</datafield>         append
//!   </record>                       end    -> emit block
//! </collection>                     noise
//! ```

use log::{trace, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default start delimiter: a record tag carrying attributes.
///
/// OAI-PMH responses wrap each record in an attribute-less `<record>`, which
/// must not open a block.
pub const DEFAULT_RECORD_START: &str = r"<(?:\w+:)?record\s";

/// Default end delimiter.
pub const DEFAULT_RECORD_END: &str = r"</(?:\w+:)?record>";

/// What to do with a block still open when the source is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrailingBlock {
    /// Drop the truncated block. Only complete records are ever emitted.
    #[default]
    Discard,
    /// Emit the truncated block as-is.
    Emit,
}

/// The raw, trimmed lines of one logical record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    lines: Vec<String>,
    first_line: usize,
}

impl Block {
    /// Create a block from already trimmed lines. `first_line` is 1-based.
    pub fn new(lines: Vec<String>, first_line: usize) -> Self {
        Self { lines, first_line }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// 1-based source line number of the opening line.
    pub fn first_line(&self) -> usize {
        self.first_line
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The record markup as one string, lines concatenated without separator.
    pub fn text(&self) -> String {
        self.lines.concat()
    }
}

/// Compiled start/end delimiter patterns.
#[derive(Debug, Clone)]
pub struct Delimiters {
    start: Regex,
    end: Regex,
}

impl Delimiters {
    pub fn new(start: &str, end: &str) -> Result<Self, ConfigError> {
        let start = Regex::new(start).map_err(|source| ConfigError::InvalidPattern {
            name: "record start".to_string(),
            source,
        })?;
        let end = Regex::new(end).map_err(|source| ConfigError::InvalidPattern {
            name: "record end".to_string(),
            source,
        })?;
        Ok(Self { start, end })
    }

    pub fn is_start(&self, line: &str) -> bool {
        self.start.is_match(line)
    }

    pub fn is_end(&self, line: &str) -> bool {
        self.end.is_match(line)
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            start: Regex::new(DEFAULT_RECORD_START).expect("default start pattern is valid"),
            end: Regex::new(DEFAULT_RECORD_END).expect("default end pattern is valid"),
        }
    }
}

/// Lazy iterator of blocks over a line iterator.
///
/// Created by [`segment`]. Single forward pass; once the underlying lines
/// are exhausted the segmenter stays exhausted.
pub struct Segmenter<I, S, E> {
    lines: I,
    is_start: S,
    is_end: E,
    trailing: TrailingBlock,
    buffer: Option<Block>,
    line_no: usize,
    finished: bool,
}

/// Segment `lines` into blocks delimited by `is_start` / `is_end`.
pub fn segment<I, S, E>(lines: I, is_start: S, is_end: E) -> Segmenter<I::IntoIter, S, E>
where
    I: IntoIterator<Item = String>,
    S: Fn(&str) -> bool,
    E: Fn(&str) -> bool,
{
    Segmenter {
        lines: lines.into_iter(),
        is_start,
        is_end,
        trailing: TrailingBlock::Discard,
        buffer: None,
        line_no: 0,
        finished: false,
    }
}

impl<I, S, E> Segmenter<I, S, E> {
    /// Set the policy for a block left open at the end of the source.
    pub fn with_trailing(mut self, trailing: TrailingBlock) -> Self {
        self.trailing = trailing;
        self
    }

    /// Number of lines consumed so far.
    pub fn lines_read(&self) -> usize {
        self.line_no
    }
}

impl<I, S, E> Iterator for Segmenter<I, S, E>
where
    I: Iterator<Item = String>,
    S: Fn(&str) -> bool,
    E: Fn(&str) -> bool,
{
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.finished {
            return None;
        }
        for raw in self.lines.by_ref() {
            self.line_no += 1;
            let line = raw.trim();

            match self.buffer.as_mut() {
                None if (self.is_start)(line) => {
                    trace!("line {}: record start", self.line_no);
                    self.buffer = Some(Block::new(vec![line.to_string()], self.line_no));
                }
                None => {
                    trace!("line {}: noise \"{line}\"", self.line_no);
                    continue;
                }
                Some(block) => block.lines.push(line.to_string()),
            }

            if (self.is_end)(line) {
                return self.buffer.take();
            }
        }

        self.finished = true;
        let partial = self.buffer.take()?;
        match self.trailing {
            TrailingBlock::Discard => {
                warn!(
                    "Discarding unterminated record starting at line {} ({} lines)",
                    partial.first_line,
                    partial.len()
                );
                None
            }
            TrailingBlock::Emit => {
                warn!(
                    "Emitting unterminated record starting at line {}",
                    partial.first_line
                );
                Some(partial)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    fn blocks(text: &str) -> Vec<Block> {
        let delimiters = Delimiters::default();
        segment(
            lines(text),
            |l| delimiters.is_start(l),
            |l| delimiters.is_end(l),
        )
        .collect()
    }

    #[test]
    fn test_two_records_with_noise() {
        let input = "<?xml version=\"1.0\"?>\n<collection>\n<record type=\"Authority\">\n  <leader>x</leader>\n</record>\n<record type=\"Authority\">\n</record>\n</collection>";
        let result = blocks(input);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].first_line(), 3);
        assert_eq!(result[0].len(), 3);
        assert_eq!(result[0].lines()[1], "<leader>x</leader>");
        assert_eq!(result[1].first_line(), 6);
    }

    #[test]
    fn test_trailing_block_discarded_by_default() {
        let input = "<record type=\"a\">\n</record>\n<record type=\"b\">\n<datafield tag=\"035\">";
        assert_eq!(blocks(input).len(), 1);
    }

    #[test]
    fn test_trailing_block_emitted_on_request() {
        let input = lines("<record type=\"a\">\n</record>\n<record type=\"b\">\n<x/>");
        let delimiters = Delimiters::default();
        let result: Vec<Block> = segment(
            input,
            |l| delimiters.is_start(l),
            |l| delimiters.is_end(l),
        )
        .with_trailing(TrailingBlock::Emit)
        .collect();
        assert_eq!(result.len(), 2);
        assert_eq!(result[1].lines(), &["<record type=\"b\">", "<x/>"]);
    }

    #[test]
    fn test_single_line_record() {
        let result = blocks("<record type=\"a\"><leader/></record>");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].len(), 1);
    }

    #[test]
    fn test_attribute_less_wrapper_is_noise() {
        // OAI wrapper <record> without attributes does not open a block
        let input = "<record>\n<header/>\n<metadata>\n<marc:record type=\"Authority\">\n<marc:leader/>\n</marc:record>\n</metadata>\n</record>";
        let result = blocks(input);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].lines()[0], "<marc:record type=\"Authority\">");
        assert_eq!(result[0].len(), 3);
    }

    #[test]
    fn test_lines_are_trimmed_and_concatenated() {
        let result = blocks("   <record type=\"a\">  \n\t<leader>abc</leader>\n  </record>");
        assert_eq!(
            result[0].text(),
            "<record type=\"a\"><leader>abc</leader></record>"
        );
    }

    #[test]
    fn test_block_count_matches_complete_pairs() {
        let mut input = String::new();
        for i in 0..25 {
            input.push_str("noise\n");
            input.push_str(&format!("<record id=\"{i}\">\n<leader/>\n</record>\n"));
        }
        input.push_str("<record id=\"tail\">\n<leader/>\n");
        assert_eq!(blocks(&input).len(), 25);
    }

    #[test]
    fn test_exhausted_segmenter_stays_exhausted() {
        let delimiters = Delimiters::default();
        let mut segmenter = segment(
            lines("<record a=\"1\">\n</record>"),
            |l| delimiters.is_start(l),
            |l| delimiters.is_end(l),
        );
        assert!(segmenter.next().is_some());
        assert!(segmenter.next().is_none());
        assert!(segmenter.next().is_none());
        assert_eq!(segmenter.lines_read(), 2);
    }

    #[test]
    fn test_custom_predicates() {
        let input = lines("x\nBEGIN\n1\n2\nEND\nBEGIN\nEND");
        let result: Vec<Block> =
            segment(input, |l| l == "BEGIN", |l| l == "END").collect();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].lines(), &["BEGIN", "1", "2", "END"]);
    }

    #[test]
    fn test_invalid_delimiter_pattern() {
        assert!(matches!(
            Delimiters::new("(", "</record>"),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
