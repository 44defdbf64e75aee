//! Line-level patch application.
//!
//! File text is held as a list of lines plus a trailing-newline flag so that
//! rendering a parsed file reproduces it byte for byte (modulo `\r`).

use linelock_types::LineNumber;
use thiserror::Error;

/// Errors from splicing or deleting lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The line does not exist.
    #[error("line {line} is out of range (file has {len} lines)")]
    OutOfRange {
        /// Requested line.
        line: LineNumber,
        /// Number of lines in the file.
        len: usize,
    },

    /// A replacement must contain at least one line.
    #[error("replacement must contain at least one line")]
    EmptyReplacement,

    /// A file always keeps at least one line.
    #[error("cannot delete the only line of a file")]
    LastLine,
}

/// Parsed file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// Lines without terminators. Never empty.
    pub lines: Vec<String>,
    /// Whether the text ended with a newline.
    pub trailing_newline: bool,
}

impl Content {
    /// Split text into lines.
    ///
    /// Empty text yields a single empty line.
    pub fn parse(text: &str) -> Self {
        let trailing_newline = text.ends_with('\n');
        let body = if trailing_newline {
            &text[..text.len() - 1]
        } else {
            text
        };
        let lines = body
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect();
        Self {
            lines,
            trailing_newline,
        }
    }

    /// Content built from lines, with a trailing newline.
    pub fn from_lines(lines: Vec<String>) -> Self {
        let lines = if lines.is_empty() {
            vec![String::new()]
        } else {
            lines
        };
        Self {
            lines,
            trailing_newline: true,
        }
    }

    /// Join lines back into text.
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline {
            out.push('\n');
        }
        out
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether there are no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Text of one line.
    pub fn line(&self, line: LineNumber) -> Option<&str> {
        self.lines.get(line.index()).map(String::as_str)
    }

    /// Replace one line with `replacement`, returning the removed text.
    pub fn splice(
        &mut self,
        at: LineNumber,
        replacement: Vec<String>,
    ) -> Result<String, PatchError> {
        if replacement.is_empty() {
            return Err(PatchError::EmptyReplacement);
        }
        self.check(at)?;
        let removed = self
            .lines
            .splice(at.index()..=at.index(), replacement)
            .collect::<Vec<_>>();
        Ok(removed.into_iter().next().unwrap_or_default())
    }

    /// Remove one line, returning its text.
    pub fn delete(&mut self, at: LineNumber) -> Result<String, PatchError> {
        self.check(at)?;
        if self.lines.len() == 1 {
            return Err(PatchError::LastLine);
        }
        Ok(self.lines.remove(at.index()))
    }

    fn check(&self, at: LineNumber) -> Result<(), PatchError> {
        if at.index() >= self.lines.len() {
            return Err(PatchError::OutOfRange {
                line: at,
                len: self.lines.len(),
            });
        }
        Ok(())
    }
}

/// Normalize replacement lines: embedded newlines become separate lines and
/// carriage returns are dropped.
pub fn sanitize_lines(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .flat_map(|line| {
            line.replace('\r', "")
                .split('\n')
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Whether a line counts as empty for deletion purposes.
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}
