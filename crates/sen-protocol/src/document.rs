//! Structured export reconstructed from bracket records
//!
//! A bulk dump arrives as `[COMMENT]`, `[HEADER]` and numbered (or `[DATA]`)
//! lines. [`ExportDocument::accept`] applies the acceptance rules one record at
//! a time; [`ExportDocument::write_to`] serializes the result in the persisted
//! file layout:
//!
//! ```text
//! # comment 1
//! # comment 2
//! #
//! header
//! row 1
//! row 2
//! ```

use std::io::{self, Write};

use crate::classify::{BracketRecord, BracketTag};

/// Column separator a header or row must contain
pub const FIELD_SEPARATOR: char = ',';

/// Payloads whose non-printable share reaches this percentage are rejected
pub const MAX_NON_PRINTABLE_PERCENT: usize = 20;

/// What [`ExportDocument::accept`] did with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordDisposition {
    /// Stored as a metadata comment
    Comment,
    /// Stored as the header
    Header,
    /// Valid header, but one was already stored
    DuplicateHeader,
    /// Appended as a data row
    Row,
    /// Header or row payload failed validation
    Corrupted,
    /// Tag does not belong in an export
    Ignored,
}

/// What to do with a document that has no header and no rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyExportPolicy {
    /// Write nothing
    #[default]
    SkipEmpty,
    /// Write the comment preamble on its own
    AllowCommentsOnly,
}

/// Comments, at most one header and ordered rows of a CSV export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportDocument {
    /// Metadata comments, verbatim, in arrival order
    pub comments: Vec<String>,
    /// First valid header
    pub header: Option<String>,
    /// Data rows in arrival order
    pub rows: Vec<String>,
}

impl ExportDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one bracket record
    pub fn accept(&mut self, record: &BracketRecord) -> RecordDisposition {
        match &record.tag {
            BracketTag::Comment => {
                self.comments.push(record.payload.clone());
                RecordDisposition::Comment
            }
            BracketTag::Header => {
                if !is_valid_header(&record.payload) {
                    RecordDisposition::Corrupted
                } else if self.header.is_some() {
                    RecordDisposition::DuplicateHeader
                } else {
                    self.header = Some(record.payload.clone());
                    RecordDisposition::Header
                }
            }
            BracketTag::Index(_) | BracketTag::Data => {
                if is_valid_row(&record.payload) {
                    self.rows.push(record.payload.clone());
                    RecordDisposition::Row
                } else {
                    RecordDisposition::Corrupted
                }
            }
            BracketTag::Other(_) => RecordDisposition::Ignored,
        }
    }

    /// True if a header or at least one row was captured
    pub fn has_data(&self) -> bool {
        self.header.is_some() || !self.rows.is_empty()
    }

    /// True if nothing at all was captured
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty() && !self.has_data()
    }

    /// Whether this document should be persisted under `policy`
    pub fn should_write(&self, policy: EmptyExportPolicy) -> bool {
        match policy {
            EmptyExportPolicy::SkipEmpty => self.has_data(),
            EmptyExportPolicy::AllowCommentsOnly => !self.is_empty(),
        }
    }

    /// Serialize in the persisted file layout
    ///
    /// The `#` separator line is only written when there are comments. Every
    /// line ends with `\n`; there is no trailing blank line.
    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        if !self.comments.is_empty() {
            for comment in &self.comments {
                writeln!(out, "# {}", comment)?;
            }
            writeln!(out, "#")?;
        }
        if let Some(header) = &self.header {
            writeln!(out, "{}", header)?;
        }
        for row in &self.rows {
            writeln!(out, "{}", row)?;
        }
        out.flush()
    }

    /// Serialize to a string
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// C0 control characters (below U+0020) other than tab, CR and LF
///
/// DEL and the C1 range are not counted.
pub fn is_non_printable(c: char) -> bool {
    c < ' ' && !matches!(c, '\t' | '\r' | '\n')
}

/// Number of [non-printable](is_non_printable) characters
pub fn non_printable_count(payload: &str) -> usize {
    payload.chars().filter(|&c| is_non_printable(c)).count()
}

/// Share of non-printable characters, 0.0 for an empty payload
pub fn non_printable_ratio(payload: &str) -> f64 {
    let total = payload.chars().count();
    if total == 0 {
        return 0.0;
    }
    non_printable_count(payload) as f64 / total as f64
}

fn below_corruption_threshold(payload: &str) -> bool {
    let total = payload.chars().count();
    non_printable_count(payload) * 100 < total * MAX_NON_PRINTABLE_PERCENT
}

/// Header acceptance: separator present, non-printable share below 20%
pub fn is_valid_header(payload: &str) -> bool {
    payload.contains(FIELD_SEPARATOR) && below_corruption_threshold(payload)
}

/// Row acceptance: the header rules, and no C0 control character except tab
pub fn is_valid_row(payload: &str) -> bool {
    is_valid_header(payload) && non_printable_count(payload) == 0
}
