//! SEN66 Console Protocol Library
//!
//! The SEN66 monitor firmware speaks a line-oriented, human-readable console
//! dialect. This crate holds the pure (I/O free) part of talking to it:
//!
//! - **Commands**: validated command lines (`dump`, `clear`, `rtc sync <unix>`, ...)
//! - **Classification**: one ordered rule list mapping every console line to
//!   a bracket record, terminal marker, confirmation prompt, measurement marker
//!   or plain text
//! - **Export documents**: reconstruction of a CSV export from `[tag] payload`
//!   records, with corruption filtering and the persisted file layout
//!
//! # Example
//!
//! ```rust
//! use sen_protocol::{classify, ExportDocument, LineClass, TerminalKind};
//!
//! let mut doc = ExportDocument::new();
//! for line in ["[COMMENT] session=42", "[HEADER] t,v", "[   1] 100,5", "✓ Displayed 1 lines"] {
//!     let line = classify(line);
//!     if let Some(record) = line.bracket() {
//!         doc.accept(record);
//!     }
//!     if line.class == LineClass::Terminal(TerminalKind::BulkComplete) {
//!         break;
//!     }
//! }
//!
//! assert_eq!(doc.render(), "# session=42\n#\nt,v\n100,5\n");
//! ```

pub mod classify;
pub mod command;
pub mod document;
pub mod error;

pub use classify::{
    classify, decode_line, is_noise, parse_bracket, BracketRecord, BracketTag, ClassifiedLine,
    LineClass, MeasurementMark, TerminalKind,
};
pub use command::{validate_utc_offset, Command, PrefKey, UTC_OFFSET_RANGE};
pub use document::{EmptyExportPolicy, ExportDocument, RecordDisposition};
pub use error::ProtocolError;
