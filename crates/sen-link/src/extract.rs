//! Bulk export extraction
//!
//! Reads `[tag] payload` records until the device reports the dump complete
//! (or the deadline passes) and folds them into an [`ExportDocument`].
//! Telemetry interleaved with the dump never matches a bracket record and is
//! ignored along with every other untagged line.

use sen_protocol::{ClassifiedLine, ExportDocument, RecordDisposition, TerminalKind};
use tokio::time::Instant;
use tracing::debug;

use crate::collector::ResponseCollector;
use crate::error::LinkError;
use crate::transport::Transport;

/// Per-extraction record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    /// Bracket records seen
    pub records: usize,
    /// Headers or rows dropped as corrupted
    pub corrupted: usize,
    /// Valid headers after the first
    pub duplicate_headers: usize,
    /// Whether the completion marker was seen
    pub completed: bool,
}

/// Result of one bulk transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub document: ExportDocument,
    pub stats: ExtractionStats,
}

/// Reconstructs export documents from a dump in progress
#[derive(Debug, Clone)]
pub struct BulkExtractor<'a> {
    collector: &'a ResponseCollector,
}

impl<'a> BulkExtractor<'a> {
    pub fn new(collector: &'a ResponseCollector) -> Self {
        Self { collector }
    }

    /// Read a dump that has already been requested
    pub async fn extract(
        &self,
        transport: &mut dyn Transport,
        deadline: Instant,
    ) -> Result<Extraction, LinkError> {
        let lines = self
            .collector
            .collect(transport, deadline, |l| {
                l.is_terminal(TerminalKind::BulkComplete)
            })
            .await?;
        Ok(fold_records(&lines))
    }
}

/// Apply the acceptance rules to already collected lines
pub fn fold_records(lines: &[ClassifiedLine]) -> Extraction {
    let mut extraction = Extraction::default();
    let stats = &mut extraction.stats;

    for line in lines {
        if line.is_terminal(TerminalKind::BulkComplete) {
            stats.completed = true;
            break;
        }
        let Some(record) = line.bracket() else {
            continue;
        };
        stats.records += 1;
        match extraction.document.accept(record) {
            RecordDisposition::Corrupted => stats.corrupted += 1,
            RecordDisposition::DuplicateHeader => stats.duplicate_headers += 1,
            _ => {}
        }
    }

    debug!(
        "Extracted {} comments, {} header, {} rows ({} corrupted records dropped, {} extra headers, complete: {})",
        extraction.document.comments.len(),
        usize::from(extraction.document.header.is_some()),
        extraction.document.rows.len(),
        stats.corrupted,
        stats.duplicate_headers,
        stats.completed
    );

    extraction
}
