//! Export files on disk

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};
use sen_protocol::{EmptyExportPolicy, ExportDocument};
use tracing::{debug, info};

/// Which file a default name is generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Log,
    Twa,
    Backup,
}

impl ExportKind {
    fn stem(&self) -> &'static str {
        match self {
            ExportKind::Log => "sensor_log",
            ExportKind::Twa => "twa_export",
            ExportKind::Backup => "sensor_log_backup",
        }
    }
}

/// `<stem>_YYYYmmdd_HHMMSS.csv`
pub fn timestamped_name(kind: ExportKind, now: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!("{}_{}.csv", kind.stem(), now.format("%Y%m%d_%H%M%S")))
}

/// Name for the TWA export that accompanies a log download
///
/// `data.csv` becomes `data_with_twa.csv`.
pub fn twa_companion(log_path: &Path) -> PathBuf {
    let stem = log_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sensor_log".to_string());
    log_path.with_file_name(format!("{}_with_twa.csv", stem))
}

/// What happened to a document handed to [`save_document`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Written { path: PathBuf, rows: usize, bytes: u64 },
    /// Nothing worth writing under the active policy
    Skipped,
}

/// Persist `doc` at `path` unless `policy` says it is empty
pub fn save_document(
    doc: &ExportDocument,
    path: &Path,
    policy: EmptyExportPolicy,
) -> anyhow::Result<SaveOutcome> {
    if !doc.should_write(policy) {
        debug!("Not writing {}: nothing captured", path.display());
        return Ok(SaveOutcome::Skipped);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    doc.write_to(&mut out)
        .and_then(|()| out.flush())
        .with_context(|| format!("failed to write {}", path.display()))?;

    let bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or_default();
    info!("Saved {} ({} rows, {} bytes)", path.display(), doc.rows.len(), bytes);
    Ok(SaveOutcome::Written {
        path: path.to_path_buf(),
        rows: doc.rows.len(),
        bytes,
    })
}
