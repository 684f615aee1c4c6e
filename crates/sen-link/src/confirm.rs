//! Two-step confirmation dialogs
//!
//! Destructive commands make the firmware print a warning, then a prompt, and
//! block until it reads an answer line. The flow runs through:
//!
//! ```text
//! Sent -> AwaitingPrompt -> AwaitingDecision -> AwaitingResolution -> Done
//! ```
//!
//! The answer comes from a [`DecisionProvider`], so the same flow serves an
//! interactive terminal, a scripted answer from the command line, or a test.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use sen_protocol::{ClassifiedLine, Command, ExportDocument, TerminalKind};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::collector::ResponseCollector;
use crate::error::LinkError;
use crate::extract::BulkExtractor;
use crate::transport::Transport;

/// Kinds of confirmation dialog the firmware runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfirmationFamily {
    /// `clear`
    ClearLog,
    /// `resetmeta`
    ResetMetadata,
    /// `meta <key> <value>` on a field that changes the CSV columns
    SetMetadata,
}

impl ConfirmationFamily {
    /// Terminal that means the change was applied
    pub fn confirmed_by(&self) -> TerminalKind {
        match self {
            ConfirmationFamily::ClearLog => TerminalKind::Cleared,
            ConfirmationFamily::ResetMetadata => TerminalKind::MetadataReset,
            ConfirmationFamily::SetMetadata => TerminalKind::MetadataSet,
        }
    }

    /// Returns true if `kind` means nothing was changed
    pub fn is_cancelled_by(&self, kind: TerminalKind) -> bool {
        match self {
            ConfirmationFamily::ClearLog | ConfirmationFamily::ResetMetadata => {
                kind == TerminalKind::Cancelled
            }
            ConfirmationFamily::SetMetadata => matches!(
                kind,
                TerminalKind::Cancelled
                    | TerminalKind::MetadataUnchanged
                    | TerminalKind::ExportHandoff
            ),
        }
    }

    /// Outcome implied by a line, if it resolves this family
    ///
    /// A firmware failure report (`❌ ERROR: Failed to clear log file`) ends
    /// the dialog as `Cancelled`; the line stays in the transcript.
    pub fn resolve(&self, line: &ClassifiedLine) -> Option<ConfirmationOutcome> {
        let kind = line.terminal()?;
        if kind == self.confirmed_by() {
            Some(ConfirmationOutcome::Confirmed)
        } else if self.is_cancelled_by(kind) || is_failure_report(line) {
            Some(ConfirmationOutcome::Cancelled)
        } else {
            None
        }
    }

    /// Returns true if `decision` asks the device to dump the log first
    pub fn is_export_decision(&self, decision: &str) -> bool {
        match self {
            ConfirmationFamily::SetMetadata => {
                let decision = decision.trim();
                decision.eq_ignore_ascii_case("download") || decision.eq_ignore_ascii_case("dump")
            }
            _ => false,
        }
    }
}

/// `❌ ERROR: ...` reported by the command itself
///
/// Lines that merely mention "error" (an echoed metadata value) and the
/// periodic sensor read failure do not end a dialog.
fn is_failure_report(line: &ClassifiedLine) -> bool {
    if !line.is_terminal(TerminalKind::Error) {
        return false;
    }
    let text = line
        .text
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    text.starts_with("ERROR") && !text.contains("sensor data")
}

impl fmt::Display for ConfirmationFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationFamily::ClearLog => f.write_str("clear log"),
            ConfirmationFamily::ResetMetadata => f.write_str("reset metadata"),
            ConfirmationFamily::SetMetadata => f.write_str("set metadata"),
        }
    }
}

/// How a dialog ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// The device applied the change
    Confirmed,
    /// The device reported that nothing changed
    Cancelled,
    /// No prompt, or no resolution, before the deadline
    TimedOut,
}

/// Everything observed during one dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationReport {
    pub outcome: ConfirmationOutcome,
    /// Whether the device asked for a decision
    pub prompted: bool,
    /// Decision forwarded to the device, if one was asked for
    pub decision: Option<String>,
    /// Control-plane lines in arrival order (telemetry removed)
    pub transcript: Vec<ClassifiedLine>,
    /// Log dumped by the device before the change, on the export branch
    pub backup: Option<ExportDocument>,
}

/// Supplies the answer to a confirmation prompt
#[async_trait]
pub trait DecisionProvider: Send {
    /// Answer for `family`, given everything the device printed so far
    async fn decide(&mut self, family: ConfirmationFamily, transcript: &[ClassifiedLine])
        -> String;
}

/// Always answers with the same string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedDecision(pub String);

impl FixedDecision {
    pub fn new(answer: impl Into<String>) -> Self {
        Self(answer.into())
    }

    pub fn yes() -> Self {
        Self::new("yes")
    }

    /// Anything but `yes` cancels; an empty line is what Enter sends
    pub fn cancel() -> Self {
        Self::new("")
    }
}

#[async_trait]
impl DecisionProvider for FixedDecision {
    async fn decide(&mut self, _family: ConfirmationFamily, _transcript: &[ClassifiedLine]) -> String {
        self.0.clone()
    }
}

/// Deadlines for each phase of a dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationTimeouts {
    /// Sent -> prompt (or early resolution)
    pub prompt: Duration,
    /// Decision -> resolution
    pub resolution: Duration,
    /// Export branch: the backup dump
    pub backup: Duration,
    /// Export branch: dump complete -> resolution
    pub after_backup: Duration,
}

/// Runs one confirmation dialog
pub struct ConfirmationFlow<'a> {
    collector: &'a ResponseCollector,
    family: ConfirmationFamily,
    timeouts: ConfirmationTimeouts,
}

impl<'a> ConfirmationFlow<'a> {
    pub fn new(
        collector: &'a ResponseCollector,
        family: ConfirmationFamily,
        timeouts: ConfirmationTimeouts,
    ) -> Self {
        Self {
            collector,
            family,
            timeouts,
        }
    }

    /// Send `command` and drive the dialog to completion
    pub async fn run(
        &self,
        transport: &mut dyn Transport,
        command: &Command,
        decider: &mut dyn DecisionProvider,
    ) -> Result<ConfirmationReport, LinkError> {
        let family = self.family;
        self.collector.send(transport, command).await?;

        // AwaitingPrompt
        let mut transcript = self
            .collector
            .collect_quiet(
                transport,
                Instant::now() + self.timeouts.prompt,
                |l| l.is_prompt() || family.resolve(l).is_some(),
            )
            .await?;

        let early = transcript.last().and_then(|l| family.resolve(l));
        if let Some(outcome) = early {
            debug!("{} resolved without a prompt: {:?}", family, outcome);
            return Ok(ConfirmationReport {
                outcome,
                prompted: false,
                decision: None,
                transcript,
                backup: None,
            });
        }

        if !transcript.last().is_some_and(|l| l.is_prompt()) {
            debug!("{}: no prompt before deadline", family);
            return Ok(ConfirmationReport {
                outcome: ConfirmationOutcome::TimedOut,
                prompted: false,
                decision: None,
                transcript,
                backup: None,
            });
        }

        // AwaitingDecision
        let decision = decider.decide(family, &transcript).await;
        self.collector.send_reply(transport, &decision).await?;

        // Export branch
        let mut backup = None;
        let mut resolution_window = self.timeouts.resolution;
        if family.is_export_decision(&decision) {
            info!("{}: device is dumping the log before the change", family);
            let extraction = BulkExtractor::new(self.collector)
                .extract(transport, Instant::now() + self.timeouts.backup)
                .await?;
            backup = Some(extraction.document);
            resolution_window = self.timeouts.after_backup;
        }

        // AwaitingResolution
        let resolution = self
            .collector
            .collect_quiet(transport, Instant::now() + resolution_window, |l| {
                family.resolve(l).is_some()
            })
            .await?;

        let outcome = resolution
            .last()
            .and_then(|l| family.resolve(l))
            .unwrap_or(ConfirmationOutcome::TimedOut);
        transcript.extend(resolution);

        debug!("{} finished: {:?}", family, outcome);
        Ok(ConfirmationReport {
            outcome,
            prompted: true,
            decision: Some(decision),
            transcript,
            backup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedTransport;
    use sen_protocol::classify;

    fn collector() -> ResponseCollector {
        ResponseCollector::new(Duration::from_millis(100), Duration::from_millis(200))
    }

    fn timeouts() -> ConfirmationTimeouts {
        ConfirmationTimeouts {
            prompt: Duration::from_secs(3),
            resolution: Duration::from_secs(3),
            backup: Duration::from_secs(15),
            after_backup: Duration::from_secs(5),
        }
    }

    /// Records what it was shown
    struct Recording {
        answer: &'static str,
        seen: Option<Vec<String>>,
    }

    #[async_trait]
    impl DecisionProvider for Recording {
        async fn decide(&mut self, _family: ConfirmationFamily, transcript: &[ClassifiedLine]) -> String {
            self.seen = Some(transcript.iter().map(|l| l.text.clone()).collect());
            self.answer.to_string()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_confirmed() {
        let mut transport = ScriptedTransport::new()
            .on_write(
                "clear",
                &[
                    (10, "⚠ WARNING: This will permanently delete the log file!\r\n"),
                    (20, "Type 'yes' to confirm deletion: "),
                ],
            )
            .on_write(
                "yes",
                &[
                    (10, "\r\n"),
                    (20, "⚠ Clearing CSV log file...\r\n"),
                    (30, "✓ Log file cleared!\r\n"),
                ],
            );
        let c = collector();
        let mut decider = Recording { answer: "yes", seen: None };

        let report = ConfirmationFlow::new(&c, ConfirmationFamily::ClearLog, timeouts())
            .run(&mut transport, &Command::clear_log(), &mut decider)
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
        assert!(report.prompted);
        assert_eq!(report.decision.as_deref(), Some("yes"));
        assert_eq!(transport.written, vec!["clear", "yes"]);
        let seen = decider.seen.unwrap();
        assert_eq!(seen.last().map(String::as_str), Some("Type 'yes' to confirm deletion:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancelled() {
        let mut transport = ScriptedTransport::new()
            .on_write("clear", &[(20, "Type 'yes' to confirm deletion: ")])
            .on_write("", &[(10, "❌ Clear operation cancelled.\r\n")]);
        let c = collector();

        let report = ConfirmationFlow::new(&c, ConfirmationFamily::ClearLog, timeouts())
            .run(&mut transport, &Command::clear_log(), &mut FixedDecision::cancel())
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Cancelled);
        assert_eq!(transport.written, vec!["clear", ""]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_failure_ends_dialog() {
        let mut transport = ScriptedTransport::new()
            .on_write("clear", &[(20, "Type 'yes' to confirm deletion: ")])
            .on_write(
                "yes",
                &[
                    (10, "⚠ Clearing CSV log file...\r\n"),
                    (20, "❌ ERROR: Failed to clear log file\r\n"),
                ],
            );
        let c = collector();
        let start = Instant::now();

        let report = ConfirmationFlow::new(&c, ConfirmationFamily::ClearLog, timeouts())
            .run(&mut transport, &Command::clear_log(), &mut FixedDecision::yes())
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Cancelled);
        assert!(start.elapsed() < timeouts().resolution);
        assert_eq!(
            report.transcript.last().map(|l| l.text.as_str()),
            Some("❌ ERROR: Failed to clear log file")
        );
    }

    #[test]
    fn test_error_words_in_values_do_not_resolve() {
        let family = ConfirmationFamily::SetMetadata;
        assert_eq!(family.resolve(&classify("   Current value: error_lab")), None);
        assert_eq!(
            family.resolve(&classify("❌ ERROR: Failed to read sensor data")),
            None
        );
        assert_eq!(
            ConfirmationFamily::ResetMetadata
                .resolve(&classify("❌ ERROR: Failed to reset metadata")),
            Some(ConfirmationOutcome::Cancelled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_prompt_times_out() {
        let mut transport = ScriptedTransport::new()
            .repeating(500, 60_000, "  Temperature:        22.10 C\r\n");
        let c = collector();
        let start = Instant::now();

        let report = ConfirmationFlow::new(&c, ConfirmationFamily::ClearLog, timeouts())
            .run(&mut transport, &Command::clear_log(), &mut FixedDecision::yes())
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::TimedOut);
        assert!(!report.prompted);
        assert!(report.transcript.is_empty());
        // Decision was never sent
        assert_eq!(transport.written, vec!["clear"]);
        assert!(start.elapsed() <= Duration::from_millis(200 + 3_000 + 100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_resolution_times_out() {
        let mut transport = ScriptedTransport::new()
            .on_write("resetmeta", &[(20, "Type 'yes' to confirm: ")]);
        let c = collector();

        let report = ConfirmationFlow::new(&c, ConfirmationFamily::ResetMetadata, timeouts())
            .run(&mut transport, &Command::reset_metadata(), &mut FixedDecision::yes())
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::TimedOut);
        assert!(report.prompted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_metadata_ignores_log_cleared_line() {
        let mut transport = ScriptedTransport::new()
            .on_write("resetmeta", &[(20, "Type 'yes' to confirm: ")])
            .on_write(
                "yes",
                &[
                    (10, "✓ Log file cleared\r\n"),
                    (20, "✓ Metadata reset to defaults\r\n"),
                ],
            );
        let c = collector();

        let report = ConfirmationFlow::new(&c, ConfirmationFamily::ResetMetadata, timeouts())
            .run(&mut transport, &Command::reset_metadata(), &mut FixedDecision::yes())
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
        assert!(report.transcript.last().unwrap().is_terminal(TerminalKind::MetadataReset));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_metadata_without_prompt() {
        let mut transport = ScriptedTransport::new().on_write(
            "meta user Jane",
            &[(10, "Metadata saved to NVS\r\n"), (20, "Metadata set: user = Jane\r\n")],
        );
        let c = collector();
        let command = Command::set_metadata("user", "Jane").unwrap();

        let report = ConfirmationFlow::new(&c, ConfirmationFamily::SetMetadata, timeouts())
            .run(&mut transport, &command, &mut FixedDecision::yes())
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Confirmed);
        assert!(!report.prompted);
        assert!(report.decision.is_none());
        assert_eq!(transport.written, vec!["meta user Jane"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_metadata_unchanged_is_cancelled() {
        let mut transport = ScriptedTransport::new().on_write(
            "meta user Jane",
            &[(10, "ℹ Metadata unchanged (same value).\r\n")],
        );
        let c = collector();
        let command = Command::set_metadata("user", "Jane").unwrap();

        let report = ConfirmationFlow::new(&c, ConfirmationFamily::SetMetadata, timeouts())
            .run(&mut transport, &command, &mut FixedDecision::yes())
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Cancelled);
        assert!(!report.prompted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_metadata_export_branch() {
        let mut transport = ScriptedTransport::new()
            .on_write(
                "meta project Lab",
                &[
                    (10, "  1. Type 'download' to save existing log first\r\n"),
                    (20, "  2. Type 'yes' to clear log and set new metadata\r\n"),
                    (30, "Your choice: "),
                ],
            )
            .on_write(
                "download",
                &[
                    (10, "📄 Outputting CSV data for download...\r\n"),
                    (20, "[COMMENT] # Device: lab-1\r\n"),
                    (30, "[HEADER] t,v\r\n"),
                    (40, "[   1] 1,2\r\n"),
                    (50, "✓ Displayed 3 lines (40 bytes total)\r\n"),
                    (60, "✓ CSV output complete. Save it on the host before continuing.\r\n"),
                    (70, "ℹ You can now:\r\n"),
                ],
            );
        let c = collector();
        let command = Command::set_metadata("project", "Lab").unwrap();

        let report = ConfirmationFlow::new(&c, ConfirmationFamily::SetMetadata, timeouts())
            .run(&mut transport, &command, &mut FixedDecision::new("download"))
            .await
            .unwrap();

        assert_eq!(report.outcome, ConfirmationOutcome::Cancelled);
        assert!(report.prompted);
        let backup = report.backup.unwrap();
        assert_eq!(backup.comments, vec!["# Device: lab-1"]);
        assert_eq!(backup.header.as_deref(), Some("t,v"));
        assert_eq!(backup.rows, vec!["1,2"]);
        assert!(report.transcript.last().unwrap().is_terminal(TerminalKind::ExportHandoff));
    }

    #[test]
    fn test_export_decision_only_for_metadata() {
        assert!(ConfirmationFamily::SetMetadata.is_export_decision("download"));
        assert!(ConfirmationFamily::SetMetadata.is_export_decision(" DUMP "));
        assert!(!ConfirmationFamily::SetMetadata.is_export_decision("yes"));
        assert!(!ConfirmationFamily::ClearLog.is_export_decision("download"));
    }
}
