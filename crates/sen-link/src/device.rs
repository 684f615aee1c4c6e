//! High-level monitor operations
//!
//! [`DeviceClient`] pairs a [`Session`] with the engine and exposes one method
//! per console command. Every method borrows the session's transport for the
//! duration of the call, applies the configured deadline, and drops the
//! transport if it fails underneath.

use std::future::Future;
use std::time::Duration;

use sen_protocol::{
    validate_utc_offset, ClassifiedLine, Command, LineClass, MeasurementMark, PrefKey,
    TerminalKind,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::collector::{NoiseFilter, ResponseCollector};
use crate::config::LinkConfig;
use crate::confirm::{
    ConfirmationFamily, ConfirmationFlow, ConfirmationReport, ConfirmationTimeouts,
    DecisionProvider,
};
use crate::error::LinkError;
use crate::extract::{BulkExtractor, Extraction};
use crate::session::{Session, SessionState};
use crate::transport::{LineTransport, Transport};

/// One periodic measurement block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementBlock {
    pub lines: Vec<ClassifiedLine>,
    /// False if the block was joined after its start line
    pub complete: bool,
}

impl MeasurementBlock {
    /// Sequence number from `--- Measurement #N ...`
    pub fn number(&self) -> Option<u64> {
        let start = self.lines.first()?;
        let rest = start.text.split_once("Measurement #")?.1;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }
}

/// Last complete Start..Summary block in `lines`
pub fn last_measurement_block(lines: &[ClassifiedLine]) -> Option<MeasurementBlock> {
    let mut current: Option<Vec<ClassifiedLine>> = None;
    let mut last = None;

    for line in lines {
        match line.measurement() {
            Some(MeasurementMark::Start) => current = Some(vec![line.clone()]),
            Some(MeasurementMark::Summary) => {
                if let Some(mut block) = current.take() {
                    block.push(line.clone());
                    last = Some(block);
                }
            }
            None => {
                if let Some(block) = current.as_mut() {
                    block.push(line.clone());
                }
            }
        }
    }

    last.map(|lines| MeasurementBlock {
        lines,
        complete: true,
    })
}

/// Lines of a simple command and the terminal that ended them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub lines: Vec<ClassifiedLine>,
    pub terminal: Option<TerminalKind>,
}

impl CommandReply {
    fn from_lines(lines: Vec<ClassifiedLine>) -> Self {
        let terminal = lines.iter().rev().find_map(ClassifiedLine::terminal);
        Self { lines, terminal }
    }

    /// True if the reply ended with `kind`
    pub fn ended_with(&self, kind: TerminalKind) -> bool {
        self.terminal == Some(kind)
    }

    /// True if the device reported an error
    pub fn is_error(&self) -> bool {
        self.lines
            .iter()
            .any(|l| l.is_terminal(TerminalKind::Error))
    }
}

/// How `export_twa` ended on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwaStatus {
    Exported,
    Failed,
    TimedOut,
}

/// Result of regenerating and downloading the TWA export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwaExport {
    pub status: TwaStatus,
    /// Progress lines printed while computing
    pub lines: Vec<ClassifiedLine>,
    /// Downloaded export, present when `status` is `Exported`
    pub extraction: Option<Extraction>,
}

/// Command-level client for one monitor
#[derive(Debug)]
pub struct DeviceClient {
    session: Session,
    config: LinkConfig,
    collector: ResponseCollector,
}

impl Default for DeviceClient {
    fn default() -> Self {
        Self::new(LinkConfig::default())
    }
}

impl DeviceClient {
    pub fn new(config: LinkConfig) -> Self {
        let collector = ResponseCollector::from_config(&config);
        Self {
            session: Session::new(),
            config,
            collector,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Open a serial port
    pub fn connect(&mut self, port: &str, baud: u32) -> Result<(), LinkError> {
        self.session.connect(port, baud, self.config.partial_flush())
    }

    /// Adopt a raw byte stream, framed with the configured partial-flush window
    pub fn attach_stream<T>(&mut self, label: &str, baud: u32, io: T) -> Result<(), LinkError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let transport =
            LineTransport::new(label, io).with_partial_flush(self.config.partial_flush());
        self.session.attach(label, baud, Box::new(transport))
    }

    /// Adopt an open transport
    pub fn attach(
        &mut self,
        label: &str,
        baud: u32,
        transport: Box<dyn Transport>,
    ) -> Result<(), LinkError> {
        self.session.attach(label, baud, transport)
    }

    pub fn disconnect(&mut self) -> Result<(), LinkError> {
        self.session.disconnect()
    }

    fn deadline(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    /// Most recent measurement block
    ///
    /// Looks at output already in flight first; if it holds no complete
    /// block, waits for the next one.
    pub async fn status(&mut self) -> Result<Option<MeasurementBlock>, LinkError> {
        let result = self.status_inner().await;
        self.session.release_on_failure(result)
    }

    async fn status_inner(&mut self) -> Result<Option<MeasurementBlock>, LinkError> {
        let timeouts = &self.config.timeouts;
        let transport = self.session.transport()?;
        let is_summary = |l: &ClassifiedLine| l.measurement() == Some(MeasurementMark::Summary);

        let pending = self
            .collector
            .collect(transport, Self::deadline(timeouts.status_drain_ms), is_summary)
            .await?;
        if let Some(block) = last_measurement_block(&pending) {
            return Ok(Some(block));
        }

        debug!("No buffered measurement, waiting for the next block");
        let next = self
            .collector
            .collect(transport, Self::deadline(timeouts.status_wait_ms), is_summary)
            .await?;
        if let Some(block) = last_measurement_block(&next) {
            return Ok(Some(block));
        }

        // Joined mid-block: keep the tail if it reached the summary line
        let reached_summary = next.last().is_some_and(is_summary);
        Ok(reached_summary.then_some(MeasurementBlock {
            lines: next,
            complete: false,
        }))
    }

    /// `rtc status`
    pub async fn rtc_status(&mut self) -> Result<CommandReply, LinkError> {
        let ms = self.config.timeouts.rtc_status_ms;
        let result = self
            .query(&Command::rtc_status(), ms, NoiseFilter::Skip, |l| {
                l.is_terminal(TerminalKind::RtcStatus)
            })
            .await;
        self.session.release_on_failure(result)
    }

    /// `rtc sync <unix>`
    pub async fn rtc_sync(&mut self, unix_seconds: u64) -> Result<CommandReply, LinkError> {
        let ms = self.config.timeouts.rtc_sync_ms;
        let result = self
            .query(&Command::rtc_sync(unix_seconds), ms, NoiseFilter::Skip, |l| {
                matches!(
                    l.terminal(),
                    Some(TerminalKind::RtcSynced | TerminalKind::Error)
                )
            })
            .await;
        self.session.release_on_failure(result)
    }

    /// `config`
    pub async fn show_config(&mut self) -> Result<CommandReply, LinkError> {
        let result = self.table(Command::show_config()).await;
        self.session.release_on_failure(result)
    }

    /// `metadata`
    pub async fn show_metadata(&mut self) -> Result<CommandReply, LinkError> {
        let result = self.table(Command::show_metadata()).await;
        self.session.release_on_failure(result)
    }

    /// `prefs <key> <value>`
    pub async fn set_pref(&mut self, key: PrefKey, value: i32) -> Result<CommandReply, LinkError> {
        let command = match key {
            PrefKey::Utc => Command::set_utc_offset(value)?,
            _ => Command::set_pref(key, value),
        };
        let result = self.apply_setting(command).await;
        self.session.release_on_failure(result)
    }

    /// `prefs utc <offset>`, validated before anything is sent
    pub async fn set_timezone(&mut self, offset: i32) -> Result<CommandReply, LinkError> {
        validate_utc_offset(offset)?;
        self.set_pref(PrefKey::Utc, offset).await
    }

    /// `meta <key> <value>`, answering the column-change dialog if it appears
    pub async fn set_metadata(
        &mut self,
        key: &str,
        value: &str,
        decider: &mut dyn DecisionProvider,
    ) -> Result<ConfirmationReport, LinkError> {
        let command = Command::set_metadata(key, value)?;
        let timeouts = &self.config.timeouts;
        let phases = ConfirmationTimeouts {
            prompt: Duration::from_millis(timeouts.meta_prompt_ms),
            resolution: Duration::from_millis(timeouts.meta_resolution_ms),
            backup: Duration::from_millis(timeouts.backup_dump_ms),
            after_backup: Duration::from_millis(timeouts.backup_handoff_ms),
        };
        let result = self
            .confirm(ConfirmationFamily::SetMetadata, &command, phases, decider)
            .await;
        self.session.release_on_failure(result)
    }

    /// `clear`
    pub async fn clear_log(
        &mut self,
        decider: &mut dyn DecisionProvider,
    ) -> Result<ConfirmationReport, LinkError> {
        let timeouts = &self.config.timeouts;
        let phases = ConfirmationTimeouts {
            prompt: Duration::from_millis(timeouts.clear_prompt_ms),
            resolution: Duration::from_millis(timeouts.clear_resolution_ms),
            backup: Duration::ZERO,
            after_backup: Duration::ZERO,
        };
        let result = self
            .confirm(ConfirmationFamily::ClearLog, &Command::clear_log(), phases, decider)
            .await;
        self.session.release_on_failure(result)
    }

    /// `resetmeta`
    pub async fn reset_metadata(
        &mut self,
        decider: &mut dyn DecisionProvider,
    ) -> Result<ConfirmationReport, LinkError> {
        let timeouts = &self.config.timeouts;
        let phases = ConfirmationTimeouts {
            prompt: Duration::from_millis(timeouts.reset_prompt_ms),
            resolution: Duration::from_millis(timeouts.reset_resolution_ms),
            backup: Duration::ZERO,
            after_backup: Duration::ZERO,
        };
        let result = self
            .confirm(
                ConfirmationFamily::ResetMetadata,
                &Command::reset_metadata(),
                phases,
                decider,
            )
            .await;
        self.session.release_on_failure(result)
    }

    /// `dump`: download the raw log
    pub async fn download_log(&mut self) -> Result<Extraction, LinkError> {
        let result = self.dump(Command::dump_log()).await;
        self.session.release_on_failure(result)
    }

    /// `export_twa`, then `dump_twa` if the device produced the file
    pub async fn export_twa(&mut self) -> Result<TwaExport, LinkError> {
        let result = self.export_twa_inner().await;
        self.session.release_on_failure(result)
    }

    async fn export_twa_inner(&mut self) -> Result<TwaExport, LinkError> {
        let reply = self
            .query(
                &Command::export_twa(),
                self.config.timeouts.twa_export_ms,
                NoiseFilter::Skip,
                |l| {
                    matches!(
                        l.terminal(),
                        Some(TerminalKind::TwaExported | TerminalKind::TwaFailed)
                    )
                },
            )
            .await?;

        let status = match reply.terminal {
            Some(TerminalKind::TwaExported) => TwaStatus::Exported,
            Some(TerminalKind::TwaFailed) => TwaStatus::Failed,
            _ => TwaStatus::TimedOut,
        };
        info!("TWA export on device: {:?}", status);

        let extraction = if status == TwaStatus::Exported {
            Some(self.dump(Command::dump_twa()).await?)
        } else {
            None
        };

        Ok(TwaExport {
            status,
            lines: reply.lines,
            extraction,
        })
    }

    /// Stream console output until `shutdown` resolves
    pub async fn monitor<F, S>(&mut self, shutdown: F, sink: S) -> Result<usize, LinkError>
    where
        F: Future<Output = ()> + Send,
        S: FnMut(&ClassifiedLine) + Send,
    {
        let poll_interval = self.config.poll_interval();
        let result = match self.session.transport() {
            Ok(transport) => crate::monitor::monitor(transport, poll_interval, shutdown, sink).await,
            Err(e) => Err(e),
        };
        self.session.release_on_failure(result)
    }

    /// Send `command` and collect until `stop`
    async fn query<F>(
        &mut self,
        command: &Command,
        timeout_ms: u64,
        filter: NoiseFilter,
        stop: F,
    ) -> Result<CommandReply, LinkError>
    where
        F: FnMut(&ClassifiedLine) -> bool + Send,
    {
        let transport = self.session.transport()?;
        self.collector.send(transport, command).await?;
        let lines = self
            .collector
            .collect_filtered(transport, Self::deadline(timeout_ms), filter, stop)
            .await?;
        Ok(CommandReply::from_lines(lines))
    }

    /// Tables end with a tip; a line or two may trail it
    async fn table(&mut self, command: Command) -> Result<CommandReply, LinkError> {
        let timeouts = self.config.timeouts.clone();
        let mut reply = self
            .query(&command, timeouts.table_ms, NoiseFilter::Skip, |l| {
                l.is_terminal(TerminalKind::Tip)
            })
            .await?;

        if reply.ended_with(TerminalKind::Tip) {
            let transport = self.session.transport()?;
            let trailing = self
                .collector
                .drain(
                    transport,
                    Duration::from_millis(timeouts.table_drain_ms),
                    NoiseFilter::Skip,
                )
                .await?;
            reply
                .lines
                .extend(trailing.into_iter().take_while(|l| l.measurement().is_none()));
        }
        Ok(reply)
    }

    /// `prefs` replies: stop on the first acknowledgement, or when telemetry resumes
    async fn apply_setting(&mut self, command: Command) -> Result<CommandReply, LinkError> {
        let timeouts = self.config.timeouts.clone();
        let mut reply = self
            .query(&command, timeouts.pref_ms, NoiseFilter::Keep, |l| {
                l.is_terminal(TerminalKind::SettingApplied)
                    || l.class == LineClass::Measurement(MeasurementMark::Start)
            })
            .await?;

        if reply
            .lines
            .last()
            .is_some_and(|l| l.measurement().is_some())
        {
            reply.lines.pop();
        } else if reply.ended_with(TerminalKind::SettingApplied) {
            let transport = self.session.transport()?;
            let trailing = self
                .collector
                .drain(
                    transport,
                    Duration::from_millis(timeouts.table_drain_ms),
                    NoiseFilter::Skip,
                )
                .await?;
            reply.lines.extend(
                trailing
                    .into_iter()
                    .filter(|l| l.is_terminal(TerminalKind::SettingApplied)),
            );
        }
        reply.terminal = reply.lines.iter().rev().find_map(ClassifiedLine::terminal);
        Ok(reply)
    }

    async fn confirm(
        &mut self,
        family: ConfirmationFamily,
        command: &Command,
        timeouts: ConfirmationTimeouts,
        decider: &mut dyn DecisionProvider,
    ) -> Result<ConfirmationReport, LinkError> {
        let transport = self.session.transport()?;
        let report = ConfirmationFlow::new(&self.collector, family, timeouts)
            .run(transport, command, decider)
            .await?;
        info!("{}: {:?}", family, report.outcome);
        Ok(report)
    }

    async fn dump(&mut self, command: Command) -> Result<Extraction, LinkError> {
        let deadline = Self::deadline(self.config.timeouts.dump_ms);
        let transport = self.session.transport()?;
        self.collector.send(transport, &command).await?;
        BulkExtractor::new(&self.collector)
            .extract(transport, deadline)
            .await
    }
}
