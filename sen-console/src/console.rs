//! Interactive console and command execution

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Local, Utc};
use sen_detect::PortScanner;
use sen_link::{
    ConfirmationFamily, ConfirmationReport, DecisionProvider, DeviceClient, LinkError, TwaStatus,
};
use sen_protocol::{ClassifiedLine, PrefKey, ProtocolError};
use sen_sim::{spawn_virtual_monitor, VirtualMonitor, VirtualMonitorCommand, VIRTUAL_PORT_NAME};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::Command;
use crate::export::{save_document, timestamped_name, twa_companion, ExportKind, SaveOutcome};
use crate::render;
use crate::settings::Settings;

/// One thing the operator asked for
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Status,
    Clear,
    Download { output: Option<PathBuf>, no_twa: bool },
    ExportTwa { output: Option<PathBuf> },
    RtcStatus,
    RtcSync,
    Config,
    Set { key: String, value: i32 },
    Timezone(i32),
    Metadata,
    Meta { key: String, value: String },
    ResetMeta,
    Monitor,
    ListPorts,
    About,
    Help,
    Exit,
}

impl Action {
    /// Whether the action talks to the device
    pub fn needs_device(&self) -> bool {
        !matches!(
            self,
            Action::ListPorts | Action::About | Action::Help | Action::Exit
        )
    }

    /// Map a command-line subcommand; `None` for `console`
    pub fn from_command(command: Command) -> Option<Self> {
        Some(match command {
            Command::Console => return None,
            Command::Status => Action::Status,
            Command::Clear => Action::Clear,
            Command::Download { output, no_twa } => Action::Download { output, no_twa },
            Command::ExportTwa { output } => Action::ExportTwa { output },
            Command::RtcStatus => Action::RtcStatus,
            Command::RtcSync => Action::RtcSync,
            Command::Config => Action::Config,
            Command::Set { key, value } => Action::Set { key, value },
            Command::Timezone { offset } => Action::Timezone(offset),
            Command::Metadata => Action::Metadata,
            Command::Meta { key, value } => Action::Meta { key, value },
            Command::ResetMeta => Action::ResetMeta,
            Command::Monitor => Action::Monitor,
            Command::ListPorts => Action::ListPorts,
            Command::About => Action::About,
        })
    }
}

/// Parse one console line
///
/// `Ok(None)` for a blank line; `Err` carries the message to show.
pub fn parse_line(line: &str) -> Result<Option<Action>, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((verb, args)) = parts.split_first() else {
        return Ok(None);
    };
    let file_arg = || args.first().map(PathBuf::from);

    let action = match verb.to_lowercase().as_str() {
        "exit" | "quit" | "q" => Action::Exit,
        "help" | "?" => Action::Help,
        "list-ports" | "ports" => Action::ListPorts,
        "about" => Action::About,
        "status" => Action::Status,
        "clear" => Action::Clear,
        "download" => Action::Download {
            output: file_arg(),
            no_twa: false,
        },
        "twa" | "export_twa" => Action::ExportTwa { output: file_arg() },
        "rtc" => match args.first().map(|a| a.to_lowercase()).as_deref() {
            Some("status") => Action::RtcStatus,
            Some("sync") => Action::RtcSync,
            _ => return Err("Usage: rtc status|sync".to_string()),
        },
        "config" => Action::Config,
        "prefs" | "set" => match args {
            [key, value] => Action::Set {
                key: key.to_string(),
                value: value
                    .parse()
                    .map_err(|_| format!("❌ Value must be a whole number, got '{}'", value))?,
            },
            _ => return Err("Usage: prefs <key> <value>".to_string()),
        },
        "timezone" | "utc" => match args {
            [offset] => Action::Timezone(
                offset
                    .parse()
                    .map_err(|_| format!("❌ Offset must be a whole number, got '{}'", offset))?,
            ),
            _ => return Err("Usage: timezone <offset>".to_string()),
        },
        "metadata" => Action::Metadata,
        "meta" => match args {
            [key, value @ ..] if !value.is_empty() => Action::Meta {
                key: key.to_string(),
                value: value.join(" "),
            },
            _ => return Err("Usage: meta <key> <value>".to_string()),
        },
        "resetmeta" => Action::ResetMeta,
        "monitor" => Action::Monitor,
        other => return Err(format!("❌ Unknown command: '{}'", other)),
    };
    Ok(Some(action))
}

/// Where console lines and confirmation answers come from
#[async_trait]
pub trait ConsoleInput: DecisionProvider {
    /// Show `prompt` and read one line; `None` at end of input
    async fn read_line(&mut self, prompt: &str) -> Option<String>;
}

/// Operator at the terminal
pub struct StdinInput {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsoleInput for StdinInput {
    async fn read_line(&mut self, prompt: &str) -> Option<String> {
        print!("{}", prompt);
        let _ = std::io::stdout().flush();
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read input: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl DecisionProvider for StdinInput {
    async fn decide(&mut self, family: ConfirmationFamily, transcript: &[ClassifiedLine]) -> String {
        debug!("Device asks for a {:?} decision", family);
        // The prompt is the last line shown; the answer goes on the same line
        let (prompt, before) = match transcript.split_last() {
            Some((last, before)) => (format!("{} ", last.text), before),
            None => (String::new(), transcript),
        };
        print!("{}", render::lines(before));
        self.read_line(&prompt).await.unwrap_or_default()
    }
}

/// Whether the console keeps going after an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Console state: settings, the device client and the operator
pub struct App<I> {
    settings: Settings,
    client: DeviceClient,
    input: I,
    simulator: Option<mpsc::Sender<VirtualMonitorCommand>>,
}

impl<I: ConsoleInput> App<I> {
    pub fn new(settings: Settings, input: I) -> Self {
        let client = DeviceClient::new(settings.link.clone());
        Self {
            settings,
            client,
            input,
            simulator: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Read and run console lines until `exit` or end of input
    pub async fn run_console(&mut self) {
        println!("SEN66 console. Type 'help' for commands, 'exit' to quit.");

        while let Some(line) = self.input.read_line("sen66> ").await {
            let action = match parse_line(&line) {
                Ok(Some(action)) => action,
                Ok(None) => continue,
                Err(message) => {
                    println!("{}", message);
                    if message.starts_with("❌ Unknown command") {
                        print!("{}", render::help());
                    }
                    continue;
                }
            };

            match self.execute(action).await {
                Ok(Flow::Exit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => println!("❌ {:#}", e),
            }
        }

        self.shutdown().await;
    }

    /// Run one action, connecting first if it needs the device
    pub async fn execute(&mut self, action: Action) -> anyhow::Result<Flow> {
        if action.needs_device() {
            self.ensure_connected().await?;
        }

        match self.dispatch(action).await {
            Err(e) => {
                if e.downcast_ref::<LinkError>()
                    .is_some_and(LinkError::is_transport_failure)
                {
                    warn!("Lost connection: {:#}", e);
                    self.drop_simulator().await;
                }
                Err(e)
            }
            ok => ok,
        }
    }

    async fn dispatch(&mut self, action: Action) -> anyhow::Result<Flow> {
        match action {
            Action::Exit => return Ok(Flow::Exit),
            Action::Help => print!("{}", render::help()),
            Action::About => print!("{}", render::about()),
            Action::ListPorts => {
                let ports = PortScanner::new().enumerate_ports()?;
                print!("{}", render::ports(&ports));
            }
            Action::Status => {
                let block = self.client.status().await?;
                print!("{}", render::status(block.as_ref()));
            }
            Action::Clear => {
                let report = self.client.clear_log(&mut self.input).await?;
                print!("{}", render::report(&report));
            }
            Action::ResetMeta => {
                let report = self.client.reset_metadata(&mut self.input).await?;
                print!("{}", render::report(&report));
            }
            Action::Meta { key, value } => {
                let report = self
                    .client
                    .set_metadata(&key, &value, &mut self.input)
                    .await?;
                print!("{}", render::report(&report));
                self.save_backup(&report)?;
            }
            Action::Download { output, no_twa } => self.download(output, no_twa).await?,
            Action::ExportTwa { output } => {
                let path = self.resolve(output, ExportKind::Twa);
                self.export_twa(&path).await?;
            }
            Action::RtcStatus => {
                let reply = self.client.rtc_status().await?;
                print!("{}", render::lines(&reply.lines));
            }
            Action::RtcSync => {
                let now = u64::try_from(Utc::now().timestamp())
                    .context("system clock is before 1970")?;
                let reply = self.client.rtc_sync(now).await?;
                print!("{}", render::lines(&reply.lines));
            }
            Action::Config => {
                let reply = self.client.show_config().await?;
                print!("{}", render::lines(&reply.lines));
            }
            Action::Metadata => {
                let reply = self.client.show_metadata().await?;
                print!("{}", render::lines(&reply.lines));
            }
            Action::Set { key, value } => {
                let key: PrefKey = key.parse()?;
                let reply = self.client.set_pref(key, value).await?;
                print!("{}", render::lines(&reply.lines));
            }
            Action::Timezone(offset) => match self.client.set_timezone(offset).await {
                Ok(reply) => {
                    print!("{}", render::lines(&reply.lines));
                    if !reply.is_error() {
                        println!("✓ Timezone set to UTC{:+}", offset);
                    }
                }
                Err(LinkError::Protocol(ProtocolError::UtcOffsetOutOfRange(offset))) => {
                    print!("{}", render::timezone_help(offset));
                }
                Err(e) => return Err(e.into()),
            },
            Action::Monitor => {
                println!("Monitoring device output. Press Ctrl-C to stop.");
                let shutdown = async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Cannot listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                };
                let count = self
                    .client
                    .monitor(shutdown, |line| println!("{}", line.text))
                    .await?;
                println!("\nStopped after {} lines", count);
            }
        }
        Ok(Flow::Continue)
    }

    /// Log plus, unless `no_twa`, a TWA export saved next to it
    async fn download(&mut self, output: Option<PathBuf>, no_twa: bool) -> anyhow::Result<()> {
        let path = self.resolve(output, ExportKind::Log);

        if !no_twa {
            println!("Exporting TWA data first...");
            self.export_twa(&twa_companion(&path)).await?;
        }

        println!("Downloading log file...");
        let extraction = self.client.download_log().await?;
        let outcome = save_document(&extraction.document, &path, self.settings.export_policy())?;
        print!("{}", render::saved("Log", &extraction.stats, &outcome));
        Ok(())
    }

    async fn export_twa(&mut self, path: &Path) -> anyhow::Result<()> {
        let export = self.client.export_twa().await?;
        print!("{}", render::lines(&export.lines));

        match (export.status, export.extraction) {
            (TwaStatus::Exported, Some(extraction)) => {
                let outcome =
                    save_document(&extraction.document, path, self.settings.export_policy())?;
                print!("{}", render::saved("TWA export", &extraction.stats, &outcome));
            }
            (TwaStatus::Failed, _) => println!("❌ Device could not export TWA data"),
            _ => println!("⚠ No TWA export received"),
        }
        Ok(())
    }

    fn save_backup(&self, report: &ConfirmationReport) -> anyhow::Result<()> {
        let Some(backup) = &report.backup else {
            return Ok(());
        };
        let path = self.resolve(None, ExportKind::Backup);
        let outcome = save_document(backup, &path, self.settings.export_policy())?;
        if let SaveOutcome::Written { path, rows, .. } = outcome {
            println!("✓ Backup saved to {} ({} rows)", path.display(), rows);
        }
        Ok(())
    }

    fn resolve(&self, output: Option<PathBuf>, kind: ExportKind) -> PathBuf {
        let name = output.unwrap_or_else(|| timestamped_name(kind, Local::now()));
        self.settings.output_path(&name)
    }

    /// Open the configured port, the virtual monitor, or the best detected port
    async fn ensure_connected(&mut self) -> anyhow::Result<()> {
        if self.client.is_connected() {
            return Ok(());
        }
        self.drop_simulator().await;

        let baud = self.settings.baud_rate;
        let port = match &self.settings.port {
            Some(port) => port.clone(),
            None => {
                let detected = PortScanner::new()
                    .detect()
                    .context("no port given and none detected (try --port or list-ports)")?;
                detected.port
            }
        };

        if port.eq_ignore_ascii_case(VIRTUAL_PORT_NAME) {
            let monitor = VirtualMonitor::new(self.settings.simulator.clone());
            let (host, cmd_tx, _handle) = spawn_virtual_monitor(monitor);
            self.client.attach_stream(VIRTUAL_PORT_NAME, baud, host)?;
            self.simulator = Some(cmd_tx);
        } else {
            self.client.connect(&port, baud)?;
        }

        info!("Connected to {} at {} baud", port, baud);
        println!("✓ Connected to {}", port);
        Ok(())
    }

    async fn drop_simulator(&mut self) {
        if let Some(tx) = self.simulator.take() {
            let _ = tx.send(VirtualMonitorCommand::Shutdown).await;
        }
    }

    /// Close the port and stop the virtual monitor
    pub async fn shutdown(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.client.disconnect() {
                warn!("Disconnect failed: {}", e);
            }
        }
        self.drop_simulator().await;
    }
}

/// Run a single command-line action and close the connection
pub async fn run_once<I: ConsoleInput>(app: &mut App<I>, action: Action) -> anyhow::Result<()> {
    let result = app.execute(action).await;
    app.shutdown().await;
    result.map(|_| ())
}
