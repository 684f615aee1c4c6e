//! Deadline-bounded response collection
//!
//! A response has no length prefix and no guaranteed end marker, so reading
//! one is a poll loop: take lines while they arrive, let the caller decide
//! which line ends the response, and give up quietly at the deadline.
//! Running into the deadline is a normal outcome, not an error.

use std::time::Duration;

use sen_protocol::{classify, decode_line, ClassifiedLine, Command};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::transport::Transport;

/// Whether telemetry noise reaches the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseFilter {
    /// Every line is stored and offered to the stop predicate
    Keep,
    /// Telemetry lines ([`ClassifiedLine::is_noise`]) are dropped on arrival;
    /// records, prompts and terminal markers always get through
    Skip,
}

/// Timeout-bounded line reader
#[derive(Debug, Clone)]
pub struct ResponseCollector {
    poll_interval: Duration,
    settle: Duration,
}

impl Default for ResponseCollector {
    fn default() -> Self {
        Self::from_config(&LinkConfig::default())
    }
}

impl ResponseCollector {
    pub fn new(poll_interval: Duration, settle: Duration) -> Self {
        Self {
            poll_interval,
            settle,
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.poll_interval(), config.settle())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Send a command: discard stale input, write the line, let the device react
    pub async fn send(
        &self,
        transport: &mut dyn Transport,
        command: &Command,
    ) -> Result<(), LinkError> {
        debug!("Sending command `{}` to {}", command, transport.name());
        transport.clear_input().await?;
        transport.write_raw(&command.encode()).await?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    /// Forward a reply line verbatim (plus newline) without touching the input
    pub async fn send_reply(
        &self,
        transport: &mut dyn Transport,
        reply: &str,
    ) -> Result<(), LinkError> {
        debug!("Answering prompt on {} with {:?}", transport.name(), reply);
        let mut bytes = reply.as_bytes().to_vec();
        bytes.push(b'\n');
        transport.write_raw(&bytes).await
    }

    /// Collect lines until `stop` accepts one (it is included) or `deadline` passes
    pub async fn collect<F>(
        &self,
        transport: &mut dyn Transport,
        deadline: Instant,
        stop: F,
    ) -> Result<Vec<ClassifiedLine>, LinkError>
    where
        F: FnMut(&ClassifiedLine) -> bool + Send,
    {
        self.collect_filtered(transport, deadline, NoiseFilter::Keep, stop)
            .await
    }

    /// Like [`collect`](Self::collect), dropping telemetry noise first
    pub async fn collect_quiet<F>(
        &self,
        transport: &mut dyn Transport,
        deadline: Instant,
        stop: F,
    ) -> Result<Vec<ClassifiedLine>, LinkError>
    where
        F: FnMut(&ClassifiedLine) -> bool + Send,
    {
        self.collect_filtered(transport, deadline, NoiseFilter::Skip, stop)
            .await
    }

    /// The collection loop
    ///
    /// Every wait is bounded by the time remaining, so this returns no later
    /// than one polling interval after `deadline`.
    pub async fn collect_filtered<F>(
        &self,
        transport: &mut dyn Transport,
        deadline: Instant,
        filter: NoiseFilter,
        mut stop: F,
    ) -> Result<Vec<ClassifiedLine>, LinkError>
    where
        F: FnMut(&ClassifiedLine) -> bool + Send,
    {
        let mut lines = Vec::new();
        let mut skipped = 0usize;

        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    "Deadline reached on {} after {} lines",
                    transport.name(),
                    lines.len()
                );
                break;
            }
            let slice = (deadline - now).min(self.poll_interval);

            if transport.bytes_available()? == 0 {
                tokio::time::sleep(slice).await;
                continue;
            }

            let Some(raw) = transport.read_line(slice).await? else {
                continue;
            };
            let Some(text) = decode_line(&raw) else {
                continue;
            };

            let line = classify(&text);
            trace!("{:?}: {}", line.class, line.text);

            if filter == NoiseFilter::Skip && line.is_noise() {
                skipped += 1;
                continue;
            }

            let done = stop(&line);
            lines.push(line);
            if done {
                break;
            }
        }

        if skipped > 0 {
            trace!("Skipped {} telemetry lines", skipped);
        }
        Ok(lines)
    }

    /// Drain whatever arrives within `window` without a stop condition
    pub async fn drain(
        &self,
        transport: &mut dyn Transport,
        window: Duration,
        filter: NoiseFilter,
    ) -> Result<Vec<ClassifiedLine>, LinkError> {
        self.collect_filtered(transport, Instant::now() + window, filter, |_| false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedTransport;
    use sen_protocol::TerminalKind;

    fn collector() -> ResponseCollector {
        ResponseCollector::new(Duration::from_millis(100), Duration::from_millis(200))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_marker_and_includes_it() {
        let mut transport = ScriptedTransport::new()
            .line_at(10, "RTC Status:\r\n")
            .line_at(20, "  Active Source: RTC Time\r\n")
            .line_at(30, "after\r\n");
        let start = Instant::now();

        let lines = collector()
            .collect(&mut transport, start + Duration::from_secs(5), |l| {
                l.is_terminal(TerminalKind::RtcStatus)
            })
            .await
            .unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "Active Source: RTC Time");
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bound_with_endless_noise() {
        let mut transport =
            ScriptedTransport::new().repeating(40, 60_000, "  PM2.5:  4.00 ug/m3\r\n");
        let start = Instant::now();
        let deadline = start + Duration::from_secs(2);

        let lines = collector()
            .collect(&mut transport, deadline, |_| false)
            .await
            .unwrap();

        assert!(!lines.is_empty());
        assert!(Instant::now() <= deadline + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bound_when_silent() {
        let mut transport = ScriptedTransport::new();
        let start = Instant::now();
        let deadline = start + Duration::from_millis(1_050);

        let lines = collector()
            .collect(&mut transport, deadline, |_| true)
            .await
            .unwrap();

        assert!(lines.is_empty());
        assert!(Instant::now() >= deadline);
        assert!(Instant::now() <= deadline + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_collection_skips_noise() {
        let mut transport = ScriptedTransport::new()
            .line_at(10, "--- Measurement #4 (Time: 120 sec) ---\r\n")
            .line_at(20, "  Temperature:        22.10 C\r\n")
            .line_at(30, "  Initialized: YES\r\n")
            .line_at(40, "  Active Source: RTC Time\r\n");

        let lines = collector()
            .collect_quiet(
                &mut transport,
                Instant::now() + Duration::from_secs(5),
                |l| l.is_terminal(TerminalKind::RtcStatus),
            )
            .await
            .unwrap();

        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["Initialized: YES", "Active Source: RTC Time"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_collection_keeps_markers_naming_readings() {
        let mut transport = ScriptedTransport::new()
            .line_at(10, "  CO2:                812 ppm\r\n")
            .line_at(20, "  location      Humidity_Chamber\r\n")
            .line_at(30, "Metadata set: project = CO2_Study\r\n");

        let lines = collector()
            .collect_quiet(
                &mut transport,
                Instant::now() + Duration::from_secs(5),
                |l| l.is_terminal(TerminalKind::MetadataSet),
            )
            .await
            .unwrap();

        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["location      Humidity_Chamber", "Metadata set: project = CO2_Study"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_lines_discarded() {
        let mut transport = ScriptedTransport::new()
            .line_at(10, "\r\n")
            .line_at(20, "   \r\n")
            .line_at(30, "text\r\n");

        let lines = collector()
            .drain(&mut transport, Duration::from_secs(1), NoiseFilter::Keep)
            .await
            .unwrap();

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "text");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_clears_stale_input() {
        let mut transport = ScriptedTransport::new()
            .line_at(0, "stale line\r\n")
            .on_write("config", &[(50, "💡 Tip: Use 'prefs <key> <value>'\r\n")]);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let c = collector();
        c.send(&mut transport, &Command::show_config()).await.unwrap();
        let lines = c
            .collect(&mut transport, Instant::now() + Duration::from_secs(3), |l| {
                l.is_terminal(TerminalKind::Tip)
            })
            .await
            .unwrap();

        assert_eq!(transport.written, vec!["config"]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].is_terminal(TerminalKind::Tip));
    }
}
