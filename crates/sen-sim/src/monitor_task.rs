//! Virtual monitor actor task
//!
//! Owns a [`VirtualMonitor`] and serves it over an async stream. The select!
//! loop:
//! - reads console input from the stream and feeds it to the monitor
//! - takes a measurement whenever the interval elapses and no dialog is open
//! - answers an open dialog with an empty line when it times out
//! - handles control commands from a channel

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::VirtualMonitor;

/// Commands that can be sent to a virtual monitor actor
#[derive(Debug, Clone)]
pub enum VirtualMonitorCommand {
    /// Take a measurement now, regardless of the interval timer
    Measure,
    /// Enable or disable timed measurements
    SetAutoMeasure(bool),
    /// Corrupt data row `n` (1-based) on every following dump
    CorruptRow(usize),
    /// Shutdown the virtual monitor actor
    Shutdown,
}

/// Run the virtual monitor actor task
///
/// Returns when the stream closes, the command channel closes or a
/// [`VirtualMonitorCommand::Shutdown`] arrives.
pub async fn run_virtual_monitor_task<S>(
    mut stream: S,
    mut monitor: VirtualMonitor,
    mut cmd_rx: mpsc::Receiver<VirtualMonitorCommand>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 1024];
    let mut next_measurement = Instant::now() + interval_of(&monitor);
    let mut dialog_deadline: Option<Instant> = None;

    info!("Starting virtual monitor task");

    loop {
        // The firmware blocks while a dialog waits, so measurements stall too
        let measuring = monitor.auto_measure() && !monitor.is_awaiting_decision();

        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Virtual monitor stream closed");
                        break;
                    }
                    Ok(n) => {
                        debug!("Virtual monitor received {} bytes", n);
                        monitor.push_input(&buf[..n]);
                    }
                    Err(e) => {
                        warn!("Virtual monitor stream error: {}", e);
                        return Err(e);
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(VirtualMonitorCommand::Measure) => monitor.measure(),
                    Some(VirtualMonitorCommand::SetAutoMeasure(enabled)) => {
                        info!("Virtual monitor timed measurements set to {}", enabled);
                        monitor.set_auto_measure(enabled);
                        next_measurement = Instant::now() + interval_of(&monitor);
                    }
                    Some(VirtualMonitorCommand::CorruptRow(n)) => monitor.corrupt_row(n),
                    Some(VirtualMonitorCommand::Shutdown) => {
                        info!("Shutdown requested for virtual monitor");
                        break;
                    }
                    None => {
                        debug!("Command channel closed for virtual monitor");
                        break;
                    }
                }
            }

            _ = sleep_until(next_measurement), if measuring => {
                monitor.measure();
                next_measurement = Instant::now() + interval_of(&monitor);
            }

            _ = sleep_until(dialog_deadline.unwrap_or_else(Instant::now)), if dialog_deadline.is_some() => {
                monitor.expire_dialog();
            }
        }

        // Track dialog open/close across whatever the branch did
        dialog_deadline = match (dialog_deadline, monitor.dialog_timeout()) {
            (None, Some(timeout)) => Some(Instant::now() + timeout),
            (Some(deadline), Some(_)) => Some(deadline),
            (_, None) => None,
        };
        if !monitor.is_awaiting_decision() && next_measurement < Instant::now() {
            next_measurement = Instant::now() + interval_of(&monitor);
        }

        while let Some(bytes) = monitor.take_output() {
            stream.write_all(&bytes).await?;
        }
        stream.flush().await?;
    }

    info!("Virtual monitor task ended");
    Ok(())
}

fn interval_of(monitor: &VirtualMonitor) -> Duration {
    Duration::from_secs(u64::from(monitor.measurement_interval()))
}
