//! Byte transport contract and its line-framing implementation
//!
//! The engine only needs four things from a link: how many bytes are waiting,
//! a line read bounded by a budget, a raw write and a way to discard stale
//! input. [`LineTransport`] provides them on top of any tokio stream, so the
//! same code drives a real serial port and an in-memory duplex stream
//! connected to a simulated board.
//!
//! The firmware prints confirmation prompts without a trailing newline and
//! then blocks waiting for input. An unterminated tail that has been idle for
//! the partial-flush window is therefore delivered as a line of its own.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace, warn};

use crate::error::LinkError;

/// Default idle window before an unterminated line is delivered
pub const DEFAULT_PARTIAL_FLUSH: Duration = Duration::from_millis(300);

/// Minimal byte-stream contract the engine depends on
#[async_trait]
pub trait Transport: Send {
    /// Human-readable endpoint name (port path or virtual label)
    fn name(&self) -> &str;

    /// Number of bytes already received and not yet consumed
    ///
    /// Never waits for the device.
    fn bytes_available(&mut self) -> Result<usize, LinkError>;

    /// Read one line, waiting at most `budget`
    ///
    /// Returns the raw line bytes including any terminator, or `None` if no
    /// line became ready within the budget.
    async fn read_line(&mut self, budget: Duration) -> Result<Option<Vec<u8>>, LinkError>;

    /// Write bytes verbatim and flush
    async fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Discard everything received so far
    async fn clear_input(&mut self) -> Result<(), LinkError>;
}

/// Newline framing over an async byte stream
///
/// Generic over the I/O type so virtual devices can use `DuplexStream` from
/// `tokio::io::duplex()`.
pub struct LineTransport<T> {
    name: String,
    io: T,
    buffer: Vec<u8>,
    pending: Vec<u8>,
    last_rx: Instant,
    partial_flush: Duration,
    eof: bool,
}

impl LineTransport<SerialStream> {
    /// Open a serial port at `baud_rate`
    pub fn open_serial(port_name: &str, baud_rate: u32) -> Result<Self, LinkError> {
        let stream = tokio_serial::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open_native_async()?;
        debug!("Opened serial port {} at {} baud", port_name, baud_rate);
        Ok(Self::new(port_name, stream))
    }
}

impl<T> LineTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a stream with the default partial-flush window
    pub fn new(name: impl Into<String>, io: T) -> Self {
        Self {
            name: name.into(),
            io,
            buffer: vec![0u8; 1024],
            pending: Vec::new(),
            last_rx: Instant::now(),
            partial_flush: DEFAULT_PARTIAL_FLUSH,
            eof: false,
        }
    }

    /// Override the idle window after which an unterminated line is delivered
    pub fn with_partial_flush(mut self, window: Duration) -> Self {
        self.partial_flush = window;
        self
    }

    /// Pull in whatever the stream can deliver without waiting
    fn fill_ready(&mut self) -> Result<(), LinkError> {
        while !self.eof {
            match self.io.read(&mut self.buffer).now_or_never() {
                None => break,
                Some(Ok(0)) => {
                    debug!("{}: end of stream", self.name);
                    self.eof = true;
                }
                Some(Ok(n)) => {
                    self.pending.extend_from_slice(&self.buffer[..n]);
                    self.last_rx = Instant::now();
                }
                Some(Err(e)) if e.kind() == ErrorKind::WouldBlock => break,
                Some(Err(e)) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn take_terminated(&mut self) -> Option<Vec<u8>> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        Some(self.pending.drain(..=pos).collect())
    }

    fn take_all(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    fn partial_due(&self, now: Instant) -> bool {
        !self.pending.is_empty() && now.duration_since(self.last_rx) >= self.partial_flush
    }
}

#[async_trait]
impl<T> Transport for LineTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_available(&mut self) -> Result<usize, LinkError> {
        self.fill_ready()?;
        if self.pending.is_empty() && self.eof {
            return Err(LinkError::Closed);
        }
        Ok(self.pending.len())
    }

    async fn read_line(&mut self, budget: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        let deadline = Instant::now() + budget;

        loop {
            if let Some(line) = self.take_terminated() {
                trace!("{} <- {:?}", self.name, String::from_utf8_lossy(&line));
                return Ok(Some(line));
            }

            let now = Instant::now();
            if self.partial_due(now) || (self.eof && !self.pending.is_empty()) {
                let line = self.take_all();
                trace!("{} <- {:?} (unterminated)", self.name, String::from_utf8_lossy(&line));
                return Ok(Some(line));
            }
            if self.eof {
                return Err(LinkError::Closed);
            }
            if now >= deadline {
                return Ok(None);
            }

            let mut wait = deadline - now;
            if !self.pending.is_empty() {
                let flush_at = self.last_rx + self.partial_flush;
                wait = wait.min(flush_at.saturating_duration_since(now));
            }

            match tokio::time::timeout(wait, self.io.read(&mut self.buffer)).await {
                Ok(Ok(0)) => {
                    debug!("{}: end of stream", self.name);
                    self.eof = true;
                }
                Ok(Ok(n)) => {
                    self.pending.extend_from_slice(&self.buffer[..n]);
                    self.last_rx = Instant::now();
                }
                Ok(Err(e)) if e.kind() == ErrorKind::WouldBlock => {
                    tokio::task::yield_now().await;
                }
                Ok(Err(e)) => {
                    warn!("Read error on {}: {}", self.name, e);
                    return Err(e.into());
                }
                Err(_) => {} // Budget or flush window elapsed
            }
        }
    }

    async fn write_raw(&mut self, data: &[u8]) -> Result<(), LinkError> {
        trace!("{} -> {:?}", self.name, String::from_utf8_lossy(data));
        self.io.write_all(data).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn clear_input(&mut self) -> Result<(), LinkError> {
        self.fill_ready()?;
        if !self.pending.is_empty() {
            debug!("{}: discarding {} stale bytes", self.name, self.pending.len());
            self.pending.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reads_terminated_lines() {
        let (host, mut device) = tokio::io::duplex(256);
        let mut transport = LineTransport::new("test", host);

        device.write_all(b"first\r\nsecond\n").await.unwrap();

        let first = transport.read_line(Duration::from_millis(100)).await.unwrap();
        assert_eq!(first.as_deref(), Some(&b"first\r\n"[..]));
        assert_eq!(transport.bytes_available().unwrap(), 7);
        let second = transport.read_line(Duration::from_millis(100)).await.unwrap();
        assert_eq!(second.as_deref(), Some(&b"second\n"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_elapses_without_data() {
        let (host, _device) = tokio::io::duplex(256);
        let mut transport = LineTransport::new("test", host);

        let start = Instant::now();
        let line = transport.read_line(Duration::from_millis(100)).await.unwrap();
        assert!(line.is_none());
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_millis(110));
        assert_eq!(transport.bytes_available().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unterminated_prompt_flushed_after_idle() {
        let (host, mut device) = tokio::io::duplex(256);
        let mut transport = LineTransport::new("test", host);

        device.write_all(b"Type 'yes' to confirm: ").await.unwrap();

        // Shorter than the flush window: held back
        let early = transport.read_line(Duration::from_millis(100)).await.unwrap();
        assert!(early.is_none());
        assert!(transport.bytes_available().unwrap() > 0);

        let line = transport.read_line(Duration::from_secs(1)).await.unwrap();
        assert_eq!(line.as_deref(), Some(&b"Type 'yes' to confirm: "[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_input_discards_buffered_bytes() {
        let (host, mut device) = tokio::io::duplex(256);
        let mut transport = LineTransport::new("test", host);

        device.write_all(b"stale telemetry\n").await.unwrap();
        tokio::task::yield_now().await;
        transport.clear_input().await.unwrap();
        assert_eq!(transport.bytes_available().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream() {
        let (host, mut device) = tokio::io::duplex(256);
        let mut transport = LineTransport::new("test", host);

        device.write_all(b"tail").await.unwrap();
        drop(device);

        let line = transport.read_line(Duration::from_millis(100)).await.unwrap();
        assert_eq!(line.as_deref(), Some(&b"tail"[..]));
        assert!(matches!(
            transport.read_line(Duration::from_millis(100)).await,
            Err(LinkError::Closed)
        ));
        assert!(matches!(transport.bytes_available(), Err(LinkError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_raw_reaches_device() {
        let (host, mut device) = tokio::io::duplex(256);
        let mut transport = LineTransport::new("test", host);

        transport.write_raw(b"dump\n").await.unwrap();

        let mut buf = [0u8; 16];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"dump\n");
    }
}
