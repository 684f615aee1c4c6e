//! Connection lifecycle
//!
//! A [`Session`] owns at most one transport. It only changes state through
//! explicit [`connect`](Session::connect) / [`disconnect`](Session::disconnect)
//! calls, plus [`release_on_failure`](Session::release_on_failure) when the
//! transport reports that the handle is no longer usable.

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::LinkError;
use crate::transport::{LineTransport, Transport};

/// Observable state of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected { port: String, baud: u32 },
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("disconnected"),
            SessionState::Connected { port, baud } => write!(f, "{} @ {} baud", port, baud),
        }
    }
}

/// One monitor connection
#[derive(Default)]
pub struct Session {
    link: Option<Link>,
}

struct Link {
    port: String,
    baud: u32,
    transport: Box<dyn Transport>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        match &self.link {
            None => SessionState::Disconnected,
            Some(link) => SessionState::Connected {
                port: link.port.clone(),
                baud: link.baud,
            },
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Open a serial port, delivering unterminated output after `partial_flush` of silence
    pub fn connect(
        &mut self,
        port: &str,
        baud: u32,
        partial_flush: Duration,
    ) -> Result<(), LinkError> {
        self.ensure_disconnected()?;
        let transport =
            LineTransport::open_serial(port, baud)?.with_partial_flush(partial_flush);
        self.install(port, baud, Box::new(transport));
        Ok(())
    }

    /// Adopt an already open transport (virtual boards, tests)
    pub fn attach(
        &mut self,
        label: &str,
        baud: u32,
        transport: Box<dyn Transport>,
    ) -> Result<(), LinkError> {
        self.ensure_disconnected()?;
        self.install(label, baud, transport);
        Ok(())
    }

    /// Close the transport
    pub fn disconnect(&mut self) -> Result<(), LinkError> {
        let link = self.link.take().ok_or(LinkError::NotConnected)?;
        info!("Disconnected from {}", link.port);
        Ok(())
    }

    /// Borrow the open transport
    pub fn transport(&mut self) -> Result<&mut (dyn Transport + 'static), LinkError> {
        self.link
            .as_mut()
            .map(|link| link.transport.as_mut())
            .ok_or(LinkError::NotConnected)
    }

    /// Drop the transport if `result` says it is no longer usable
    pub fn release_on_failure<T>(&mut self, result: Result<T, LinkError>) -> Result<T, LinkError> {
        if let Err(e) = &result {
            if e.is_transport_failure() {
                if let Some(link) = self.link.take() {
                    warn!("Releasing {} after transport failure: {}", link.port, e);
                }
            }
        }
        result
    }

    fn ensure_disconnected(&self) -> Result<(), LinkError> {
        match &self.link {
            Some(link) => Err(LinkError::AlreadyConnected(link.port.clone())),
            None => Ok(()),
        }
    }

    fn install(&mut self, port: &str, baud: u32, transport: Box<dyn Transport>) {
        info!("Connected to {} at {} baud", port, baud);
        self.link = Some(Link {
            port: port.to_string(),
            baud,
            transport,
        });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("state", &self.state()).finish()
    }
}
