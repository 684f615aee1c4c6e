//! Error types for the SEN66 link

use thiserror::Error;

/// Errors that can occur while talking to a monitor
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O error on the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Command could not be built
    #[error("protocol error: {0}")]
    Protocol(#[from] sen_protocol::ProtocolError),

    /// No session is open
    #[error("not connected")]
    NotConnected,

    /// A session is already open
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    /// The device end of the stream went away
    #[error("connection closed by device")]
    Closed,
}

impl LinkError {
    /// Returns true if the transport handle can no longer be used
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            LinkError::Io(_) | LinkError::Serial(_) | LinkError::Closed
        )
    }
}
