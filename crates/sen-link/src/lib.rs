//! SEN66 Link Engine
//!
//! This crate talks to a SEN66 air-quality monitor over a byte stream that
//! carries free-form console text:
//!
//! - **Transport**: line framing over a serial port or any tokio stream
//! - **Collection**: deadline-bounded reading that stops on a classified marker
//! - **Confirmation**: prompt/decision/resolution dialogs for destructive commands
//! - **Extraction**: CSV export reconstruction from tagged dump lines
//! - **Device operations**: one method per console command on [`DeviceClient`]
//!
//! # Architecture
//!
//! One command is in flight at a time. A [`Session`] owns the transport;
//! every operation borrows it for the duration of the call and the session
//! drops it when the transport fails. All waits are bounded by an explicit
//! deadline on tokio's clock, except [`monitor`](DeviceClient::monitor), which
//! runs until its shutdown future resolves.
//!
//! # Example
//!
//! ```rust,no_run
//! use sen_link::{DeviceClient, FixedDecision, LinkConfig};
//!
//! # async fn run() -> Result<(), sen_link::LinkError> {
//! let mut client = DeviceClient::new(LinkConfig::default());
//! client.connect("/dev/ttyUSB0", 115_200)?;
//!
//! let export = client.download_log().await?;
//! print!("{}", export.document.render());
//!
//! let report = client.clear_log(&mut FixedDecision::yes()).await?;
//! println!("clear: {:?}", report.outcome);
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod confirm;
pub mod device;
pub mod error;
pub mod extract;
pub mod monitor;
pub mod session;
pub mod transport;

#[cfg(test)]
mod scripted;

pub use collector::{NoiseFilter, ResponseCollector};
pub use config::{LinkConfig, Timeouts};
pub use confirm::{
    ConfirmationFamily, ConfirmationFlow, ConfirmationOutcome, ConfirmationReport,
    ConfirmationTimeouts, DecisionProvider, FixedDecision,
};
pub use device::{
    last_measurement_block, CommandReply, DeviceClient, MeasurementBlock, TwaExport, TwaStatus,
};
pub use error::LinkError;
pub use extract::{fold_records, BulkExtractor, Extraction, ExtractionStats};
pub use session::{Session, SessionState};
pub use transport::{LineTransport, Transport, DEFAULT_PARTIAL_FLUSH};
