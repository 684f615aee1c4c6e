//! SEN66 Serial Port Detection Library
//!
//! Enumerates serial ports and picks the one most likely to be a SEN66
//! monitor board when the user did not name one.
//!
//! # Example
//!
//! ```rust,no_run
//! use sen_detect::PortScanner;
//!
//! let scanner = PortScanner::new();
//! let ports = scanner.enumerate_ports().unwrap();
//!
//! for port in &ports {
//!     println!("Found port: {} ({})", port.port, port.description());
//! }
//!
//! if let Some(best) = sen_detect::auto_detect(&ports) {
//!     println!("Using {}", best.port);
//! }
//! ```

pub mod error;
pub mod scanner;
pub mod usb_ids;

pub use error::DetectError;
pub use scanner::{auto_detect, PortScanner, ScannerConfig, SerialPortInfo};
pub use usb_ids::{classify_port, PortClassification};
