//! SEN66 Monitor Simulation Library
//!
//! A virtual monitor console for exercising the host side without a board
//! on the bench:
//!
//! - **VirtualMonitor**: synchronous model of the firmware console
//! - **run_virtual_monitor_task**: serves a monitor over any async stream
//! - **spawn_virtual_monitor**: runs the task on an in-memory duplex pipe
//!
//! # Example
//!
//! ```rust
//! use sen_sim::{VirtualMonitor, VirtualMonitorConfig};
//!
//! let mut monitor = VirtualMonitor::new(VirtualMonitorConfig {
//!     preload_rows: 3,
//!     ..Default::default()
//! });
//!
//! monitor.push_input(b"dump\n");
//! while let Some(bytes) = monitor.take_output() {
//!     print!("{}", String::from_utf8_lossy(&bytes));
//! }
//! ```

pub mod monitor;
pub mod monitor_task;

use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use monitor::{Reading, VirtualMonitor, VirtualMonitorConfig};
pub use monitor_task::{run_virtual_monitor_task, VirtualMonitorCommand};

/// Port name that selects the virtual monitor instead of a serial device
pub const VIRTUAL_PORT_NAME: &str = "VSIM";

const PIPE_CAPACITY: usize = 64 * 1024;

/// Spawn a virtual monitor task and return the host end of its pipe
///
/// Must be called from within a tokio runtime.
pub fn spawn_virtual_monitor(
    monitor: VirtualMonitor,
) -> (
    DuplexStream,
    mpsc::Sender<VirtualMonitorCommand>,
    JoinHandle<std::io::Result<()>>,
) {
    let (host, device) = duplex(PIPE_CAPACITY);
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let handle = tokio::spawn(run_virtual_monitor_task(device, monitor, cmd_rx));
    (host, cmd_tx, handle)
}
