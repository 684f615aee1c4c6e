//! USB Vendor/Product IDs for monitor boards and serial adapters
//!
//! The monitor runs on an ESP32-S3, which enumerates either through its
//! native USB (Espressif VID) or through a bridge chip on dev boards.

/// USB Vendor ID / Product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

/// Espressif native USB
pub mod espressif {
    use super::UsbId;

    pub const VID: u16 = 0x303A;

    /// USB-Serial/JTAG of the ESP32-S3 and C3
    pub const USB_SERIAL_JTAG: UsbId = UsbId::new(VID, 0x1001);
    /// TinyUSB CDC from the Arduino core
    pub const ARDUINO_CDC: UsbId = UsbId::new(VID, 0x0002);

    /// IDs the monitor firmware enumerates with
    pub const BOARD_IDS: &[UsbId] = &[USB_SERIAL_JTAG, ARDUINO_CDC];
}

/// Silicon Labs CP210x
pub mod cp210x {
    pub const VID: u16 = 0x10C4;

    pub const ALL_PIDS: &[u16] = &[0xEA60, 0xEA70, 0xEA71];
}

/// WCH CH340/CH341/CH9102
pub mod ch340 {
    pub const VID: u16 = 0x1A86;

    pub const ALL_PIDS: &[u16] = &[0x7523, 0x5523, 0x55D4];
}

/// FTDI
pub mod ftdi {
    pub const VID: u16 = 0x0403;

    pub const ALL_PIDS: &[u16] = &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015];
}

/// Check if a VID/PID is a known USB-to-serial bridge
pub fn is_known_serial_adapter(vid: u16, pid: u16) -> bool {
    match vid {
        cp210x::VID => cp210x::ALL_PIDS.contains(&pid),
        ch340::VID => ch340::ALL_PIDS.contains(&pid),
        ftdi::VID => ftdi::ALL_PIDS.contains(&pid),
        _ => false,
    }
}

/// Get adapter type name from VID
pub fn adapter_name(vid: u16) -> Option<&'static str> {
    match vid {
        espressif::VID => Some("Espressif USB"),
        cp210x::VID => Some("CP210x"),
        ch340::VID => Some("CH340"),
        ftdi::VID => Some("FTDI"),
        _ => None,
    }
}

/// How likely a port is to be a monitor board
///
/// Ordered best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PortClassification {
    /// ESP32-S3 native USB, or a description naming the ESP32
    Esp32,
    /// A known USB-to-serial bridge, or Espressif USB in another mode
    Bridge,
    /// Any other USB serial device
    Usb,
    /// Built-in UART, Bluetooth, PCI and the like
    Other,
}

/// Classify a port from its USB IDs and description
///
/// Returns the tier and a display hint (e.g. "Espressif USB", "CP210x").
pub fn classify_port(
    vid: Option<u16>,
    pid: Option<u16>,
    description: &str,
) -> (PortClassification, Option<&'static str>) {
    let hint = vid.and_then(adapter_name);
    let id = vid.zip(pid).map(|(vid, pid)| UsbId::new(vid, pid));

    if id.is_some_and(|id| espressif::BOARD_IDS.contains(&id)) || description.contains("ESP32") {
        return (PortClassification::Esp32, hint);
    }
    if vid == Some(espressif::VID)
        || id.is_some_and(|id| is_known_serial_adapter(id.vid, id.pid))
    {
        return (PortClassification::Bridge, hint);
    }
    if vid.is_some() || description.contains("USB") {
        return (PortClassification::Usb, hint);
    }
    (PortClassification::Other, None)
}
