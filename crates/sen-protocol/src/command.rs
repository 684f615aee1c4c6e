//! Console commands understood by the SEN66 firmware
//!
//! Every command is one text line: a verb, optionally followed by
//! space-separated arguments, terminated by `\n`.
//!
//! # Common Commands
//! - `dump` / `dump_twa` - Bulk transfer of the raw log / TWA export
//! - `export_twa` - Recompute the 8-hour TWA export file
//! - `clear`, `resetmeta` - Destructive, require confirmation
//! - `rtc status`, `rtc sync <unix>` - Real-time clock
//! - `prefs <key> <value>`, `meta <key> <value>` - Settings and metadata

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::error::ProtocolError;

/// UTC offsets (hours) accepted by `prefs utc`
pub const UTC_OFFSET_RANGE: RangeInclusive<i32> = -12..=14;

/// Line terminator appended to every outbound command
pub const LINE_TERMINATOR: u8 = b'\n';

/// A single console command line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    verb: String,
    args: Vec<String>,
}

impl Command {
    /// Create a command from a verb and argument tokens
    pub fn new<I, S>(verb: impl Into<String>, args: I) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let verb = verb.into();
        if verb.trim().is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        if verb.chars().any(char::is_whitespace) {
            return Err(ProtocolError::InvalidArgument {
                arg: verb,
                reason: "verb may not contain whitespace",
            });
        }

        let args = args.into_iter().map(Into::into).collect::<Vec<String>>();
        for arg in &args {
            validate_arg(arg)?;
        }

        Ok(Self { verb, args })
    }

    /// Build a command whose tokens are known to be valid
    fn fixed(verb: &str, args: &[&str]) -> Self {
        Self {
            verb: verb.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// `clear` - delete the CSV log (asks for confirmation)
    pub fn clear_log() -> Self {
        Self::fixed("clear", &[])
    }

    /// `dump` - bulk transfer of the raw CSV log
    pub fn dump_log() -> Self {
        Self::fixed("dump", &[])
    }

    /// `dump_twa` - bulk transfer of the TWA export file
    pub fn dump_twa() -> Self {
        Self::fixed("dump_twa", &[])
    }

    /// `export_twa` - regenerate the TWA export file on the device
    pub fn export_twa() -> Self {
        Self::fixed("export_twa", &[])
    }

    /// `rtc status`
    pub fn rtc_status() -> Self {
        Self::fixed("rtc", &["status"])
    }

    /// `rtc sync <unix-seconds>`
    pub fn rtc_sync(unix_seconds: u64) -> Self {
        Self {
            verb: "rtc".to_string(),
            args: vec!["sync".to_string(), unix_seconds.to_string()],
        }
    }

    /// `config` - print the configuration table
    pub fn show_config() -> Self {
        Self::fixed("config", &[])
    }

    /// `prefs <key> <value>`
    pub fn set_pref(key: PrefKey, value: i32) -> Self {
        Self {
            verb: "prefs".to_string(),
            args: vec![key.as_str().to_string(), value.to_string()],
        }
    }

    /// `prefs utc <offset>`, rejecting offsets the firmware would misapply
    pub fn set_utc_offset(offset: i32) -> Result<Self, ProtocolError> {
        validate_utc_offset(offset)?;
        Ok(Self::set_pref(PrefKey::Utc, offset))
    }

    /// `metadata` - print the metadata table
    pub fn show_metadata() -> Self {
        Self::fixed("metadata", &[])
    }

    /// `meta <key> <value>`
    ///
    /// The value may contain spaces; the key may not.
    pub fn set_metadata(key: &str, value: &str) -> Result<Self, ProtocolError> {
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(ProtocolError::InvalidArgument {
                arg: key.to_string(),
                reason: "metadata key must be a single non-empty word",
            });
        }
        if value.is_empty() {
            return Err(ProtocolError::InvalidArgument {
                arg: value.to_string(),
                reason: "metadata value may not be empty",
            });
        }
        Self::new("meta", [key, value])
    }

    /// `resetmeta` - restore default metadata (asks for confirmation)
    pub fn reset_metadata() -> Self {
        Self::fixed("resetmeta", &[])
    }

    /// Command verb
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Argument tokens
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Encode to the wire format (single newline-terminated line)
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        bytes.push(LINE_TERMINATOR);
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.verb)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn validate_arg(arg: &str) -> Result<(), ProtocolError> {
    if arg.is_empty() {
        return Err(ProtocolError::InvalidArgument {
            arg: arg.to_string(),
            reason: "argument may not be empty",
        });
    }
    if arg.contains(['\n', '\r']) {
        return Err(ProtocolError::InvalidArgument {
            arg: arg.to_string(),
            reason: "argument may not contain a line break",
        });
    }
    Ok(())
}

/// Check an hour offset against [`UTC_OFFSET_RANGE`]
pub fn validate_utc_offset(offset: i32) -> Result<i32, ProtocolError> {
    if UTC_OFFSET_RANGE.contains(&offset) {
        Ok(offset)
    } else {
        Err(ProtocolError::UtcOffsetOutOfRange(offset))
    }
}

/// Configuration keys accepted by `prefs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefKey {
    /// Measurement interval in seconds
    Measurement,
    /// Logging interval in seconds (0 = every measurement)
    Logging,
    /// UTC offset in hours
    Utc,
    /// Storage warning threshold in percent
    StorageWarning,
}

impl PrefKey {
    /// Canonical key sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefKey::Measurement => "measurement",
            PrefKey::Logging => "logging",
            PrefKey::Utc => "utc",
            PrefKey::StorageWarning => "storage_warning",
        }
    }
}

impl FromStr for PrefKey {
    type Err = ProtocolError;

    /// Accepts the same aliases as the firmware
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "measurement" | "meas" => Ok(PrefKey::Measurement),
            "logging" | "log" => Ok(PrefKey::Logging),
            "utc" | "timezone" | "offset" => Ok(PrefKey::Utc),
            "storage_warning" | "stor_warn" => Ok(PrefKey::StorageWarning),
            other => Err(ProtocolError::UnknownSetting(other.to_string())),
        }
    }
}

impl fmt::Display for PrefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
