//! Link timing configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Polling and framing parameters for a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Sleep between polls when no bytes are waiting (ms)
    pub poll_interval_ms: u64,
    /// Idle time after which an unterminated line (a prompt) is delivered (ms)
    pub partial_flush_ms: u64,
    /// Delay after writing a command before reading its response (ms)
    pub settle_ms: u64,
    /// Per-operation deadlines
    pub timeouts: Timeouts,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            partial_flush_ms: 300,
            settle_ms: 200,
            timeouts: Timeouts::default(),
        }
    }
}

impl LinkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn partial_flush(&self) -> Duration {
        Duration::from_millis(self.partial_flush_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Deadlines for each device operation, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Window for draining output already in flight when asking for status
    pub status_drain_ms: u64,
    /// Wait for the next measurement block if none was buffered
    pub status_wait_ms: u64,
    /// `clear`: wait for the prompt
    pub clear_prompt_ms: u64,
    /// `clear`: wait for the outcome after answering
    pub clear_resolution_ms: u64,
    /// `resetmeta`: wait for the prompt
    pub reset_prompt_ms: u64,
    /// `resetmeta`: wait for the outcome after answering
    pub reset_resolution_ms: u64,
    /// `meta`: wait for the prompt or an immediate result
    pub meta_prompt_ms: u64,
    /// `meta`: wait for the outcome after answering
    pub meta_resolution_ms: u64,
    /// `meta`: backup dump requested from the prompt
    pub backup_dump_ms: u64,
    /// `meta`: wait for the hand-off after a backup dump
    pub backup_handoff_ms: u64,
    /// `rtc status`
    pub rtc_status_ms: u64,
    /// `rtc sync`
    pub rtc_sync_ms: u64,
    /// `config` and `metadata` tables
    pub table_ms: u64,
    /// Lines trailing a table after its closing tip
    pub table_drain_ms: u64,
    /// `prefs`
    pub pref_ms: u64,
    /// `export_twa`
    pub twa_export_ms: u64,
    /// `dump` and `dump_twa`
    pub dump_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            status_drain_ms: 3_000,
            status_wait_ms: 25_000,
            clear_prompt_ms: 3_000,
            clear_resolution_ms: 3_000,
            reset_prompt_ms: 5_000,
            reset_resolution_ms: 5_000,
            meta_prompt_ms: 5_000,
            meta_resolution_ms: 10_000,
            backup_dump_ms: 15_000,
            backup_handoff_ms: 5_000,
            rtc_status_ms: 5_000,
            rtc_sync_ms: 3_000,
            table_ms: 3_000,
            table_drain_ms: 500,
            pref_ms: 3_000,
            twa_export_ms: 10_000,
            dump_ms: 10_000,
        }
    }
}
