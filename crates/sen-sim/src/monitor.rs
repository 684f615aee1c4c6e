//! Virtual SEN66 monitor
//!
//! A synchronous model of the monitor firmware's serial console. Input lines
//! go in through [`VirtualMonitor::push_input`], console text comes out of
//! [`VirtualMonitor::take_output`]. Output mirrors the firmware byte for byte
//! where the host depends on it: `\r\n` line endings, prompts printed without
//! a newline, tagged dump lines and the completion markers.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

const RULE: &str = "═══════════════════════════════════════════════════════════";
const LOG_PATH: &str = "/sensor_log.csv";
const TWA_PATH: &str = "/twa_export.csv";

/// Metadata keys that become CSV columns
const DYNAMIC_KEYS: [&str; 3] = ["user", "project", "location"];
/// Metadata keys that survive `resetmeta`
const SYSTEM_KEYS: [&str; 3] = ["device_name", "firmware_version", "session_start"];

const MEASUREMENT_COLUMNS: &str = "temperature,humidity,vocIndex,noxIndex,pm1_0,pm2_5,pm4_0,pm10,co2,dewPoint,heatIndex,absoluteHumidity,twa_pm1_0,twa_pm2_5,twa_pm4_0,twa_pm10";

/// Configuration for creating a virtual monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMonitorConfig {
    pub device_name: String,
    pub firmware_version: String,
    pub session_start: String,
    /// Seconds between measurements
    pub measurement_interval_s: u32,
    /// Seconds between logged measurements (0 = every measurement)
    pub logging_interval_s: u32,
    /// Measurements already in the log at power-up
    pub preload_rows: usize,
    /// Take measurements on the interval timer when run as a task
    pub auto_measure: bool,
}

impl Default for VirtualMonitorConfig {
    fn default() -> Self {
        Self {
            device_name: "OSH-Monitor-SIM".to_string(),
            firmware_version: "1.0.0-sim".to_string(),
            session_start: "1700000000".to_string(),
            measurement_interval_s: 30,
            logging_interval_s: 0,
            preload_rows: 0,
            auto_measure: true,
        }
    }
}

/// One sensor reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
    pub voc_index: f32,
    pub nox_index: f32,
    pub pm1_0: f32,
    pub pm2_5: f32,
    pub pm4_0: f32,
    pub pm10: f32,
    pub co2: u16,
}

impl Reading {
    /// Deterministic reading for measurement number `n`
    fn synthetic(n: u64) -> Self {
        let wobble = (n % 10) as f32;
        Self {
            temperature: 21.5 + wobble * 0.1,
            humidity: 42.0 + wobble * 0.5,
            voc_index: 100.0 + wobble,
            nox_index: 1.0,
            pm1_0: 2.0 + wobble * 0.1,
            pm2_5: 3.5 + wobble * 0.2,
            pm4_0: 4.0 + wobble * 0.2,
            pm10: 4.5 + wobble * 0.3,
            co2: 450 + (n % 50) as u16,
        }
    }

    fn dew_point(&self) -> f32 {
        self.temperature - (100.0 - self.humidity) / 5.0
    }

    fn heat_index(&self) -> f32 {
        self.temperature
    }

    fn absolute_humidity(&self) -> f32 {
        self.humidity * 0.18
    }
}

/// Dialog the firmware is blocked in
#[derive(Debug, Clone, PartialEq, Eq)]
enum Dialog {
    ClearLog,
    ResetMetadata,
    SetMetadata { key: String, value: String },
}

#[derive(Debug, Clone, Copy, Default)]
struct Twa {
    samples: u32,
    pm1_0: f32,
    pm2_5: f32,
    pm4_0: f32,
    pm10: f32,
}

impl Twa {
    fn update(&mut self, r: &Reading) {
        let n = self.samples as f32;
        let avg = |prev: f32, x: f32| (prev * n + x) / (n + 1.0);
        self.pm1_0 = avg(self.pm1_0, r.pm1_0);
        self.pm2_5 = avg(self.pm2_5, r.pm2_5);
        self.pm4_0 = avg(self.pm4_0, r.pm4_0);
        self.pm10 = avg(self.pm10, r.pm10);
        self.samples += 1;
    }
}

/// A simulated SEN66 monitor console
#[derive(Debug)]
pub struct VirtualMonitor {
    metadata: BTreeMap<String, String>,
    measurement_interval_s: u32,
    logging_interval_s: u32,
    auto_measure: bool,
    utc_offset: i32,
    storage_warning: u8,
    /// Raw log file lines; `None` until the first logged measurement
    log: Option<Vec<String>>,
    twa_export: Option<Vec<String>>,
    twa: Twa,
    measurement_count: u64,
    uptime_s: u64,
    last_logged_s: Option<u64>,
    rtc_sync: Option<(u64, u64)>,
    corrupt_rows: BTreeSet<usize>,
    dialog: Option<Dialog>,
    input: Vec<u8>,
    pending_output: VecDeque<Vec<u8>>,
}

impl Default for VirtualMonitor {
    fn default() -> Self {
        Self::new(VirtualMonitorConfig::default())
    }
}

impl VirtualMonitor {
    pub fn new(config: VirtualMonitorConfig) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("device_name".to_string(), config.device_name);
        metadata.insert("firmware_version".to_string(), config.firmware_version);
        metadata.insert("session_start".to_string(), config.session_start);
        for key in DYNAMIC_KEYS {
            metadata.insert(key.to_string(), String::new());
        }

        let mut monitor = Self {
            metadata,
            measurement_interval_s: config.measurement_interval_s.max(1),
            logging_interval_s: config.logging_interval_s,
            auto_measure: config.auto_measure,
            utc_offset: 0,
            storage_warning: 80,
            log: None,
            twa_export: None,
            twa: Twa::default(),
            measurement_count: 0,
            uptime_s: 0,
            last_logged_s: None,
            rtc_sync: None,
            corrupt_rows: BTreeSet::new(),
            dialog: None,
            input: Vec::new(),
            pending_output: VecDeque::new(),
        };

        for _ in 0..config.preload_rows {
            monitor.advance();
        }
        monitor
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn measurement_interval(&self) -> u32 {
        self.measurement_interval_s
    }

    pub fn logging_interval(&self) -> u32 {
        self.logging_interval_s
    }

    pub fn utc_offset(&self) -> i32 {
        self.utc_offset
    }

    pub fn storage_warning(&self) -> u8 {
        self.storage_warning
    }

    pub fn measurement_count(&self) -> u64 {
        self.measurement_count
    }

    /// Whether the log file exists
    pub fn has_log(&self) -> bool {
        self.log.is_some()
    }

    /// Data rows currently in the log
    pub fn log_rows(&self) -> Vec<String> {
        let Some(lines) = &self.log else {
            return Vec::new();
        };
        lines
            .iter()
            .filter(|l| !l.starts_with('#'))
            .skip(1)
            .cloned()
            .collect()
    }

    /// Current RTC time, if the clock was ever synchronized
    pub fn rtc_time(&self) -> Option<u64> {
        self.rtc_sync
            .map(|(unix, at_uptime)| unix + (self.uptime_s - at_uptime))
    }

    pub fn auto_measure(&self) -> bool {
        self.auto_measure
    }

    pub fn set_auto_measure(&mut self, enabled: bool) {
        self.auto_measure = enabled;
    }

    /// Whether the console is blocked waiting for a confirmation answer
    pub fn is_awaiting_decision(&self) -> bool {
        self.dialog.is_some()
    }

    /// How long the open dialog waits before treating the answer as empty
    pub fn dialog_timeout(&self) -> Option<Duration> {
        self.dialog.as_ref().map(|dialog| match dialog {
            Dialog::ClearLog | Dialog::ResetMetadata => Duration::from_secs(15),
            Dialog::SetMetadata { .. } => Duration::from_secs(30),
        })
    }

    /// Print data row `index` (1-based) with a control character in it on dump
    pub fn corrupt_row(&mut self, index: usize) {
        self.corrupt_rows.insert(index);
    }

    /// Get the next pending chunk of console output
    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        self.pending_output.pop_front()
    }

    pub fn has_output(&self) -> bool {
        !self.pending_output.is_empty()
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Feed bytes received from the host
    pub fn push_input(&mut self, data: &[u8]) {
        self.input.extend_from_slice(data);
        while let Some(pos) = self.input.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.input.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            self.handle_line(&line);
        }
    }

    /// Answer an open dialog with an empty line, as the firmware does on timeout
    pub fn expire_dialog(&mut self) {
        if self.dialog.is_some() {
            debug!("Virtual monitor dialog timed out");
            self.handle_line("");
        }
    }

    fn handle_line(&mut self, line: &str) {
        if let Some(dialog) = self.dialog.take() {
            self.answer(dialog, line);
            return;
        }
        debug!("Virtual monitor command: {:?}", line);

        if let Some(rest) = line.strip_prefix("rtc ") {
            self.rtc_command(rest.trim());
            return;
        }
        if let Some(rest) = line.strip_prefix("meta ") {
            self.meta_command(rest.trim());
            return;
        }
        if line == "resetmeta" {
            self.say("");
            self.say("⚠ WARNING: This will reset all metadata to default state!");
            self.say("   - Keeps: device_name, firmware_version, session_start");
            self.say("   - Resets: user, project, location (empty values)");
            self.say("   - Deletes: All other custom metadata");
            self.say("   - Clears: CSV log file");
            self.say("");
            self.prompt("Type 'yes' to confirm: ");
            self.dialog = Some(Dialog::ResetMetadata);
            return;
        }
        if let Some(rest) = line.strip_prefix("prefs ").or_else(|| line.strip_prefix("set ")) {
            self.prefs_command(rest.trim());
            return;
        }

        match line.to_lowercase().as_str() {
            "dump" | "d" => self.dump_log(),
            "dump_twa" => self.dump_twa(),
            "clear" | "c" => {
                self.say("");
                self.say("⚠ WARNING: This will permanently delete the log file!");
                self.prompt("Type 'yes' to confirm deletion: ");
                self.dialog = Some(Dialog::ClearLog);
            }
            "config" | "cfg" => self.show_config(),
            "metadata" | "meta" => self.show_metadata(),
            "export_twa" | "twa" => self.export_twa(),
            "" => {}
            _ => {
                self.say("");
                self.say("❌ Unknown command. Type 'help' for available commands.");
                self.say("");
            }
        }
    }

    fn answer(&mut self, dialog: Dialog, line: &str) {
        let response = line.trim().to_lowercase();
        // The firmware ends the prompt line once it has read the answer
        self.say("");

        match dialog {
            Dialog::ClearLog => {
                if response == "yes" {
                    self.say("⚠ Clearing CSV log file...");
                    self.log = None;
                    self.say("✓ Log file cleared!");
                } else {
                    self.say("❌ Clear operation cancelled.");
                }
                self.say("");
            }
            Dialog::ResetMetadata => {
                if response == "yes" {
                    if self.log.take().is_some() {
                        self.say("✓ Log file cleared");
                    }
                    self.metadata.retain(|k, _| SYSTEM_KEYS.contains(&k.as_str()));
                    for key in DYNAMIC_KEYS {
                        self.metadata.insert(key.to_string(), String::new());
                    }
                    self.say("✓ Metadata reset to defaults");
                } else {
                    self.say("❌ Metadata reset cancelled.");
                }
                self.say("");
            }
            Dialog::SetMetadata { key, value } => match response.as_str() {
                "download" | "dump" => {
                    self.say("📄 Outputting CSV data for download...");
                    self.say(RULE);
                    self.say("");
                    self.dump_log();
                    self.say("");
                    self.say(RULE);
                    self.say("✓ CSV output complete. Save it on the host before continuing.");
                    self.say("");
                    self.say("ℹ You can now:");
                    self.say("  - Run the meta command again and choose 'yes' to proceed");
                    self.say("  - Or cancel and keep the existing log file");
                    self.say("");
                }
                "yes" => {
                    self.set_metadata(&key, &value, true);
                    self.say("");
                }
                _ => {
                    self.say("❌ Metadata change cancelled.");
                    self.say("");
                }
            },
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn rtc_command(&mut self, sub: &str) {
        if sub == "status" {
            self.say("");
            self.say("🕐 RTC Status Report:");
            self.say(RULE);
            self.say("RTC Status:");
            match self.rtc_sync {
                Some((last_sync, _)) => {
                    let now = self.rtc_time().unwrap_or(last_sync);
                    self.say("  Initialized: YES");
                    self.say(&format!("  Current Time: {}", now));
                    self.say(&format!("  Last Sync: {}", last_sync));
                    self.say(&format!("  Time Since Sync: {} seconds", now - last_sync));
                    self.say("  Needs Sync: NO");
                    self.say("  Active Source: RTC Time");
                }
                None => {
                    self.say("  Initialized: NO");
                    self.say("  Active Source: Millis Only (no RTC)");
                }
            }
            self.say(RULE);
            self.say("");
        } else if let Some(arg) = sub.strip_prefix("sync ") {
            match arg.trim().parse::<u32>() {
                Ok(unix) if unix > 0 => {
                    self.say(&format!("[RTC] Setting RTC time to: {}", unix));
                    self.rtc_sync = Some((u64::from(unix), self.uptime_s));
                    self.say("[RTC] RTC time set successfully");
                    self.say(&format!(
                        "✓ ESP32 RTC synchronized to Unix timestamp: {}",
                        unix
                    ));
                    self.say("✓ RTC will maintain time across power cycles");
                    self.say("");
                }
                _ => {
                    self.say("❌ ERROR: Invalid Unix timestamp");
                    self.say("");
                    self.say("Usage: rtc sync <unix_timestamp>");
                    self.say("");
                }
            }
        } else {
            self.say("❌ ERROR: Unknown RTC command");
            self.say("");
        }
    }

    fn prefs_command(&mut self, params: &str) {
        let Some((key, value)) = params.split_once(' ') else {
            self.say("❌ ERROR: Invalid format");
            self.say("");
            self.say("Usage: prefs <measurement|logging> <seconds>");
            self.say("");
            return;
        };
        // Unparsable numbers read as 0, like the firmware's toInt()
        let value: i32 = value.trim().parse().unwrap_or(0);

        match key.to_lowercase().as_str() {
            "measurement" | "meas" => {
                self.measurement_interval_s = value.max(1) as u32;
                self.say(&format!(
                    "Measurement interval set to {} seconds",
                    self.measurement_interval_s
                ));
                self.say("Configuration saved to NVS");
            }
            "logging" | "log" => {
                self.logging_interval_s = value.max(0) as u32;
                self.say(&format!(
                    "Logging interval set to {} seconds (0 = every measurement)",
                    self.logging_interval_s
                ));
                self.say("Configuration saved to NVS");
            }
            "utc" | "timezone" | "offset" => {
                self.utc_offset = value;
                self.say(&format!("UTC offset set to {:+} hours", value));
                self.say("Configuration saved to NVS");
            }
            "storage_warning" | "stor_warn" => {
                if (1..=99).contains(&value) {
                    self.storage_warning = value as u8;
                    self.say(&format!("✓ Storage warning threshold set to {}%", value));
                } else {
                    self.say("❌ Storage threshold must be between 1-99%");
                }
            }
            other => {
                self.say(&format!("❌ Unknown setting: {}", other));
                self.say("Available settings: measurement, logging, utc, storage_warning");
                self.say("");
            }
        }
    }

    fn meta_command(&mut self, params: &str) {
        let Some((key, value)) = params.split_once(' ') else {
            self.say("❌ ERROR: Invalid format");
            self.say("");
            self.say("Usage: meta <key> <value>");
            self.say("");
            return;
        };
        let key = key.trim().to_string();
        let value = value.trim().to_string();

        if DYNAMIC_KEYS.contains(&key.as_str()) && self.log.is_some() {
            let old = self.metadata(&key).unwrap_or_default().to_string();
            if !old.is_empty() && old == value {
                self.say("ℹ Metadata unchanged (same value).");
                self.say("");
                return;
            }
            self.say("");
            self.say("⚠ WARNING: Changing this metadata will affect CSV data columns!");
            self.say(&format!("   Current value: {}", old));
            self.say(&format!("   New value: {}", value));
            self.say("");
            self.say("Options:");
            self.say("  1. Type 'download' to save existing log first");
            self.say("  2. Type 'yes' to clear log and set new metadata");
            self.say("  3. Press Enter to cancel");
            self.prompt("\r\nYour choice: ");
            self.dialog = Some(Dialog::SetMetadata { key, value });
        } else {
            self.set_metadata(&key, &value, false);
            self.say("");
        }
    }

    fn set_metadata(&mut self, key: &str, value: &str, clear_log: bool) {
        self.metadata.insert(key.to_string(), value.to_string());
        self.say("Metadata saved to NVS");
        self.say(&format!("Metadata set: {} = {}", key, value));
        if clear_log && self.log.take().is_some() {
            self.say("⚠ Clearing existing log file due to metadata change...");
            self.say("✓ Log file cleared. New log will include updated metadata.");
        }
    }

    fn show_config(&mut self) {
        self.say("");
        self.say("📋 Current Configuration:");
        self.say(RULE);
        self.say("  Setting                    Key               Value");
        self.say("  ─────────────────────────  ────────────────  ─────────────");
        self.say(&format!(
            "  Measurement Interval       measurement       {} seconds",
            self.measurement_interval_s
        ));
        self.say(&format!(
            "  Logging Interval           logging           {} seconds",
            self.logging_interval_s
        ));
        self.say(&format!(
            "  UTC Offset                 utc               {:+} hours",
            self.utc_offset
        ));
        self.say(&format!(
            "  Storage Warning Threshold  storage_warning   {}%",
            self.storage_warning
        ));
        self.say(RULE);
        self.say("");
        self.say("💡 Tip: Use 'prefs <key> <value>' to change configuration settings");
    }

    fn show_metadata(&mut self) {
        self.say("");
        self.say("📝 Current Metadata:");
        self.say(RULE);
        self.say("  Key                    Value");
        self.say("  ─────────────────────  ────────────────────────────────");
        let rows: Vec<String> = SYSTEM_KEYS
            .iter()
            .chain(DYNAMIC_KEYS.iter())
            .filter_map(|k| {
                self.metadata(k)
                    .filter(|v| !v.is_empty())
                    .map(|v| format!("  {:<20}  {}", k, v))
            })
            .collect();
        for row in rows {
            self.say(&row);
        }
        self.say(RULE);
        self.say("💡 Tip: Use 'meta <key> <value>' to set metadata");
        self.say("   Example: meta user John_Doe");
        self.say("");
    }

    fn dump_log(&mut self) {
        self.say("");
        self.say(&format!("📄 Dumping CSV file: {}", LOG_PATH));
        self.say(RULE);

        let Some(lines) = self.log.clone() else {
            self.say("❌ CSV file does not exist yet.");
            self.say("   Wait for first measurement to create the file.");
            self.say("");
            return;
        };

        let size: usize = lines.iter().map(|l| l.len() + 1).sum();
        self.say(&format!("File size: {} bytes", size));
        self.say("");

        let mut header_seen = false;
        let mut data_num = 0usize;
        for line in &lines {
            if line.starts_with('#') {
                self.say(&format!("[COMMENT] {}", line));
            } else if !header_seen && line.contains(',') {
                header_seen = true;
                self.say(&format!("[HEADER] {}", line));
            } else {
                data_num += 1;
                let payload = if self.corrupt_rows.contains(&data_num) {
                    corrupt(line)
                } else {
                    line.clone()
                };
                self.say(&format!("[{:4}] {}", data_num, payload));
            }
        }

        self.say(RULE);
        self.say(&format!(
            "✓ Displayed {} lines ({} bytes total)",
            lines.len(),
            size
        ));
        self.say("");
    }

    fn export_twa(&mut self) {
        self.say("");
        self.say("📊 Calculating OSHA-compliant 8-hour TWA...");

        let rows = self.log_rows();
        if rows.is_empty() {
            self.say("❌ TWA export failed. Check log file.");
            return;
        }

        let hours = rows.len() as f32 * self.measurement_interval_s as f32 / 3600.0;
        let mut export = vec![
            "# OSHA 8-hour TWA Export".to_string(),
            format!("# Device: {}", self.metadata("device_name").unwrap_or_default()),
            format!("# Data Coverage: {:.1} hours", hours),
            "timestamp,local_time,twa_pm1_0,twa_pm2_5,twa_pm4_0,twa_pm10".to_string(),
        ];
        let twa = self.twa;
        export.extend(rows.iter().map(|row| {
            let mut fields = row.split(',');
            let timestamp = fields.next().unwrap_or_default();
            let local = fields.next().unwrap_or_default();
            format!(
                "{},{},{:.3},{:.3},{:.3},{:.3}",
                timestamp, local, twa.pm1_0, twa.pm2_5, twa.pm4_0, twa.pm10
            )
        }));
        self.twa_export = Some(export);

        self.say("✓ TWA Export Complete!");
        self.say(&format!("📈 Data Coverage: {:.1} hours", hours));
        self.say(if hours >= 8.0 {
            "🏭 OSHA Compliant: YES (≥8 hours)"
        } else {
            "🏭 OSHA Compliant: NO (< 8 hours - insufficient data)"
        });
        self.say(&format!("📋 PM2.5 8-hr TWA: {:.3} µg/m³", twa.pm2_5));
        self.say(&format!("📋 PM10 8-hr TWA: {:.3} µg/m³", twa.pm10));
        self.say(&format!("📁 Export file: {}", TWA_PATH));
        self.say(&format!("📊 Samples analyzed: {}", rows.len()));
        self.say("");
    }

    fn dump_twa(&mut self) {
        self.say("");
        self.say(&format!("📄 Dumping TWA export file: {}", TWA_PATH));
        self.say(RULE);

        let Some(lines) = self.twa_export.clone() else {
            self.say("❌ TWA export file does not exist yet.");
            self.say("   Use 'export_twa' command to create the file first.");
            self.say("");
            return;
        };

        let size: usize = lines.iter().map(|l| l.len() + 1).sum();
        self.say(&format!("File size: {} bytes", size));
        self.say("");

        let mut header_seen = false;
        let mut data_num = 0usize;
        for line in &lines {
            if line.starts_with('#') {
                self.say(&format!("[COMMENT]{}", line));
            } else if !header_seen && line.contains(',') {
                header_seen = true;
                self.say(&format!("[HEADER]{}", line));
            } else {
                data_num += 1;
                self.say(&format!("[DATA]{}", line));
            }
        }

        self.say("");
        self.say(&format!(
            "Total lines: {} (including {} data rows)",
            lines.len(),
            data_num
        ));
        self.say(RULE);
        self.say("");
    }

    // ------------------------------------------------------------------
    // Measurements
    // ------------------------------------------------------------------

    /// Take one measurement, print its block and log it if due
    pub fn measure(&mut self) {
        let (reading, logged) = self.advance();
        self.print_measurement(&reading, logged);
    }

    fn advance(&mut self) -> (Reading, bool) {
        self.measurement_count += 1;
        self.uptime_s += u64::from(self.measurement_interval_s);
        let reading = Reading::synthetic(self.measurement_count);
        self.twa.update(&reading);

        let due = match self.last_logged_s {
            None => true,
            Some(_) if self.logging_interval_s == 0 => true,
            Some(last) => self.uptime_s - last >= u64::from(self.logging_interval_s),
        };
        if due {
            self.last_logged_s = Some(self.uptime_s);
            self.log_entry(&reading);
        }
        (reading, due)
    }

    fn log_entry(&mut self, r: &Reading) {
        let dynamic: Vec<String> = DYNAMIC_KEYS
            .iter()
            .filter_map(|k| self.metadata(k).filter(|v| !v.is_empty()).map(str::to_string))
            .collect();

        if self.log.is_none() {
            let mut lines = vec![
                "# OSH-Monitor Air Quality Data Log".to_string(),
                format!("# Device: {}", self.metadata("device_name").unwrap_or_default()),
                format!(
                    "# Firmware Version: {}",
                    self.metadata("firmware_version").unwrap_or_default()
                ),
                format!(
                    "# Session Start: {}",
                    self.metadata("session_start").unwrap_or_default()
                ),
            ];
            for key in DYNAMIC_KEYS {
                if let Some(v) = self.metadata(key).filter(|v| !v.is_empty()) {
                    lines.push(format!("# {}: {}", key, v));
                }
            }
            lines.push("#".to_string());

            let mut header = String::from("timestamp,local_time");
            for key in DYNAMIC_KEYS {
                if self.metadata(key).is_some_and(|v| !v.is_empty()) {
                    header.push(',');
                    header.push_str(key);
                }
            }
            header.push(',');
            header.push_str(MEASUREMENT_COLUMNS);
            lines.push(header);
            self.log = Some(lines);
        }

        let timestamp = self.rtc_time().unwrap_or(self.uptime_s);
        let local = timestamp as i64 + i64::from(self.utc_offset) * 3600;
        let mut row = format!("{},{}", timestamp, local);
        for value in &dynamic {
            row.push(',');
            row.push_str(value);
        }
        let twa = self.twa;
        row.push_str(&format!(
            ",{:.2},{:.2},{:.0},{:.0},{:.2},{:.2},{:.2},{:.2},{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2}",
            r.temperature,
            r.humidity,
            r.voc_index,
            r.nox_index,
            r.pm1_0,
            r.pm2_5,
            r.pm4_0,
            r.pm10,
            r.co2,
            r.dew_point(),
            r.heat_index(),
            r.absolute_humidity(),
            twa.pm1_0,
            twa.pm2_5,
            twa.pm4_0,
            twa.pm10,
        ));

        if let Some(lines) = self.log.as_mut() {
            lines.push(row);
        }
    }

    fn print_measurement(&mut self, r: &Reading, logged: bool) {
        let twa = self.twa;
        self.say("");
        self.say(&format!(
            "--- Measurement #{} (Time: {} sec) ---",
            self.measurement_count, self.uptime_s
        ));
        self.say("ENVIRONMENTAL CONDITIONS:");
        self.say(&format!("  Temperature:        {:.2} °C", r.temperature));
        self.say(&format!("  Humidity:           {:.2} %RH", r.humidity));
        self.say(&format!("  Dew Point:          {:.2} °C", r.dew_point()));
        self.say(&format!("  Heat Index:         {:.2} °C", r.heat_index()));
        self.say(&format!("  Absolute Humidity:  {:.2} g/m³", r.absolute_humidity()));
        self.say("AIR QUALITY INDICES:");
        self.say(&format!("  VOC Index:          {:.0}", r.voc_index));
        self.say(&format!("  NOx Index:          {:.0}", r.nox_index));
        self.say(&format!("  CO2:                {} ppm", r.co2));
        self.say("PARTICULATE MATTER (Current):");
        self.say(&format!("  PM1.0:              {:.2} ug/m3", r.pm1_0));
        self.say(&format!("  PM2.5:              {:.2} ug/m3", r.pm2_5));
        self.say(&format!("  PM4.0:              {:.2} ug/m3", r.pm4_0));
        self.say(&format!("  PM10:               {:.2} ug/m3", r.pm10));
        self.say("8-HOUR TIME-WEIGHTED AVERAGE (TWA):");
        self.say(&format!("  TWA PM1.0:          {:.2} ug/m3", twa.pm1_0));
        self.say(&format!("  TWA PM2.5:          {:.2} ug/m3", twa.pm2_5));
        self.say(&format!("  TWA PM4.0:          {:.2} ug/m3", twa.pm4_0));
        self.say(&format!("  TWA PM10:           {:.2} ug/m3", twa.pm10));
        if logged {
            self.say("✓ Data logged to CSV file");
        }
        self.say(RULE);
        self.say("");
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    fn say(&mut self, text: &str) {
        let mut bytes = text.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        self.pending_output.push_back(bytes);
    }

    fn prompt(&mut self, text: &str) {
        self.pending_output.push_back(text.as_bytes().to_vec());
    }
}

/// Insert a control character after the first field character
fn corrupt(line: &str) -> String {
    let mut chars = line.chars();
    let first: String = chars.by_ref().take(1).collect();
    format!("{}\u{1}{}", first, chars.as_str())
}
