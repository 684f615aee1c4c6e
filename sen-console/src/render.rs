//! Text shown to the operator

use std::fmt::Write;

use sen_detect::SerialPortInfo;
use sen_link::{ConfirmationOutcome, ConfirmationReport, ExtractionStats, MeasurementBlock};
use sen_protocol::{ClassifiedLine, UTC_OFFSET_RANGE};

use crate::export::SaveOutcome;

/// Console lines, one per output line
pub fn lines(lines: &[ClassifiedLine]) -> String {
    let mut out = String::new();
    for line in lines {
        let _ = writeln!(out, "{}", line.text);
    }
    out
}

/// Lines the device printed after the operator answered
pub fn report(report: &ConfirmationReport) -> String {
    let after_prompt = match report.transcript.iter().rposition(|l| l.is_prompt()) {
        Some(i) if report.prompted => &report.transcript[i + 1..],
        _ => &report.transcript[..],
    };

    let mut out = lines(after_prompt);
    let verdict = match report.outcome {
        ConfirmationOutcome::Confirmed => "✓ Done",
        ConfirmationOutcome::Cancelled => "✗ Cancelled, nothing changed",
        ConfirmationOutcome::TimedOut if !report.prompted => "⚠ Device did not ask for confirmation",
        ConfirmationOutcome::TimedOut => "⚠ No answer from device",
    };
    let _ = writeln!(out, "{}", verdict);
    out
}

pub fn status(block: Option<&MeasurementBlock>) -> String {
    let Some(block) = block else {
        return "⚠ No measurement received\n".to_string();
    };
    let mut out = String::new();
    if !block.complete {
        let _ = writeln!(out, "(partial measurement)");
    }
    out.push_str(&lines(&block.lines));
    out
}

/// One line summarising a download
pub fn saved(what: &str, stats: &ExtractionStats, outcome: &SaveOutcome) -> String {
    let mut out = match outcome {
        SaveOutcome::Written { path, rows, bytes } => format!(
            "✓ {} saved to {} ({} rows, {} bytes)",
            what,
            path.display(),
            rows,
            bytes
        ),
        SaveOutcome::Skipped => format!("⚠ {}: no data received, nothing written", what),
    };
    if stats.corrupted > 0 {
        let _ = write!(out, ", {} corrupted lines dropped", stats.corrupted);
    }
    if !stats.completed {
        out.push_str(" (device did not report completion)");
    }
    out.push('\n');
    out
}

pub fn ports(ports: &[SerialPortInfo]) -> String {
    let mut out = String::from("Available serial ports:\n");
    if ports.is_empty() {
        out.push_str("  (none found)\n");
    }
    for port in ports {
        let _ = writeln!(out, "  {}", port.port);
        let _ = writeln!(out, "    Description: {}", port.description());
        let _ = writeln!(
            out,
            "    Manufacturer: {}",
            port.manufacturer.as_deref().unwrap_or("n/a")
        );
    }
    let _ = writeln!(out, "  {} (built-in virtual monitor)", sen_sim::VIRTUAL_PORT_NAME);
    out
}

pub fn timezone_help(offset: i32) -> String {
    let mut out = format!(
        "❌ Invalid UTC offset {}. Must be between {} and +{}.\n",
        offset,
        UTC_OFFSET_RANGE.start(),
        UTC_OFFSET_RANGE.end()
    );
    out.push_str("\nCommon timezones:\n");
    for (offset, name) in COMMON_TIMEZONES {
        let _ = writeln!(out, "  {:>3}: {}", offset, name);
    }
    out
}

const COMMON_TIMEZONES: &[(&str, &str)] = &[
    ("-8", "PST (Pacific)"),
    ("-7", "MST (Mountain)"),
    ("-6", "CST (Central)"),
    ("-5", "EST (Eastern)"),
    ("0", "UTC/GMT"),
    ("+1", "CET (Central Europe)"),
    ("+8", "CST (China)"),
    ("+9", "JST (Japan)"),
    ("+14", "LINT (Line Islands)"),
];

pub fn about() -> String {
    format!(
        "SEN66-Dosimetry console v{}\n\
         \n\
         Advanced air quality monitoring with the Sensirion SEN66 sensor:\n\
         particulate matter, VOC and NOx indices, CO2, temperature and\n\
         humidity, with on-device logging and OSHA 8-hour TWA exposure.\n\
         \n\
         Creator: Christopher Lee\n\
         License: GPLv3\n",
        env!("CARGO_PKG_VERSION")
    )
}

pub fn help() -> String {
    "\
Commands:
  status                 Show the current measurement
  clear                  Clear the log file (asks for confirmation)
  download [file]        Download the log and a TWA export next to it
  twa [file]             Export 8-hour TWA calculations
  rtc status|sync        Show or set the device clock
  config                 Show the device configuration
  prefs <key> <value>    Change measurement, logging, utc or storage_warning
  timezone <offset>      Set the UTC offset (-12 to +14)
  metadata               Show all metadata
  meta <key> <value>     Set a metadata value
  resetmeta              Reset metadata to defaults (clears the log)
  monitor                Print live output until Ctrl-C
  list-ports             List serial ports
  about                  Show project information
  help                   Show this help
  exit                   Leave the console
"
    .to_string()
}
