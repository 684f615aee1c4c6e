//! Line classification for the SEN66 console output
//!
//! The firmware interleaves command responses with live telemetry on the same
//! serial console. Every decoded line is mapped to exactly one [`LineClass`]
//! by a fixed, ordered rule list (earlier rules win):
//!
//! 1. `[tag] payload` bracket records
//! 2. Terminal markers that end a particular response
//! 3. Confirmation prompts
//! 4. Measurement block markers
//! 5. Plain text
//!
//! Telemetry lines are additionally recognised by [`is_noise`] so that
//! control-plane readers can skip them instead of stopping on them.

use std::fmt;

/// Position of a line inside a periodic measurement block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementMark {
    /// `--- Measurement #N (Time: T sec) ---`
    Start,
    /// `TWA PM10:` - last value line of the block
    Summary,
}

/// Tag of a bracket record line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BracketTag {
    /// `[COMMENT]` - metadata comment from the file preamble
    Comment,
    /// `[HEADER]` - CSV column header
    Header,
    /// `[   7]` - numbered data row of the raw log dump
    Index(u64),
    /// `[DATA]` - unnumbered data row of the TWA dump
    Data,
    /// Any other tag (e.g. `[RTC]` log lines)
    Other(String),
}

impl BracketTag {
    fn parse(tag: &str) -> Self {
        match tag {
            "COMMENT" => BracketTag::Comment,
            "HEADER" => BracketTag::Header,
            "DATA" => BracketTag::Data,
            t if !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()) => t
                .parse()
                .map(BracketTag::Index)
                .unwrap_or_else(|_| BracketTag::Other(t.to_string())),
            t => BracketTag::Other(t.to_string()),
        }
    }

    /// Returns true for tags that carry CSV data rows
    pub fn is_data_row(&self) -> bool {
        matches!(self, BracketTag::Index(_) | BracketTag::Data)
    }
}

impl fmt::Display for BracketTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BracketTag::Comment => f.write_str("COMMENT"),
            BracketTag::Header => f.write_str("HEADER"),
            BracketTag::Index(n) => write!(f, "{}", n),
            BracketTag::Data => f.write_str("DATA"),
            BracketTag::Other(t) => f.write_str(t),
        }
    }
}

/// A `[tag] payload` line split into its parts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BracketRecord {
    /// Text between the brackets, trimmed
    pub tag: BracketTag,
    /// Text after the closing bracket, trimmed
    pub payload: String,
}

/// Fixed substrings that end a particular kind of response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalKind {
    /// `Displayed N lines` (log dump) or `Total lines:` (TWA dump)
    BulkComplete,
    /// `Active Source:` - last line of the RTC status report
    RtcStatus,
    /// `Export file:` - TWA export written
    TwaExported,
    /// `TWA export failed`
    TwaFailed,
    /// `Metadata set:`
    MetadataSet,
    /// `reset to defaults`
    MetadataReset,
    /// `unchanged` - metadata already had the requested value
    MetadataUnchanged,
    /// `cleared`
    Cleared,
    /// `cancelled`
    Cancelled,
    /// `You can now:` - device handed control back after a backup dump
    ExportHandoff,
    /// `synchronized` / `power cycles`
    RtcSynced,
    /// `saved to NVS`, `interval set to`, `UTC offset set to`, `threshold set to`
    SettingApplied,
    /// `Tip:` - closing hint of the config and metadata tables
    Tip,
    /// `error`
    Error,
}

/// Category of a console line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LineClass {
    /// Part of a periodic measurement block
    Measurement(MeasurementMark),
    /// `[tag] payload` record
    Bracket(BracketRecord),
    /// Device is waiting for a confirmation decision
    Prompt,
    /// End of a response
    Terminal(TerminalKind),
    /// Anything else
    Plain,
}

/// A decoded line together with its category
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassifiedLine {
    /// Trimmed line text
    pub text: String,
    /// Derived category
    pub class: LineClass,
}

impl ClassifiedLine {
    /// Terminal kind, if this line is a terminal marker
    pub fn terminal(&self) -> Option<TerminalKind> {
        match self.class {
            LineClass::Terminal(kind) => Some(kind),
            _ => None,
        }
    }

    /// Returns true if this line is the given terminal marker
    pub fn is_terminal(&self, kind: TerminalKind) -> bool {
        self.terminal() == Some(kind)
    }

    /// Returns true if this line is a confirmation prompt
    pub fn is_prompt(&self) -> bool {
        matches!(self.class, LineClass::Prompt)
    }

    /// Bracket record, if this line is one
    pub fn bracket(&self) -> Option<&BracketRecord> {
        match &self.class {
            LineClass::Bracket(record) => Some(record),
            _ => None,
        }
    }

    /// Measurement mark, if this line belongs to a measurement block
    pub fn measurement(&self) -> Option<MeasurementMark> {
        match self.class {
            LineClass::Measurement(mark) => Some(mark),
            _ => None,
        }
    }

    /// See [`is_noise`]
    ///
    /// Records, prompts and terminal markers are never noise, whatever
    /// words they carry.
    pub fn is_noise(&self) -> bool {
        matches!(self.class, LineClass::Plain | LineClass::Measurement(_))
            && is_noise(&self.text)
    }
}

impl fmt::Display for ClassifiedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// How a needle is compared against a line
enum Needle {
    /// Case-sensitive substring
    Exact(&'static str),
    /// Case-insensitive substring (needle is lowercase)
    Folded(&'static str),
    /// Both case-sensitive substrings present
    Both(&'static str, &'static str),
}

impl Needle {
    fn matches(&self, line: &str, folded: &str) -> bool {
        match self {
            Needle::Exact(n) => line.contains(n),
            Needle::Folded(n) => folded.contains(n),
            Needle::Both(a, b) => line.contains(a) && line.contains(b),
        }
    }
}

/// Terminal markers in priority order
///
/// These strings are the de facto contract with the firmware.
const TERMINAL_RULES: &[(TerminalKind, &[Needle])] = &[
    (
        TerminalKind::BulkComplete,
        &[Needle::Both("Displayed", "lines"), Needle::Exact("Total lines:")],
    ),
    (TerminalKind::RtcStatus, &[Needle::Exact("Active Source:")]),
    (TerminalKind::TwaExported, &[Needle::Exact("Export file:")]),
    (TerminalKind::TwaFailed, &[Needle::Exact("TWA export failed")]),
    (TerminalKind::MetadataSet, &[Needle::Exact("Metadata set:")]),
    (TerminalKind::MetadataReset, &[Needle::Folded("reset to defaults")]),
    (TerminalKind::MetadataUnchanged, &[Needle::Folded("unchanged")]),
    (TerminalKind::Cleared, &[Needle::Folded("cleared")]),
    (TerminalKind::Cancelled, &[Needle::Folded("cancelled")]),
    (TerminalKind::ExportHandoff, &[Needle::Folded("can now:")]),
    (
        TerminalKind::RtcSynced,
        &[Needle::Folded("synchronized"), Needle::Folded("power cycles")],
    ),
    (
        TerminalKind::SettingApplied,
        &[
            Needle::Exact("saved to NVS"),
            Needle::Folded("interval set to"),
            Needle::Folded("utc offset set to"),
            Needle::Folded("threshold set to"),
        ],
    ),
    (TerminalKind::Tip, &[Needle::Exact("Tip:")]),
    (TerminalKind::Error, &[Needle::Folded("error")]),
];

const PROMPT_NEEDLES: &[Needle] = &[
    Needle::Exact("Type 'yes' to confirm"),
    Needle::Folded("choice:"),
];

const MEASUREMENT_START: &str = "Measurement #";
const MEASUREMENT_SUMMARY: &str = "TWA PM10:";

/// Value labels of a measurement block (`  PM2.5:   4.00 ug/m3`)
const TELEMETRY_LABELS: &[&str] = &[
    "PM1.0",
    "PM2.5",
    "PM4.0",
    "PM10",
    "Temperature",
    "Humidity",
    "Dew Point",
    "Heat Index",
    "Absolute Humidity",
    "VOC Index",
    "NOx Index",
    "CO2",
    "Timestamp",
];

/// Label prefixes of the running TWA value lines
const TELEMETRY_LABEL_PREFIXES: &[&str] = &["TWA ", "Fast TWA", "Export TWA"];

/// Section headings of a measurement block
const TELEMETRY_HEADINGS: &[&str] = &[
    "ENVIRONMENTAL CONDITIONS",
    "AIR QUALITY INDICES",
    "PARTICULATE MATTER",
    "8-HOUR TIME-WEIGHTED AVERAGE",
    "TIME-WEIGHTED AVERAGE",
];

const DATA_LOGGED: &str = "Data logged to CSV";

/// Classify a decoded, trimmed console line
pub fn classify(line: &str) -> ClassifiedLine {
    ClassifiedLine {
        text: line.to_string(),
        class: classify_text(line),
    }
}

fn classify_text(line: &str) -> LineClass {
    if let Some(record) = parse_bracket(line) {
        return LineClass::Bracket(record);
    }

    let folded = line.to_lowercase();

    for (kind, needles) in TERMINAL_RULES {
        if needles.iter().any(|n| n.matches(line, &folded)) {
            return LineClass::Terminal(*kind);
        }
    }

    if PROMPT_NEEDLES.iter().any(|n| n.matches(line, &folded)) {
        return LineClass::Prompt;
    }

    if line.contains(MEASUREMENT_START) {
        return LineClass::Measurement(MeasurementMark::Start);
    }
    if line.contains(MEASUREMENT_SUMMARY) {
        return LineClass::Measurement(MeasurementMark::Summary);
    }

    LineClass::Plain
}

/// Split a `[tag] payload` line
///
/// The tag ends at the first `]` after the opening bracket.
pub fn parse_bracket(line: &str) -> Option<BracketRecord> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    Some(BracketRecord {
        tag: BracketTag::parse(rest[..end].trim()),
        payload: rest[end + 1..].trim().to_string(),
    })
}

/// Returns true for live telemetry lines
///
/// Callers that only want control-plane output (RTC status, config,
/// metadata) skip these lines rather than terminating on them.
///
/// Only the shapes the firmware prints inside a measurement block count: a
/// `--- Measurement #N` banner, a section heading, a `Label: value` line with
/// a telemetry label, and the "Data logged" notice. Telemetry words elsewhere
/// in a line (`Metadata set: project = CO2_Study`) do not.
pub fn is_noise(line: &str) -> bool {
    let line = line.trim();

    if line.starts_with("---") && line.contains(MEASUREMENT_START) {
        return true;
    }
    if TELEMETRY_HEADINGS.iter().any(|h| line.starts_with(h)) {
        return true;
    }
    if line
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
        .starts_with(DATA_LOGGED)
    {
        return true;
    }

    let Some((label, _)) = line.split_once(':') else {
        return false;
    };
    let label = label.trim();
    TELEMETRY_LABELS.contains(&label)
        || TELEMETRY_LABEL_PREFIXES
            .iter()
            .any(|p| label.starts_with(p))
}

/// Decode raw line bytes leniently
///
/// Invalid UTF-8 is replaced, surrounding whitespace (including `\r\n`) is
/// trimmed and empty lines yield `None`.
pub fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
