//! Node status report parser
//!
//! The radio renders its node database as a box-drawn table:
//!
//! ```text
//! ╒═════╤════════════╤═══════╤═══════════╤════════════╤═════════════╤════════════╤═══════════╤═════════╤═════════════════════╤══════════╕
//! │   N │ User       │ AKA   │ ID        │ Latitude   │ Longitude   │ Altitude   │ Battery   │ SNR     │ LastHeard           │ Since    │
//! ╞═════╪════════════╪═══════╪═══════════╪════════════╪═════════════╪════════════╪═══════════╪═════════╪═════════════════════╪══════════╡
//! │   1 │ Base Camp  │ BC    │ !a1b2c3d4 │ 3.1390°    │ 101.6869°   │ 45m        │ 100%      │ 6.25 dB │ 2026-10-19 10:00:00 │ 1 min ago│
//! ```
//!
//! Parsing happens in two stages. A tokenizer decodes literal escape
//! sequences (some clients hand over the table as an ASCII-escaped string,
//! `\u2502` for the delimiter and `\xb0` for the degree sign) and splits each
//! row on [`CELL_DELIMITER`]. Then a grammar table with one recognizer per
//! column checks the cells strictly in column order. The first cell a
//! recognizer rejects drops the whole row; a partial record is never emitted.
//!
//! Format drift of the upstream renderer should only ever touch [`GRAMMAR`].

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use tracing::{debug, trace};

use crate::config::{ABSENT, CELL_DELIMITER};
use crate::registry::{NodeRecord, NODE_FIELD_COUNT};

/// Report columns in rendering order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Display ordinal
    Index,
    /// Long user name
    DisplayName,
    /// Short name
    ShortName,
    /// Node id
    NodeId,
    /// Latitude
    Latitude,
    /// Longitude
    Longitude,
    /// Altitude
    Altitude,
    /// Battery
    Battery,
    /// Signal to noise ratio
    Snr,
    /// Last heard
    LastHeard,
    /// Time since last heard
    Since,
}

/// Recognizer applied to the cells of one column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Contiguous digits
    Ordinal,
    /// Starts at the first alphanumeric character, kept verbatim
    Name,
    /// Like [`FieldKind::Name`] with embedded spaces dropped
    CompactName,
    /// Degrees, annotated with `" [degree]"`
    Coordinate,
    /// Meters, terminated by `m`
    Altitude,
    /// Battery level, annotated with `[VDC]`
    Battery,
    /// Decibels, terminated by `dB`
    Snr,
    /// Anything, trimmed
    FreeText,
}

/// Column layout of the node report
pub const GRAMMAR: [(Column, FieldKind); NODE_FIELD_COUNT] = [
    (Column::Index, FieldKind::Ordinal),
    (Column::DisplayName, FieldKind::Name),
    (Column::ShortName, FieldKind::CompactName),
    (Column::NodeId, FieldKind::CompactName),
    (Column::Latitude, FieldKind::Coordinate),
    (Column::Longitude, FieldKind::Coordinate),
    (Column::Altitude, FieldKind::Altitude),
    (Column::Battery, FieldKind::Battery),
    (Column::Snr, FieldKind::Snr),
    (Column::LastHeard, FieldKind::FreeText),
    (Column::Since, FieldKind::FreeText),
];

static ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("ordinal pattern"));
static COORDINATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-?\d+(?:\.\d+)?)\s*°?$").expect("coordinate pattern"));
static ALTITUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-?\d+(?:\.\d+)?)\s*m$").expect("altitude pattern"));
static BATTERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*[%V]?$").expect("battery pattern"));
static SNR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-?\d+(?:\.\d+)?)\s*dB$").expect("snr pattern"));

impl FieldKind {
    /// Recognize one cell, returning the normalized field value
    pub fn recognize(self, cell: &str) -> Option<String> {
        let cell = cell.trim();
        match self {
            FieldKind::Ordinal => ORDINAL.is_match(cell).then(|| cell.to_string()),
            FieldKind::Name => name(cell).map(str::to_string),
            FieldKind::CompactName => name(cell).map(|n| n.chars().filter(|c| *c != ' ').collect()),
            FieldKind::Coordinate => measurement(cell, &COORDINATE, " [degree]"),
            FieldKind::Altitude => measurement(cell, &ALTITUDE, "m"),
            FieldKind::Battery => measurement(cell, &BATTERY, "[VDC]"),
            FieldKind::Snr => measurement(cell, &SNR, "dB"),
            FieldKind::FreeText => Some(cell.to_string()),
        }
    }
}

fn name(cell: &str) -> Option<&str> {
    let start = cell.find(char::is_alphanumeric)?;
    Some(&cell[start..])
}

fn measurement(cell: &str, pattern: &Regex, unit: &str) -> Option<String> {
    if cell == ABSENT {
        return Some(ABSENT.to_string());
    }
    let number = pattern.captures(cell)?.get(1)?.as_str();
    Some(format!("{number}{unit}"))
}

/// Records extracted from one report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReport {
    records: Vec<NodeRecord>,
    dropped: usize,
}

impl ParsedReport {
    /// Records in row order
    pub fn records(&self) -> &[NodeRecord] {
        &self.records
    }

    /// Table rows rejected by the grammar (the header row included)
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no row was recognized
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl IntoIterator for ParsedReport {
    type Item = NodeRecord;
    type IntoIter = std::vec::IntoIter<NodeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a ParsedReport {
    type Item = &'a NodeRecord;
    type IntoIter = std::slice::Iter<'a, NodeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Parse a raw node report into candidate records
pub fn parse_report(raw: &str) -> ParsedReport {
    let decoded = decode_escapes(raw);
    let mut report = ParsedReport::default();

    for line in decoded.lines() {
        let Some(cells) = split_row(line) else {
            continue;
        };
        match parse_cells(&cells) {
            Some(record) => report.records.push(record),
            None => {
                trace!(row = line, "Dropping unrecognized report row");
                report.dropped += 1;
            }
        }
    }

    debug!(
        records = report.records.len(),
        dropped = report.dropped,
        "Parsed node report"
    );
    report
}

/// Parse a single, already decoded table row
pub fn parse_row(line: &str) -> Option<NodeRecord> {
    split_row(line).and_then(|cells| parse_cells(&cells))
}

/// Split a table row into its cells, without the border cells
///
/// Returns `None` for lines that are not table rows (borders, blank lines).
fn split_row(line: &str) -> Option<Vec<&str>> {
    let line = line.trim();
    let inner = line.strip_prefix(CELL_DELIMITER)?;
    let inner = inner.strip_suffix(CELL_DELIMITER).unwrap_or(inner);
    Some(inner.split(CELL_DELIMITER).collect())
}

fn parse_cells(cells: &[&str]) -> Option<NodeRecord> {
    if cells.len() < NODE_FIELD_COUNT {
        return None;
    }

    let mut fields: [String; NODE_FIELD_COUNT] = Default::default();
    for ((slot, (_, kind)), cell) in fields.iter_mut().zip(GRAMMAR).zip(cells) {
        *slot = kind.recognize(cell)?;
    }
    Some(NodeRecord::from_fields(fields))
}

/// Replace literal `\uXXXX`, `\UXXXXXXXX` and `\xXX` escapes by their characters
///
/// Backslashes that do not start a valid escape are kept as they are.
pub fn decode_escapes(raw: &str) -> Cow<'_, str> {
    if !raw.contains('\\') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match decode_one(tail) {
            Some((ch, len)) => {
                out.push(ch);
                rest = &tail[len..];
            }
            None => {
                out.push('\\');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_one(tail: &str) -> Option<(char, usize)> {
    let width = match tail.as_bytes().get(1)? {
        b'u' => 4,
        b'U' => 8,
        b'x' => 2,
        _ => return None,
    };
    let hex = tail.get(2..2 + width)?;
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let code = u32::from_str_radix(hex, 16).ok()?;
    Some((char::from_u32(code)?, 2 + width))
}
