//! JSON and CSV export of the event log.
//!
//! The CSV layout is fixed:
//!
//! ```text
//! ID,Timestamp,Type,HeartRate,Baseline,HRV,Confidence,Response,Delta,MovementSuppressed
//! ```
//!
//! Every value is double-quoted, optional values are empty strings and the
//! timestamp is ISO-8601 in UTC.

use crate::models::DetectionEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use uuid::Uuid;

pub const CSV_HEADER: &str =
    "ID,Timestamp,Type,HeartRate,Baseline,HRV,Confidence,Response,Delta,MovementSuppressed";

const CSV_COLUMNS: usize = 10;

/// Export format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown export format '{0}'")]
    UnknownFormat(String),

    #[error("CSV header mismatch: {0}")]
    Header(String),

    #[error("CSV line {line}: {reason}")]
    Row { line: usize, reason: String },
}

/// Pretty-printed JSON array of events.
pub fn to_json(events: &[DetectionEvent]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(events)?)
}

/// CSV document with header, one row per event, trailing newline.
pub fn to_csv(events: &[DetectionEvent]) -> String {
    let mut csv = String::with_capacity(CSV_HEADER.len() + 1 + events.len() * 160);
    csv.push_str(CSV_HEADER);
    csv.push('\n');

    for event in events {
        let fields = [
            event.id.to_string().to_uppercase(),
            event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            event.detection_type.label().to_string(),
            format_number(event.heart_rate_at_detection),
            event.baseline_heart_rate.map(format_number).unwrap_or_default(),
            event.hrv_at_detection.map(format_number).unwrap_or_default(),
            format_number(event.confidence),
            event.alert_response.as_str().to_string(),
            event.delta_from_baseline.map(format_number).unwrap_or_default(),
            event.was_movement_suppressed.to_string(),
        ];

        let row: Vec<String> = fields.iter().map(|f| quote(f)).collect();
        csv.push_str(&row.join(","));
        csv.push('\n');
    }

    csv
}

/// One parsed CSV row. Numeric columns are kept as text.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub detection_type: String,
    pub heart_rate: String,
    pub baseline: String,
    pub hrv: String,
    pub confidence: String,
    pub response: String,
    pub delta: String,
    pub movement_suppressed: bool,
}

/// Parse a document produced by [`to_csv`].
pub fn parse_csv(input: &str) -> Result<Vec<CsvRecord>, ExportError> {
    let mut lines = input.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    match lines.next() {
        Some((_, header)) if header.trim() == CSV_HEADER => {}
        Some((_, header)) => return Err(ExportError::Header(header.to_string())),
        None => return Err(ExportError::Header("empty document".to_string())),
    }

    lines
        .map(|(index, line)| parse_row(index + 1, line))
        .collect()
}

fn parse_row(line: usize, text: &str) -> Result<CsvRecord, ExportError> {
    let row_error = |reason: String| ExportError::Row { line, reason };

    let fields = split_quoted(text).map_err(row_error)?;
    if fields.len() != CSV_COLUMNS {
        return Err(row_error(format!(
            "expected {CSV_COLUMNS} fields, found {}",
            fields.len()
        )));
    }

    let id = Uuid::parse_str(&fields[0]).map_err(|e| row_error(format!("bad id: {e}")))?;
    let timestamp = DateTime::parse_from_rfc3339(&fields[1])
        .map_err(|e| row_error(format!("bad timestamp: {e}")))?
        .with_timezone(&Utc);
    let movement_suppressed = fields[9]
        .parse::<bool>()
        .map_err(|e| row_error(format!("bad movement flag: {e}")))?;

    let mut fields = fields.into_iter().skip(2);
    let mut next = || fields.next().unwrap_or_default();

    Ok(CsvRecord {
        id,
        timestamp,
        detection_type: next(),
        heart_rate: next(),
        baseline: next(),
        hrv: next(),
        confidence: next(),
        response: next(),
        delta: next(),
        movement_suppressed,
    })
}

fn split_quoted(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        let mut field = String::new();
        match chars.next() {
            Some('"') => loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    Some('"') => break,
                    Some(c) => field.push(c),
                    None => return Err("unterminated quoted field".to_string()),
                }
            },
            Some(c) => {
                // Unquoted field
                field.push(c);
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    field.push(c);
                    chars.next();
                }
            }
            None => {}
        }
        fields.push(field);

        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(c) => return Err(format!("unexpected '{c}' after field")),
        }
    }

    Ok(fields)
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Whole numbers keep one decimal place ("95.0").
fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertResponse, DetectionType};
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn sample_event() -> DetectionEvent {
        let ts = Utc.with_ymd_and_hms(2024, 3, 10, 2, 15, 0).unwrap();
        DetectionEvent::new(ts, DetectionType::AbsoluteThreshold, 95.0, 0.1875).with_baseline(65.0)
    }

    #[test]
    fn test_csv_row_layout() {
        let event = sample_event();
        let csv = to_csv(&[event.clone()]);
        let mut lines = csv.lines();

        assert_eq!(lines.next(), Some(CSV_HEADER));
        let expected = format!(
            "\"{}\",\"2024-03-10T02:15:00Z\",\"Absolute HR Threshold\",\"95.0\",\"65.0\",\"\",\"0.1875\",\"notResponded\",\"30.0\",\"false\"",
            event.id.to_string().to_uppercase()
        );
        assert_eq!(lines.next(), Some(expected.as_str()));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_csv_parse_back() {
        let mut events: Vec<DetectionEvent> = (0..5).map(|_| sample_event()).collect();
        events[2].respond(AlertResponse::Snoozed, Utc::now());
        events[3].hrv_at_detection = Some(42.5);

        let records = parse_csv(&to_csv(&events)).unwrap();
        assert_eq!(records.len(), events.len());

        let exported: HashSet<Uuid> = events.iter().map(|e| e.id).collect();
        let parsed: HashSet<Uuid> = records.iter().map(|r| r.id).collect();
        assert_eq!(exported, parsed);

        assert_eq!(records[2].response, "snoozed");
        assert_eq!(records[3].hrv, "42.5");
        assert_eq!(records[0].timestamp, events[0].timestamp);
    }

    #[test]
    fn test_quotes_escaped() {
        let fields = split_quoted("\"a\"\"b\",\"c,d\",\"\"").unwrap();
        assert_eq!(fields, vec!["a\"b", "c,d", ""]);
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_bad_header() {
        assert!(matches!(parse_csv("id,ts\n"), Err(ExportError::Header(_))));
        assert!(matches!(parse_csv(""), Err(ExportError::Header(_))));
    }

    #[test]
    fn test_empty_export() {
        let csv = to_csv(&[]);
        assert!(parse_csv(&csv).unwrap().is_empty());
        assert_eq!(to_json(&[]).unwrap(), "[]");
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
