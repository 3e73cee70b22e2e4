//! Log parser for extracting API usage from session logs.
//!
//! Each line of a session log is one JSON record. Only assistant records
//! with a `message.usage` block, a `message.model`, and a parseable
//! timestamp become [`UsageEvent`]s; everything else (user turns, summaries,
//! truncated writes, garbage) is skipped without failing the file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::{Result, UsageError};
use crate::models::{TokenCounts, UNKNOWN_SESSION, UsageEvent};

/// Record type carrying per-call usage.
const ASSISTANT_RECORD: &str = "assistant";

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    record_type: Option<String>,
    timestamp: Option<String>,
    #[serde(rename = "sessionId", alias = "session_id")]
    session_id: Option<String>,
    cwd: Option<String>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    model: Option<String>,
    usage: Option<RawUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

impl From<RawUsage> for TokenCounts {
    fn from(usage: RawUsage) -> Self {
        TokenCounts::new(
            usage.input_tokens.unwrap_or(0),
            usage.output_tokens.unwrap_or(0),
            usage.cache_creation_input_tokens.unwrap_or(0),
            usage.cache_read_input_tokens.unwrap_or(0),
        )
    }
}

/// Decodes session log lines into usage events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventParser;

impl EventParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a single line, returning `None` for anything that is not a
    /// well-formed usage record.
    pub fn parse_line(&self, line: &str) -> Option<UsageEvent> {
        match self.decode_line(line) {
            Ok(event) => Some(event),
            Err(e) => {
                trace!(error = %e, "Skipping log line");
                None
            }
        }
    }

    /// Decode a single line, reporting why it was rejected.
    pub fn decode_line(&self, line: &str) -> Result<UsageEvent> {
        let line = line.trim();
        if !line.starts_with('{') {
            return Err(UsageError::InvalidLogFormat("not a JSON object".into()));
        }

        let record: RawRecord = serde_json::from_str(line)?;

        if let Some(kind) = record.record_type.as_deref()
            && kind != ASSISTANT_RECORD
        {
            return Err(UsageError::InvalidLogFormat(format!("record type {kind}")));
        }

        let message = record
            .message
            .ok_or_else(|| UsageError::InvalidLogFormat("missing message".into()))?;
        let usage = message
            .usage
            .ok_or_else(|| UsageError::InvalidLogFormat("missing usage block".into()))?;
        let model = message
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| UsageError::InvalidLogFormat("missing model".into()))?;
        let timestamp = record
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or_else(|| UsageError::InvalidLogFormat("missing or invalid timestamp".into()))?;

        let session_id = record
            .session_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_SESSION.to_string());

        Ok(UsageEvent {
            timestamp,
            session_id,
            project_path: record.cwd.filter(|c| !c.is_empty()),
            model,
            tokens: usage.into(),
        })
    }

    /// Parse every usage event in a file.
    ///
    /// Only failing to open the file is an error; unreadable or malformed
    /// lines are skipped.
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<UsageEvent>> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);

        let mut events = Vec::new();
        let mut skipped = 0usize;

        for (index, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    trace!(line = index + 1, error = %e, "Failed to read line");
                    skipped += 1;
                    continue;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match self.decode_line(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    trace!(line = index + 1, error = %e, "Skipping log line");
                    skipped += 1;
                }
            }
        }

        debug!(file = %path.display(), events = events.len(), skipped, "Parsed log file");
        Ok(events)
    }
}

/// Parse an ISO-8601 timestamp. Offsets are honored; a timestamp without
/// an offset is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ASSISTANT_LINE: &str = r#"{"type":"assistant","timestamp":"2026-01-24T10:15:30.123Z","sessionId":"sess-1","cwd":"/home/dev/api","message":{"model":"claude-sonnet-4-20250514","id":"msg_01","role":"assistant","content":[],"usage":{"input_tokens":100,"output_tokens":50,"cache_creation_input_tokens":200,"cache_read_input_tokens":300}}}"#;

    #[test]
    fn test_parse_assistant_line() {
        let event = EventParser::new().parse_line(ASSISTANT_LINE).unwrap();

        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2026, 1, 24, 10, 15, 30).unwrap()
                + chrono::Duration::milliseconds(123)
        );
        assert_eq!(event.session_id, "sess-1");
        assert_eq!(event.project_path.as_deref(), Some("/home/dev/api"));
        assert_eq!(event.model, "claude-sonnet-4-20250514");
        assert_eq!(event.tokens, TokenCounts::new(100, 50, 200, 300));
    }

    #[test]
    fn test_missing_token_fields_default_to_zero() {
        let line = r#"{"timestamp":"2026-01-24T10:00:00Z","message":{"model":"claude-opus-4-20250514","usage":{"output_tokens":7}}}"#;
        let event = EventParser::new().parse_line(line).unwrap();

        assert_eq!(event.tokens, TokenCounts::new(0, 7, 0, 0));
        assert_eq!(event.session_id, UNKNOWN_SESSION);
        assert!(event.project_path.is_none());
    }

    #[test]
    fn test_rejections() {
        let parser = EventParser::new();
        let rejected = [
            // Truncated write
            r#"{"type":"assistant","timestamp":"2026-01-24T10:00:00Z","message":{"model":"claude"#,
            // Wrong record type
            r#"{"type":"user","timestamp":"2026-01-24T10:00:00Z","message":{"role":"user","content":"hi"}}"#,
            // Missing usage block
            r#"{"type":"assistant","timestamp":"2026-01-24T10:00:00Z","message":{"model":"claude-sonnet-4"}}"#,
            // Missing model
            r#"{"type":"assistant","timestamp":"2026-01-24T10:00:00Z","message":{"usage":{"input_tokens":1}}}"#,
            // Bad timestamp
            r#"{"type":"assistant","timestamp":"yesterday","message":{"model":"claude-sonnet-4","usage":{"input_tokens":1}}}"#,
            // Missing timestamp
            r#"{"type":"assistant","message":{"model":"claude-sonnet-4","usage":{"input_tokens":1}}}"#,
            "[2026-01-24 10:00:00] log rotated",
            "",
        ];

        for line in rejected {
            assert!(parser.parse_line(line).is_none(), "accepted: {line}");
        }
    }

    #[test]
    fn test_decode_reports_reason() {
        let err = EventParser::new()
            .decode_line(r#"{"type":"summary","summary":"x"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("record type summary"));
        assert!(err.is_per_record());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 24, 8, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2026-01-24T08:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-24T10:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-24T08:00:00.000"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-24"), None);
    }

    #[test]
    fn test_parse_file_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let content = format!("{ASSISTANT_LINE}\nnot json\n\n{ASSISTANT_LINE}\n{{\"type\":\"assist");
        std::fs::write(&path, content).unwrap();

        let events = EventParser::new().parse_file(&path).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_parse_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = EventParser::new().parse_file(dir.path().join("gone.jsonl"));
        assert!(matches!(result, Err(UsageError::Io(_))));
    }
}
