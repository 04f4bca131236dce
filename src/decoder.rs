//! Turns raw newline-delimited log text into [`LogRecord`]s.
//!
//! Every line decodes to exactly one of `Ok(LogRecord)` or a
//! [`ParseFailure`]; nothing here panics or aborts a run.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::models::{Level, LogRecord, ParseFailure, NO_USER};

/// Longest prefix of a bad line kept for diagnostics
pub const EXCERPT_CHARS: usize = 200;

/// Zone-less layouts the service writes; read as UTC
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Offset layouts chrono's RFC 3339 parser does not take
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Wire shape of one log line
#[derive(Debug, Deserialize)]
struct RawRecord {
    message: Option<String>,
    timestamp: Option<String>,
    level: Option<String>,
    logger: Option<String>,
    cid: Option<String>,
    user: Option<String>,
    #[serde(rename = "taskName")]
    task_name: Option<String>,
    client_ip: Option<String>,
    schema_version: Option<String>,
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Decodes one line of text
pub fn decode_line(line: &str) -> Result<LogRecord, DecodeError> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }

    let raw = RawRecord::deserialize(value).map_err(|e| DecodeError::InvalidShape(e.to_string()))?;

    let message = raw.message.ok_or(DecodeError::MissingField("message"))?;
    let timestamp_text = raw.timestamp.ok_or(DecodeError::MissingField("timestamp"))?;
    let timestamp = parse_timestamp(&timestamp_text)
        .ok_or_else(|| DecodeError::InvalidTimestamp(timestamp_text.clone()))?;

    Ok(LogRecord {
        timestamp,
        level: Level::parse(raw.level.as_deref().unwrap_or_default()),
        logger: raw.logger.unwrap_or_default(),
        message,
        cid: raw.cid.filter(|cid| !cid.is_empty()),
        user: raw.user.unwrap_or_else(|| NO_USER.to_string()),
        task_name: raw.task_name,
        client_ip: raw.client_ip,
        schema_version: raw.schema_version,
    })
}

/// Decodes one line of raw bytes, tagging failures with their line number
pub fn decode(line_number: usize, raw: &[u8]) -> Result<LogRecord, ParseFailure> {
    let result = match std::str::from_utf8(raw) {
        Ok(text) => decode_line(text),
        Err(_) => Err(DecodeError::InvalidEncoding),
    };

    result.map_err(|reason| ParseFailure {
        line_number,
        excerpt: excerpt(raw),
        reason,
    })
}

/// Bounded, lossy prefix of a line
pub fn excerpt(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Splits log content into numbered lines (1-based), skipping blank ones
pub fn lines(content: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    content
        .split(|b| *b == b'\n')
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.strip_suffix(b"\r").unwrap_or(line)))
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UNKNOWN_LEVEL;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"{"message": "text message from kwlv1sXnUvYT9dnn received.", "client_ip": "172.17.0.1", "taskName": "Task-3", "timestamp": "2025-12-09 22:30:35", "level": "INFO", "logger": "bt_servant_engine.apps.api.routes.webhooks", "cid": "fa6e603bb0274d1990236920564b6e80", "user": "kwlv1sXnUvYT9dnn", "schema_version": "1.0.0"}"#;

    #[test]
    fn test_decode_service_line() {
        let record = decode_line(SAMPLE).unwrap();
        assert_eq!(record.user, "kwlv1sXnUvYT9dnn");
        assert_eq!(record.level, Level::Info);
        assert_eq!(record.task_name.as_deref(), Some("Task-3"));
        assert_eq!(record.schema_version.as_deref(), Some("1.0.0"));
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2025, 12, 9, 22, 30, 35).unwrap()
        );
    }

    #[test]
    fn test_timestamp_layouts() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 7, 23, 59, 59).unwrap();
        assert_eq!(parse_timestamp("2025-01-07T23:59:59Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-08T01:59:59+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-07 23:59:59"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-07T23:59:59"), Some(expected));
        assert!(parse_timestamp("2025-01-07 23:59:59.250").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_missing_required_fields() {
        let no_message = r#"{"timestamp": "2025-01-07T10:00:00Z", "level": "INFO"}"#;
        assert_eq!(decode_line(no_message), Err(DecodeError::MissingField("message")));

        let no_timestamp = r#"{"message": "hi", "level": "INFO"}"#;
        assert_eq!(decode_line(no_timestamp), Err(DecodeError::MissingField("timestamp")));
    }

    #[test]
    fn test_bad_timestamp_is_a_failure() {
        let line = r#"{"message": "hi", "timestamp": "not-a-time"}"#;
        assert_eq!(
            decode_line(line),
            Err(DecodeError::InvalidTimestamp("not-a-time".to_string()))
        );
    }

    #[test]
    fn test_wrong_shapes() {
        assert!(matches!(decode_line("{not json"), Err(DecodeError::InvalidJson(_))));
        assert_eq!(decode_line("[1, 2, 3]"), Err(DecodeError::NotAnObject));
        let numeric_message = r#"{"message": 42, "timestamp": "2025-01-07T10:00:00Z"}"#;
        assert!(matches!(decode_line(numeric_message), Err(DecodeError::InvalidShape(_))));
    }

    #[test]
    fn test_optional_fields_default() {
        let line = r#"{"message": "hi", "timestamp": "2025-01-07T10:00:00Z", "cid": null, "taskName": null}"#;
        let record = decode_line(line).unwrap();
        assert_eq!(record.user, NO_USER);
        assert_eq!(record.cid, None);
        assert_eq!(record.level, Level::Other(UNKNOWN_LEVEL.to_string()));
        assert_eq!(record.logger, "");
    }

    #[test]
    fn test_invalid_utf8_is_counted_with_line_number() {
        let failure = decode(7, b"{\"message\": \"\xff\xfe\"}").unwrap_err();
        assert_eq!(failure.line_number, 7);
        assert_eq!(failure.reason, DecodeError::InvalidEncoding);
        assert!(failure.excerpt.starts_with("{\"message\""));
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let long = "é".repeat(EXCERPT_CHARS * 2);
        let cut = excerpt(long.as_bytes());
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_lines_skip_blanks_and_keep_numbering() {
        let content = b"first\r\n\n  \nfourth\n";
        let numbered: Vec<(usize, &[u8])> = lines(content).collect();
        assert_eq!(numbered, vec![(1, &b"first"[..]), (4, &b"fourth"[..])]);
    }
}
