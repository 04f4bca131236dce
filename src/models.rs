use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::DecodeError;
use crate::window::ReportWindow;

/// `user` value meaning "no identifiable user"
pub const NO_USER: &str = "-";

/// Level name given to records that carry none
pub const UNKNOWN_LEVEL: &str = "UNKNOWN";

/// Severity of a log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Other(String),
}

impl Level {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" => Level::Other(UNKNOWN_LEVEL.to_string()),
            "DEBUG" => Level::Debug,
            "INFO" => Level::Info,
            "WARNING" | "WARN" => Level::Warning,
            "ERROR" => Level::Error,
            "CRITICAL" | "FATAL" => Level::Critical,
            _ => Level::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
            Level::Other(raw) => raw,
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Level::Warning)
    }

    /// CRITICAL is folded into the error bucket
    pub fn is_error(&self) -> bool {
        matches!(self, Level::Error | Level::Critical)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One decoded application log line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub logger: String,
    pub message: String,
    pub cid: Option<String>,
    pub user: String,
    pub task_name: Option<String>,
    pub client_ip: Option<String>,
    pub schema_version: Option<String>,
}

impl LogRecord {
    /// The user identifier, unless it is blank or the `-` sentinel.
    pub fn user_id(&self) -> Option<&str> {
        let user = self.user.trim();
        if user.is_empty() || user == NO_USER {
            None
        } else {
            Some(user)
        }
    }
}

/// A line that could not be decoded into a [`LogRecord`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseFailure {
    pub line_number: usize,
    pub excerpt: String,
    pub reason: DecodeError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PerfReport,
    PlainMessage,
    Warning,
    Error,
}

/// A windowed record with its kind and everything pulled out of its message
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    pub record: LogRecord,
    pub kind: EventKind,
    /// Present exactly when `kind` is `PerfReport`
    pub perf: Option<PerfReportDetail>,
    pub signals: ExtractedSignals,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    pub cached_input: u64,
    pub audio_input: u64,
    pub audio_output: u64,
}

impl TokenCounts {
    /// Field-wise sum, `None` if any count would overflow
    pub fn checked_add(&self, other: &TokenCounts) -> Option<TokenCounts> {
        Some(TokenCounts {
            input: self.input.checked_add(other.input)?,
            output: self.output.checked_add(other.output)?,
            total: self.total.checked_add(other.total)?,
            cached_input: self.cached_input.checked_add(other.cached_input)?,
            audio_input: self.audio_input.checked_add(other.audio_input)?,
            audio_output: self.audio_output.checked_add(other.audio_output)?,
        })
    }
}

/// Per-category USD costs of one interaction. All values are non-negative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CostFields {
    pub input: Decimal,
    pub output: Decimal,
    pub cached_input: Decimal,
    pub audio_input: Decimal,
    pub audio_output: Decimal,
    /// `total_cost_usd` as reported by the service itself
    pub reported_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentCost {
    pub intent: String,
    pub total_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanTiming {
    pub name: String,
    pub duration_ms: Decimal,
}

/// Metrics carried by a PerfReport payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PerfReportDetail {
    pub user_id: Option<String>,
    pub trace_id: Option<String>,
    pub duration_ms: Option<Decimal>,
    pub tokens: TokenCounts,
    pub costs: CostFields,
    pub intents: Vec<IntentCost>,
    pub spans: Vec<SpanTiming>,
    /// Payload fields that were absent, non-numeric or negative and counted as zero
    pub shortfalls: Vec<&'static str>,
    pub schema_supported: bool,
}

impl PerfReportDetail {
    pub fn is_short(&self, field: &str) -> bool {
        self.shortfalls.iter().any(|f| *f == field)
    }

    /// True when any cost category had to be zero-filled
    pub fn missing_cost(&self) -> bool {
        self.shortfalls.iter().any(|f| f.ends_with("_cost_usd"))
    }
}

/// Language and intents found in a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedSignals {
    pub language: Option<String>,
    pub intents: Vec<String>,
}

impl ExtractedSignals {
    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.intents.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentCostEntry {
    pub intent: String,
    pub total_cost: Decimal,
    pub interactions: usize,
    pub avg_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostSummary {
    pub input: Decimal,
    pub output: Decimal,
    pub cached_input: Decimal,
    pub audio: Decimal,
    /// Sum of the categories selected by the cost policy
    pub total: Decimal,
    pub reported_total: Decimal,
    pub includes_cached: bool,
    pub includes_audio: bool,
    pub records_missing_cost: usize,
    pub shortfalls: BTreeMap<String, usize>,
    /// PerfReports left out of the totals because they would overflow them
    pub records_overflowed: usize,
    pub cost_by_intent: Vec<IntentCostEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanAverage {
    pub name: String,
    pub avg_duration_ms: Decimal,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerformanceSummary {
    pub total_interactions: usize,
    pub timed_interactions: usize,
    pub missing_duration: usize,
    pub total_duration_ms: Decimal,
    pub avg_response_time_ms: Decimal,
    pub min_response_time_ms: Option<Decimal>,
    pub max_response_time_ms: Option<Decimal>,
    /// Approximate, to the histogram's bucket width
    pub p50_response_time_ms: Option<Decimal>,
    pub p95_response_time_ms: Option<Decimal>,
    pub p99_response_time_ms: Option<Decimal>,
    pub slowest_spans: Vec<SpanAverage>,
    pub tokens: TokenCounts,
    pub records_missing_tokens: usize,
    pub records_overflowed: usize,
    /// PerfReports whose schema version has no known payload layout
    pub unsupported_payloads: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub unique_users: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentCount {
    pub intent: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageIntentSummary {
    pub languages: BTreeMap<String, usize>,
    pub intents: BTreeMap<String, usize>,
    pub top_intents: Vec<IntentCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total_entries: usize,
    pub warning_count: usize,
    pub error_count: usize,
    /// Percentage with two decimal places
    pub success_rate: Decimal,
    pub level_counts: BTreeMap<String, usize>,
    pub recent_warnings: Vec<String>,
    pub recent_errors: Vec<String>,
}

/// Finished metrics for one window. Built once per run, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub window: ReportWindow,
    pub cost: CostSummary,
    pub performance: PerformanceSummary,
    pub usage: UsageSummary,
    pub language_intent: LanguageIntentSummary,
    pub health: HealthSummary,
    pub parse_failures: usize,
    pub failure_samples: Vec<ParseFailure>,
    pub records_outside_window: usize,
}

/// API Response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

/// Report as handed out over HTTP
#[derive(Debug, Serialize)]
pub struct ReportEnvelope {
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub report: Report,
}
