//! PerfReport payloads.
//!
//! A PerfReport message is `PerfReport ` followed by a JSON object. The
//! object layout is keyed by the record's `schema_version`; only the 1.x
//! layout is known:
//!
//! | field                                         | type          |
//! |-----------------------------------------------|---------------|
//! | `user_id`, `trace_id`                         | string        |
//! | `total_ms` (fallback `total_s`)               | number        |
//! | `total_{input,output,cached_input,audio_input,audio_output}_tokens`, `total_tokens` | integer |
//! | `total_{input,output,cached_input,audio_input,audio_output}_cost_usd`, `total_cost_usd` | number |
//! | `grouped_totals_by_intent`                    | object of `{ total_cost_usd, .. }` |
//! | `spans`                                       | array of `{ name, duration_ms, .. }` |
//!
//! A field that is absent, non-numeric or negative reads as zero and is
//! listed in [`PerfReportDetail::shortfalls`]. Unknown schema versions are
//! still PerfReports, with every numeric field short.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::models::{CostFields, IntentCost, PerfReportDetail, SpanTiming, TokenCounts};

pub const PERF_REPORT_PREFIX: &str = "PerfReport ";

const DURATION_FIELD: &str = "total_ms";

const TOKEN_FIELDS: [&str; 6] = [
    "total_input_tokens",
    "total_output_tokens",
    "total_tokens",
    "total_cached_input_tokens",
    "total_audio_input_tokens",
    "total_audio_output_tokens",
];

const COST_FIELDS: [&str; 6] = [
    "total_input_cost_usd",
    "total_output_cost_usd",
    "total_cached_input_cost_usd",
    "total_audio_input_cost_usd",
    "total_audio_output_cost_usd",
    "total_cost_usd",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSchema {
    V1,
    Unknown,
}

impl PayloadSchema {
    /// Records written before versioning carry no version and use the 1.x layout
    pub fn for_version(schema_version: Option<&str>) -> Self {
        let Some(version) = schema_version else {
            return PayloadSchema::V1;
        };
        match version.trim().trim_start_matches('v').split('.').next() {
            Some("1") => PayloadSchema::V1,
            _ => PayloadSchema::Unknown,
        }
    }
}

/// The JSON object embedded in a PerfReport message, if the message is one
pub fn payload(message: &str) -> Option<Map<String, Value>> {
    let body = message.trim_start().strip_prefix(PERF_REPORT_PREFIX)?;
    match serde_json::from_str::<Value>(body.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

pub fn extract(payload: &Map<String, Value>, schema: PayloadSchema) -> PerfReportDetail {
    match schema {
        PayloadSchema::V1 => extract_v1(payload),
        PayloadSchema::Unknown => unsupported(),
    }
}

fn unsupported() -> PerfReportDetail {
    let mut shortfalls = vec![DURATION_FIELD];
    shortfalls.extend(TOKEN_FIELDS);
    shortfalls.extend(COST_FIELDS);
    PerfReportDetail {
        shortfalls,
        schema_supported: false,
        ..Default::default()
    }
}

fn extract_v1(payload: &Map<String, Value>) -> PerfReportDetail {
    let mut reader = FieldReader::new(payload);

    let duration_ms = reader.duration();
    let tokens = TokenCounts {
        input: reader.tokens("total_input_tokens"),
        output: reader.tokens("total_output_tokens"),
        total: reader.tokens("total_tokens"),
        cached_input: reader.tokens("total_cached_input_tokens"),
        audio_input: reader.tokens("total_audio_input_tokens"),
        audio_output: reader.tokens("total_audio_output_tokens"),
    };
    let costs = CostFields {
        input: reader.cost("total_input_cost_usd"),
        output: reader.cost("total_output_cost_usd"),
        cached_input: reader.cost("total_cached_input_cost_usd"),
        audio_input: reader.cost("total_audio_input_cost_usd"),
        audio_output: reader.cost("total_audio_output_cost_usd"),
        reported_total: reader.cost("total_cost_usd"),
    };

    PerfReportDetail {
        user_id: reader.text("user_id"),
        trace_id: reader.text("trace_id"),
        duration_ms,
        tokens,
        costs,
        intents: intent_costs(payload),
        spans: span_timings(payload),
        shortfalls: reader.shortfalls,
        schema_supported: true,
    }
}

struct FieldReader<'a> {
    payload: &'a Map<String, Value>,
    shortfalls: Vec<&'static str>,
}

impl<'a> FieldReader<'a> {
    fn new(payload: &'a Map<String, Value>) -> Self {
        Self {
            payload,
            shortfalls: Vec::new(),
        }
    }

    fn cost(&mut self, field: &'static str) -> Decimal {
        match self.payload.get(field).and_then(non_negative) {
            Some(value) => value,
            None => {
                self.shortfalls.push(field);
                Decimal::ZERO
            }
        }
    }

    fn tokens(&mut self, field: &'static str) -> u64 {
        match self.payload.get(field).and_then(Value::as_u64) {
            Some(value) => value,
            None => {
                self.shortfalls.push(field);
                0
            }
        }
    }

    fn duration(&mut self) -> Option<Decimal> {
        let millis = self.payload.get(DURATION_FIELD).and_then(non_negative).or_else(|| {
            self.payload
                .get("total_s")
                .and_then(non_negative)
                .and_then(|secs| secs.checked_mul(Decimal::ONE_THOUSAND))
        });
        if millis.is_none() {
            self.shortfalls.push(DURATION_FIELD);
        }
        millis
    }

    fn text(&self, field: &str) -> Option<String> {
        self.payload
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Exact decimal reading of a JSON number (or numeric string)
pub fn decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn non_negative(value: &Value) -> Option<Decimal> {
    decimal(value).filter(|d| !d.is_sign_negative())
}

fn intent_costs(payload: &Map<String, Value>) -> Vec<IntentCost> {
    let Some(Value::Object(groups)) = payload.get("grouped_totals_by_intent") else {
        return Vec::new();
    };
    groups
        .iter()
        .map(|(intent, totals)| IntentCost {
            intent: intent.clone(),
            total_cost: totals
                .get("total_cost_usd")
                .and_then(non_negative)
                .unwrap_or_default(),
        })
        .collect()
}

fn span_timings(payload: &Map<String, Value>) -> Vec<SpanTiming> {
    let Some(Value::Array(spans)) = payload.get("spans") else {
        return Vec::new();
    };
    spans
        .iter()
        .filter_map(|span| {
            let name = span.get("name")?.as_str()?;
            let duration_ms = span.get("duration_ms").and_then(non_negative)?;
            Some(SpanTiming {
                name: name.to_string(),
                duration_ms,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const FULL_PAYLOAD: &str = r#"PerfReport {"user_id":"kwlv1sXnUvYT9dnn","trace_id":"test123","total_ms":11780.07,"total_s":11.78,"total_input_tokens":6323,"total_output_tokens":61,"total_tokens":6384,"total_cached_input_tokens":0,"total_audio_input_tokens":0,"total_audio_output_tokens":0,"total_input_cost_usd":0.014433,"total_output_cost_usd":0.000497,"total_cached_input_cost_usd":0.0,"total_audio_input_cost_usd":0.0,"total_audio_output_cost_usd":0.0,"total_cost_usd":0.01493,"grouped_totals_by_intent":{"get-passage-summary":{"total_cost_usd":0.0055}},"spans":[{"name":"process_message","duration_ms":9000.5},{"name":"broken"}]}"#;

    #[test]
    fn test_payload_detection() {
        assert!(payload(FULL_PAYLOAD).is_some());
        assert!(payload("PerfReport not-json").is_none());
        assert!(payload("PerfReport [1,2]").is_none());
        assert!(payload("text message received").is_none());
    }

    #[test]
    fn test_full_payload_has_no_shortfalls() {
        let map = payload(FULL_PAYLOAD).unwrap();
        let detail = extract(&map, PayloadSchema::V1);

        assert!(detail.shortfalls.is_empty(), "{:?}", detail.shortfalls);
        assert_eq!(detail.user_id.as_deref(), Some("kwlv1sXnUvYT9dnn"));
        assert_eq!(detail.duration_ms, Some(dec!(11780.07)));
        assert_eq!(detail.tokens.total, 6384);
        assert_eq!(detail.costs.input, dec!(0.014433));
        assert_eq!(detail.costs.output, dec!(0.000497));
        assert_eq!(detail.costs.reported_total, dec!(0.01493));
        assert_eq!(detail.intents.len(), 1);
        assert_eq!(detail.intents[0].total_cost, dec!(0.0055));
        assert_eq!(detail.spans.len(), 1);
        assert_eq!(detail.spans[0].name, "process_message");
    }

    #[test]
    fn test_missing_and_bad_fields_are_shortfalls() {
        let map = payload(
            r#"PerfReport {"total_input_cost_usd":0.02,"total_output_cost_usd":"n/a","total_cached_input_cost_usd":-1,"total_s":1.5}"#,
        )
        .unwrap();
        let detail = extract(&map, PayloadSchema::V1);

        assert_eq!(detail.costs.input, dec!(0.02));
        assert_eq!(detail.costs.output, Decimal::ZERO);
        assert_eq!(detail.costs.cached_input, Decimal::ZERO);
        assert!(detail.is_short("total_output_cost_usd"));
        assert!(detail.is_short("total_cached_input_cost_usd"));
        assert!(detail.is_short("total_tokens"));
        assert!(!detail.is_short("total_input_cost_usd"));
        assert!(detail.missing_cost());
        assert_eq!(detail.duration_ms, Some(dec!(1500.0)));
        assert!(!detail.is_short(DURATION_FIELD));
    }

    #[test]
    fn test_unrepresentable_seconds_are_a_duration_shortfall() {
        let map = payload(r#"PerfReport {"total_s": 1e28, "total_input_cost_usd": 0.01}"#).unwrap();
        let detail = extract(&map, PayloadSchema::V1);

        assert_eq!(detail.duration_ms, None);
        assert!(detail.is_short(DURATION_FIELD));
        assert_eq!(detail.costs.input, dec!(0.01));
    }

    #[test]
    fn test_unknown_schema_fails_closed() {
        let map = payload(FULL_PAYLOAD).unwrap();
        let detail = extract(&map, PayloadSchema::for_version(Some("2.0.0")));

        assert!(!detail.schema_supported);
        assert_eq!(detail.costs, CostFields::default());
        assert_eq!(detail.duration_ms, None);
        assert_eq!(detail.shortfalls.len(), 1 + TOKEN_FIELDS.len() + COST_FIELDS.len());
    }

    #[test]
    fn test_schema_versions() {
        assert_eq!(PayloadSchema::for_version(None), PayloadSchema::V1);
        assert_eq!(PayloadSchema::for_version(Some("1.0.0")), PayloadSchema::V1);
        assert_eq!(PayloadSchema::for_version(Some("v1.3")), PayloadSchema::V1);
        assert_eq!(PayloadSchema::for_version(Some("2")), PayloadSchema::Unknown);
        assert_eq!(PayloadSchema::for_version(Some("")), PayloadSchema::Unknown);
    }

    #[test]
    fn test_decimal_reading_is_exact() {
        assert_eq!(decimal(&serde_json::json!(0.1)), Some(dec!(0.1)));
        assert_eq!(decimal(&serde_json::json!("0.30")), Some(dec!(0.30)));
        assert_eq!(decimal(&serde_json::json!(1e-7)), Some(dec!(0.0000001)));
        assert_eq!(decimal(&serde_json::json!(true)), None);
    }
}
