//! Service configuration from environment variables (a `.env` file is honoured).

use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::aggregator::{AggregationOptions, CostPolicy};
use crate::error::ConfigError;
use crate::window::ReportPeriod;

pub const LOG_PATH_VAR: &str = "REPORT_LOG_PATH";
pub const BIND_ADDR_VAR: &str = "REPORT_BIND_ADDR";
pub const PERIOD_VAR: &str = "REPORT_PERIOD";
pub const OUTPUT_DIR_VAR: &str = "REPORT_OUTPUT_DIR";
pub const RECENT_LIMIT_VAR: &str = "REPORT_RECENT_MESSAGE_LIMIT";
pub const TOP_INTENT_VAR: &str = "REPORT_TOP_INTENT_LIMIT";
pub const SLOWEST_SPAN_VAR: &str = "REPORT_SLOWEST_SPAN_LIMIT";
pub const FAILURE_SAMPLE_VAR: &str = "REPORT_FAILURE_SAMPLE_LIMIT";
pub const INCLUDE_CACHED_VAR: &str = "REPORT_COST_INCLUDE_CACHED";
pub const INCLUDE_AUDIO_VAR: &str = "REPORT_COST_INCLUDE_AUDIO";

const DEFAULT_LOG_PATH: &str = "./logs/app.log";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub default_period: ReportPeriod,
    /// Where report snapshots are written, if anywhere
    pub output_dir: Option<PathBuf>,
    pub aggregation: AggregationOptions,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Builds the config from any variable source; unset and blank values take defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());
        let defaults = AggregationOptions::default();

        let default_period = match get(PERIOD_VAR) {
            Some(raw) => raw.parse::<ReportPeriod>()?,
            None => ReportPeriod::Daily,
        };

        Ok(Self {
            log_path: get(LOG_PATH_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
            bind_addr: parse_or(get(BIND_ADDR_VAR), BIND_ADDR_VAR, DEFAULT_BIND_ADDR.parse().ok())?,
            default_period,
            output_dir: get(OUTPUT_DIR_VAR).map(PathBuf::from),
            aggregation: AggregationOptions {
                recent_message_limit: parse_or(
                    get(RECENT_LIMIT_VAR),
                    RECENT_LIMIT_VAR,
                    Some(defaults.recent_message_limit),
                )?,
                top_intent_limit: parse_or(
                    get(TOP_INTENT_VAR),
                    TOP_INTENT_VAR,
                    Some(defaults.top_intent_limit),
                )?,
                slowest_span_limit: parse_or(
                    get(SLOWEST_SPAN_VAR),
                    SLOWEST_SPAN_VAR,
                    Some(defaults.slowest_span_limit),
                )?,
                failure_sample_limit: parse_or(
                    get(FAILURE_SAMPLE_VAR),
                    FAILURE_SAMPLE_VAR,
                    Some(defaults.failure_sample_limit),
                )?,
                cost_policy: CostPolicy {
                    include_cached: parse_flag(
                        get(INCLUDE_CACHED_VAR),
                        INCLUDE_CACHED_VAR,
                        defaults.cost_policy.include_cached,
                    )?,
                    include_audio: parse_flag(
                        get(INCLUDE_AUDIO_VAR),
                        INCLUDE_AUDIO_VAR,
                        defaults.cost_policy.include_audio,
                    )?,
                },
            },
        })
    }
}

fn parse_or<T>(raw: Option<String>, var: &'static str, default: Option<T>) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(var, raw.clone(), e)),
        None => default.ok_or_else(|| ConfigError::invalid(var, "", "no value and no default")),
    }
}

fn parse_flag(raw: Option<String>, var: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(var, raw, "expected true or false")),
    }
}
