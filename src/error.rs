use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Why a single log line could not be decoded.
/// Never fatal: the line is counted and the run moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DecodeError {
    #[error("line is not valid UTF-8")]
    InvalidEncoding,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("line is not a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("record does not match the log schema: {0}")]
    InvalidShape(String),

    #[error("unparsable timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// An invalid report window. Raised before any line is processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("invalid date '{value}', expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("unknown report period '{0}', expected daily, weekly, monthly or custom")]
    UnknownPeriod(String),

    #[error("custom period requires both start_date and end_date")]
    IncompleteCustomWindow,

    #[error("start date {start} is after end date {end}")]
    StartAfterEnd { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Window(#[from] WindowError),
}

impl ConfigError {
    pub fn invalid(var: &'static str, value: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidValue {
            var,
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("failed to read log source {path}: {source}")]
    LogSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write report snapshot {path}: {source}")]
    Snapshot {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("report worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Window(_) => StatusCode::BAD_REQUEST,
            ApiError::LogSource { .. } | ApiError::Snapshot { .. } | ApiError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
