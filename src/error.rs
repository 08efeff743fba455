use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use thiserror::Error;

/// Machine-checkable reason attached to a warehouse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarehouseErrorKind {
    /// Rows matched by a DML statement are still in the streaming buffer and cannot be mutated yet.
    StreamingBuffer,
    AlreadyExists,
    NotFound,
    Other,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Report API responded with HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Report API returned code {code}: {body}")]
    UpstreamCode { code: i64, body: String },

    #[error("Warehouse responded with HTTP {status} ({kind:?}): {message}")]
    Warehouse {
        kind: WarehouseErrorKind,
        status: u16,
        message: String,
    },

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn warehouse_kind(&self) -> Option<WarehouseErrorKind> {
        match self {
            Error::Warehouse { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
