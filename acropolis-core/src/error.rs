use std::fmt;
use thiserror::Error;

/// Errors raised while fetching and evaluating a single monitoring rule.
#[derive(Error, Debug)]
pub enum MonitoringError {
    #[error("No data: {0}")]
    NoData(String),
    #[error("Remote service error: {0}")]
    RemoteError(String),
    #[error("Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Unsupported coverage format: {0}")]
    UnsupportedFormat(String),
    #[error("Unsupported metric: {0}")]
    UnsupportedMetric(String),
    #[error("Unsupported area definition: {0}")]
    UnsupportedArea(String),
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
    #[error("Cannot average an empty data set")]
    EmptyData,
    #[error("Shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },
}

/// Coarse classification used for logging and run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoData,
    Configuration,
    Remote,
    Data,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NoData => write!(f, "no-data"),
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Remote => write!(f, "remote"),
            ErrorKind::Data => write!(f, "data"),
        }
    }
}

impl MonitoringError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MonitoringError::NoData(_) => ErrorKind::NoData,
            MonitoringError::RemoteError(_) | MonitoringError::RequestError(_) => ErrorKind::Remote,
            MonitoringError::UnsupportedFormat(_)
            | MonitoringError::UnsupportedMetric(_)
            | MonitoringError::UnsupportedArea(_)
            | MonitoringError::InvalidRule(_) => ErrorKind::Configuration,
            MonitoringError::EmptyData | MonitoringError::ShapeMismatch { .. } => ErrorKind::Data,
        }
    }

    /// Whether a retry at the orchestrator boundary could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Remote
    }
}

pub type Result<T, E = MonitoringError> = std::result::Result<T, E>;
