use thiserror::Error;

/// Stable error-kind tags used in `status.json` / CLI JSON `error` fields.
///
/// These strings are part of the external control-file contract; renaming
/// one is a schema-version bump, not a refactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportUnavailable,
    ConnectionLost,
    Timeout,
    InvalidArgument,
    ResourceBusy,
    FormatInvalid,
    NotFound,
    Oversize,
    Cancelled,
    ExternalToolMissing,
    Exhausted,
    Unsupported,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransportUnavailable => "transport-unavailable",
            ErrorKind::ConnectionLost => "connection-lost",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::ResourceBusy => "resource-busy",
            ErrorKind::FormatInvalid => "format-invalid",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Oversize => "oversize",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ExternalToolMissing => "external-tool-missing",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EabError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("resource busy: {0}")]
    ResourceBusy(String),

    #[error("invalid format: {0}")]
    FormatInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("oversize payload: {0}")]
    Oversize(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("external tool missing: {0}")]
    ExternalToolMissing(String),

    #[error("exhausted: {0}")]
    Exhausted(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EabError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EabError::TransportUnavailable(_) => ErrorKind::TransportUnavailable,
            EabError::ConnectionLost(_) => ErrorKind::ConnectionLost,
            EabError::Timeout(_) => ErrorKind::Timeout,
            EabError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EabError::ResourceBusy(_) => ErrorKind::ResourceBusy,
            EabError::FormatInvalid(_) => ErrorKind::FormatInvalid,
            EabError::NotFound(_) => ErrorKind::NotFound,
            EabError::Oversize(_) => ErrorKind::Oversize,
            EabError::Cancelled(_) => ErrorKind::Cancelled,
            EabError::ExternalToolMissing(_) => ErrorKind::ExternalToolMissing,
            EabError::Exhausted(_) => ErrorKind::Exhausted,
            EabError::Unsupported(_) => ErrorKind::Unsupported,
            EabError::Io(_) => ErrorKind::Io,
            EabError::Json(_) => ErrorKind::FormatInvalid,
        }
    }
}

pub type Result<T> = std::result::Result<T, EabError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(ErrorKind::TransportUnavailable.as_str(), "transport-unavailable");
        assert_eq!(ErrorKind::NotFound.as_str(), "not-found");
        assert_eq!(ErrorKind::ExternalToolMissing.as_str(), "external-tool-missing");
    }

    #[test]
    fn error_maps_to_expected_kind() {
        let err = EabError::Oversize("frame too large".into());
        assert_eq!(err.kind(), ErrorKind::Oversize);
    }
}
