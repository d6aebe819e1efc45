//! Error types for gateway diagnostics.
//!
//! `ApiError` is the transport taxonomy returned by every [`GatewayApi`]
//! call. `GatewayError` is the top-level error surfaced to callers of the
//! library; it carries a stable machine-parseable code.
//!
//! [`GatewayApi`]: crate::rest::GatewayApi

use std::path::PathBuf;

use thiserror::Error;

/// Shared `Result` alias for the library.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Failure of a single REST call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The gateway answered with a non-success HTTP status.
    #[error("HTTP {code}: {message}")]
    Status {
        code: u16,
        message: String,
        /// Backend error code from the JSON error body (0 if absent)
        error_code: u32,
    },

    /// No response within the per-call deadline.
    #[error("request timed out")]
    Timeout,

    /// Connection refused, reset, DNS failure and friends.
    #[error("network error: {0}")]
    Network(String),

    /// Response body was not valid JSON.
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status code, if the gateway answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_bad_request(&self) -> bool {
        self.status() == Some(400)
    }

    pub fn is_unavailable(&self) -> bool {
        self.status() == Some(503)
    }

    /// Shorthand used by fakes and tests.
    pub fn status_code(code: u16) -> Self {
        ApiError::Status {
            code,
            message: String::new(),
            error_code: 0,
        }
    }
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("[GW-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[GW-1002] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[GW-2001] gateway request to {path} failed: {source}")]
    Api {
        path: String,
        #[source]
        source: ApiError,
    },

    #[error("[GW-2002] unexpected response from {path}: {details}")]
    UnexpectedResponse { path: String, details: String },

    #[error("[GW-2003] authentication failed: {details}")]
    Auth { details: String },

    #[error("[GW-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[GW-3001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[GW-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl GatewayError {
    /// Stable machine-parseable error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "GW-1001",
            Self::ConfigParse { .. } => "GW-1002",
            Self::Api { .. } => "GW-2001",
            Self::UnexpectedResponse { .. } => "GW-2002",
            Self::Auth { .. } => "GW-2003",
            Self::Serialization { .. } => "GW-2101",
            Self::Io { .. } => "GW-3001",
            Self::Runtime { .. } => "GW-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { source, .. } => matches!(
                source,
                ApiError::Timeout | ApiError::Network(_)
            ) || source.is_unavailable(),
            Self::Io { .. } | Self::Runtime { .. } => true,
            _ => false,
        }
    }

    pub fn api(path: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            path: path.into(),
            source,
        }
    }

    pub fn unexpected(path: impl Into<String>, details: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            path: path.into(),
            details: details.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for GatewayError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}
