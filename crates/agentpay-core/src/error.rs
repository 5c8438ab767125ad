use thiserror::Error;

/// The stable machine code for an [`AgentPayError`], as surfaced to callers alongside the
/// human-readable message. These strings are part of the external contract: tests and
/// downstream integrations match on them directly.
pub type ErrorCode = &'static str;

/// Top-level error taxonomy. Every variant carries the machine code it renders to verbatim,
/// so callers never need a separate mapping table.
#[derive(Debug, Error)]
pub enum AgentPayError {
    #[error("{code}: {message}")]
    Validation { code: ErrorCode, message: String },

    #[error("{code}: {message}")]
    Auth { code: ErrorCode, message: String },

    #[error("{code}: {message}")]
    State { code: ErrorCode, message: String },

    #[error("{code}: {message}")]
    Policy { code: ErrorCode, message: String },

    #[error("{code}: {message}")]
    Cryptographic { code: ErrorCode, message: String },

    #[error("{code}: {message}")]
    NotFound { code: ErrorCode, message: String },

    #[error("{code}: {message}")]
    RateLimit { code: ErrorCode, message: String },

    #[error("{code}: {message}")]
    Service { code: ErrorCode, message: String },

    #[error("internal_error: {0}")]
    Internal(String),
}

impl AgentPayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. }
            | Self::Auth { code, .. }
            | Self::State { code, .. }
            | Self::Policy { code, .. }
            | Self::Cryptographic { code, .. }
            | Self::NotFound { code, .. }
            | Self::RateLimit { code, .. }
            | Self::Service { code, .. } => code,
            Self::Internal(_) => "internal_error",
        }
    }

    /// The HTTP-equivalent status class named in spec.md §7; kept even though no HTTP
    /// surface is built here, since front-ends downstream need it to render a response.
    pub fn status_class(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::Cryptographic { .. } => 400,
            Self::Auth { .. } => 403,
            Self::State { .. } => 409,
            Self::Policy { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::RateLimit { .. } => 429,
            Self::Service { .. } => 503,
            Self::Internal(_) => 500,
        }
    }

    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Validation { code, message: message.into() }
    }

    pub fn auth(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Auth { code, message: message.into() }
    }

    pub fn state(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::State { code, message: message.into() }
    }

    pub fn policy(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Policy { code, message: message.into() }
    }

    pub fn crypto(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Cryptographic { code, message: message.into() }
    }

    pub fn not_found(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::NotFound { code, message: message.into() }
    }

    pub fn rate_limit(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::RateLimit { code, message: message.into() }
    }

    pub fn service(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Service { code, message: message.into() }
    }
}

/// Structured failure shape returned to callers, per spec.md §7.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub request_id: String,
}

impl ErrorResponse {
    pub fn from_error(err: &AgentPayError, request_id: impl Into<String>) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: None,
            request_id: request_id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentPayError>;
