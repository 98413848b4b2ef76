use thiserror::Error;

/// Localized fragments the catalog uses in "not found" messages when it
/// does not attach a structured `__type`.
const NOT_FOUND_PATTERNS: &[&str] = &["not found", "見つかりません"];

/// The catalog's structured error type for missing entities.
const NOT_FOUND_TYPE: &str = "Not Found Error";

/// Errors raised by [`SourceClient`](crate::SourceClient).
///
/// HTTP status codes are classified up front so callers never have to
/// inspect raw responses. Only [`is_transient`](Self::is_transient)
/// failures are retried.
#[derive(Debug, Error)]
pub enum SourceError {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── HTTP status ─────────────────────────────────────────────────
    #[error("Authentication failed. Check your API token.")]
    Unauthorized,

    #[error("Access forbidden. Check your permissions.")]
    Forbidden,

    #[error("Resource not found: {endpoint}")]
    NotFound { endpoint: String },

    #[error("CSV export not found for model: {model_id}")]
    CsvNotFound { model_id: String },

    #[error("CMS server error: {status}")]
    Server { status: u16 },

    #[error("Request failed (HTTP {status}): {message}")]
    Http { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl SourceError {
    /// Returns `true` for timeout and connection-level failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::CsvNotFound { .. })
    }
}

/// Errors raised by [`CatalogClient`](crate::CatalogClient).
#[derive(Debug, Error)]
pub enum CatalogError {
    // ── Transport ───────────────────────────────────────────────────
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Action API ──────────────────────────────────────────────────
    /// The action envelope came back with `success: false`.
    #[error("Catalog API error: {message}")]
    Api {
        message: String,
        /// Structured `__type` from the error object, when present.
        kind: Option<String>,
    },

    /// Non-2xx response without a parseable action envelope.
    #[error("Catalog HTTP error (HTTP {status}): {body}")]
    Http { status: u16, body: String },

    #[error("Dataset not found: {id}")]
    DatasetNotFound { id: String },

    #[error("Resource not found: {id}")]
    ResourceNotFound { id: String },

    // ── Data ────────────────────────────────────────────────────────
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl CatalogError {
    /// Returns `true` for timeout and connection-level failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Returns `true` if the catalog reported a missing dataset or resource.
    ///
    /// Prefers the structured `__type`; falls back to matching the
    /// message against known localized phrasings.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::DatasetNotFound { .. } | Self::ResourceNotFound { .. } => true,
            Self::Http { status, .. } => *status == 404,
            Self::Api { kind: Some(kind), .. } if kind == NOT_FOUND_TYPE => true,
            Self::Api { message, .. } => {
                let lower = message.to_lowercase();
                NOT_FOUND_PATTERNS.iter().any(|p| lower.contains(p))
            }
            _ => false,
        }
    }
}
