//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use cmsync_config::ConfigError;
use cmsync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    #[allow(dead_code)]
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const BUSY: i32 = 6;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(cmsync::config),
        help(
            "Pass --config <path> or set CMSYNC_CONFIG.\n\
             Any key can be overridden from the environment, e.g. CMSYNC_CATALOG__TOKEN."
        )
    )]
    Config(#[from] ConfigError),

    // ── Sync ─────────────────────────────────────────────────────────

    #[error("{failed} of {total} sync(s) failed")]
    #[diagnostic(
        code(cmsync::sync_failed),
        help("Run: cmsync history to see the recorded errors")
    )]
    SyncFailed { failed: usize, total: usize },

    #[error("A sync is already running{}", current.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    #[diagnostic(code(cmsync::busy), help("Wait for it to finish and try again."))]
    Busy { current: Option<String> },

    // ── Connection ───────────────────────────────────────────────────

    #[error("Connection check failed: {failed}")]
    #[diagnostic(
        code(cmsync::connection_check),
        help("Check [source].base_url, [catalog].url and the configured tokens.")
    )]
    ConnectionCheck { failed: String },

    #[error("Could not reach {target}")]
    #[diagnostic(
        code(cmsync::connection_failed),
        help("Check that the service is running and reachable from this host.")
    )]
    ConnectionFailed {
        target: String,
        #[source]
        source: CoreError,
    },

    #[error("Could not listen on {addr}")]
    #[diagnostic(code(cmsync::bind), help("Pick another port with --port."))]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(cmsync::not_found),
        help("Run: cmsync {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(cmsync::validation))]
    Validation { field: String, reason: String },

    // ── Other core failures ──────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(cmsync::core))]
    Core(CoreError),

    // ── IO ───────────────────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => exit_code::CONFIG,
            Self::Busy { .. } => exit_code::BUSY,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let transient_target = match &err {
            CoreError::Source(e) if e.is_transient() => Some("the CMS"),
            CoreError::Catalog(e) if e.is_transient() => Some("the catalog"),
            _ => None,
        };
        if let Some(target) = transient_target {
            return CliError::ConnectionFailed {
                target: target.into(),
                source: err,
            };
        }

        match err {
            CoreError::Busy { current } => CliError::Busy { current },

            CoreError::ModelNotFound { model_id } => CliError::NotFound {
                resource_type: "model".into(),
                identifier: model_id,
                list_command: "models".into(),
            },

            CoreError::JobNotFound { job_id } => CliError::NotFound {
                resource_type: "saved job".into(),
                identifier: job_id,
                list_command: "jobs list".into(),
            },

            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "request".into(),
                reason: message,
            },

            other => CliError::Core(other),
        }
    }
}
