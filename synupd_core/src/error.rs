/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::error
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Centralise Syn-Upd-Core error types so checks, downloads and
    the scheduler share one diagnostic and exit-code vocabulary.

  Security / Safety Notes:
    Error contexts carry URLs and local paths only; no request
    headers or credentials are ever embedded.

  Dependencies:
    thiserror for ergonomic error definitions.

  Operational Scope:
    Used across modules to propagate recoverable failures and
    consolidate exit codes for the binary entry point.

  Revision History:
    2025-11-12 COD  Authored update-checker error taxonomy.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit error taxonomy with actionable context
    - Cancellation modelled apart from failure
    - Stable exit codes for operational tooling
============================================================*/

use std::io;
use std::process::ExitCode;

use thiserror::Error;

/// Result alias for Syn-Upd-Core operations.
pub type Result<T> = std::result::Result<T, SynupdError>;

/// Enumerates high-level error domains surfaced by Syn-Upd-Core.
#[derive(Debug, Error)]
pub enum SynupdError {
    #[error("Required command `{command}` not found in PATH")]
    CommandMissing { command: String },
    #[error("Command `{command}` failed with status {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Configuration: {0}")]
    Config(String),
    #[error("HTTP error {status} for {url}")]
    Http { status: u16, url: String },
    #[error("Network: {0}")]
    Network(String),
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Serialization: {0}")]
    Serialization(String),
    #[error("Filesystem: {0}")]
    Filesystem(String),
    #[error("Runtime: {0}")]
    Runtime(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SynupdError {
    /// Map error category to a deterministic exit code.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            SynupdError::CommandMissing { .. } => ExitCode::from(10),
            SynupdError::CommandFailure { .. } => ExitCode::from(11),
            SynupdError::Config(_) => ExitCode::from(20),
            SynupdError::Http { .. } => ExitCode::from(30),
            SynupdError::Network(_) => ExitCode::from(31),
            SynupdError::InvalidArtifact(_) => ExitCode::from(32),
            SynupdError::Serialization(_) => ExitCode::from(33),
            SynupdError::Filesystem(_) => ExitCode::from(40),
            SynupdError::Io(_) => ExitCode::from(41),
            SynupdError::Runtime(_) => ExitCode::from(50),
            SynupdError::Cancelled => ExitCode::from(130),
        }
    }

    /// User-initiated cancellation is not reported as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SynupdError::Cancelled)
    }

    /// Whether a later attempt may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            SynupdError::Network(_) => true,
            SynupdError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SynupdError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => SynupdError::Http {
                status: status.as_u16(),
                url: err.url().map(|url| url.to_string()).unwrap_or_default(),
            },
            None => SynupdError::Network(err.to_string()),
        }
    }
}
