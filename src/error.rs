use thiserror::Error;

/// Diagnostic emitted by the compiler or by the engine itself, attached to a verdict
/// regardless of whether it was fatal.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Diagnostic {
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            file: None,
            line: None,
        }
    }
}

/// Errors that can arise while resolving a compiler version against the release index (C1).
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown compiler version: {0}")]
    UnknownVersion(String),
    #[error("release index unreachable after retries: {0}")]
    Unreachable(#[source] anyhow::Error),
    #[error("malformed compiler version shorthand: {0}")]
    MalformedShorthand(String),
}

/// Errors surfaced while acquiring a loaded compiler handle (C2).
#[derive(Debug, Error)]
pub enum CompilerStoreError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("failed to download compiler binary: {0}")]
    Download(#[source] anyhow::Error),
    #[error("failed to persist compiler binary to disk cache: {0}")]
    DiskCache(#[source] anyhow::Error),
}

/// Errors raised while resolving imports through the virtual filesystem (C4).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VfsError {
    #[error("import not found: {0}")]
    NotFound(String),
    #[error("circular import resolution detected for: {0}")]
    Circular(String),
}

/// Top-level error taxonomy returned by the Verifier (C9), distinct from [`Verdict`](crate::types::Verdict)
/// which represents a *business* outcome (mismatch, invalid input, compile failure) rather
/// than an engine malfunction.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error(transparent)]
    CompilerStore(#[from] CompilerStoreError),
    #[error("compilation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("compilation was cancelled")]
    Cancelled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
