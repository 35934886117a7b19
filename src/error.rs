use thiserror::Error;

use crate::cache::ResolveError;
use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("template render error: {0}")]
    Render(String),
    #[error("ingress has no valid rules")]
    NoValidRules,
    #[error("ingress model error: {0}")]
    Model(#[from] ModelError),
    #[error("backend resolution error: {0}")]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// File I/O failures are process-fatal: the proxy config can no longer
    /// be guaranteed consistent with what's on disk (spec.md §7).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Structural errors (bad ingress content, render failures) are logged
    /// and dropped, never retried (spec.md §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Kube(_)) || matches!(self, Error::Resolve(e) if e.is_transient())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
