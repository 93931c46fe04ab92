/// Classifies failures so that reconcilers can translate them into requeue
/// decisions uniformly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The resource itself is invalid. Surfaced as a status condition and not
    /// retried until the resource changes.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced object is missing from the cache. Retried when the
    /// missing object appears.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflict, network failure, or repo-server failure. Retried with
    /// backoff.
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// Startup-time misconfiguration. The process aborts.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}
