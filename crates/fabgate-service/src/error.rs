/// Errors raised by the service manager and by worker hooks.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service {0:?} is already registered")]
    DuplicateService(String),
    #[error("unknown service {0:?}")]
    UnknownService(String),
    #[error("service {name:?} stopped: {reason}")]
    ServiceStopped { name: String, reason: String },
    #[error("service {0:?} exposes no control surface")]
    ControlUnavailable(String),
    #[error("control surface of {0:?} has a different type")]
    ControlTypeMismatch(String),
    #[error("worker fault: {0}")]
    Worker(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ServiceError {
    /// Wrap a domain error raised inside a worker hook.
    pub fn worker(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ServiceError::Worker(err.into())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors observed by a broadcast subscriber.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream closed")]
    Closed,
    #[error("subscriber lagged; {0} messages skipped")]
    Lagged(u64),
}
