//! Pipeline error taxonomy.
//!
//! Every failure in the ingest path is classified as retriable or terminal:
//! retriable errors (network, 429/5xx, open circuit) requeue the task with
//! back-off, terminal errors (parse, validation, 4xx, not-found) are counted
//! and dropped. Infrastructure errors (database, config) abort the current
//! run.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transient transport failure: DNS, connect, timeout.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status from an external service.
    #[error("http {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// 429 with an optional Retry-After hint in seconds.
    #[error("rate limited, retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    /// Payload did not match the expected shape; flags an adapter bug.
    #[error("parse error: {0}")]
    Parse(String),

    /// Record failed validation and is dropped with a counter.
    #[error("validation error: {0}")]
    Validation(String),

    /// A circuit breaker is open for the named service.
    #[error("circuit open for {service}")]
    CircuitOpen { service: String },

    /// A referenced entity (playlist, track) is missing; the relation is
    /// dropped without failing the batch.
    #[error("dependency missing: {0}")]
    DependencyMissing(String),

    /// The external source has no record for this lookup.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// robots.txt disallows this URL for our user agent.
    #[error("blocked by robots.txt: {url}")]
    RobotsDenied { url: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether a task failing with this error should be rescheduled.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } | Self::CircuitOpen { .. } => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_)
            | Self::Validation(_)
            | Self::DependencyMissing(_)
            | Self::NotFound { .. }
            | Self::RobotsDenied { .. } => false,
            // Infrastructure errors abort the run rather than retry the task.
            Self::Database(_) | Self::Redis(_) | Self::Config(_) => false,
        }
    }

    /// Whether this error should abort the whole run (infrastructure down).
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Redis(_) | Self::Config(_))
    }

    /// Build the appropriate error for an HTTP response status.
    pub fn from_status(status: u16, url: &str, retry_after: Option<u64>) -> Self {
        match status {
            404 => Self::NotFound {
                resource: url.to_string(),
            },
            429 => Self::RateLimited { retry_after },
            _ => Self::HttpStatus {
                status,
                url: url.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(
                status.as_u16(),
                err.url().map(|u| u.as_str()).unwrap_or("<unknown>"),
                None,
            );
        }
        Self::Network(err.to_string())
    }
}

impl From<redis::RedisError> for PipelineError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for PipelineError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Redis(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(PipelineError::Network("timeout".into()).is_retriable());
        assert!(PipelineError::RateLimited { retry_after: None }.is_retriable());
        assert!(PipelineError::CircuitOpen {
            service: "spotify".into()
        }
        .is_retriable());
        assert!(PipelineError::HttpStatus {
            status: 503,
            url: "x".into()
        }
        .is_retriable());
        assert!(PipelineError::HttpStatus {
            status: 429,
            url: "x".into()
        }
        .is_retriable());

        assert!(!PipelineError::HttpStatus {
            status: 403,
            url: "x".into()
        }
        .is_retriable());
        assert!(!PipelineError::Parse("bad".into()).is_retriable());
        assert!(!PipelineError::Validation("bad".into()).is_retriable());
        assert!(!PipelineError::NotFound {
            resource: "x".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            PipelineError::from_status(404, "u", None),
            PipelineError::NotFound { .. }
        ));
        assert!(matches!(
            PipelineError::from_status(429, "u", Some(30)),
            PipelineError::RateLimited {
                retry_after: Some(30)
            }
        ));
        assert!(matches!(
            PipelineError::from_status(500, "u", None),
            PipelineError::HttpStatus { status: 500, .. }
        ));
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(PipelineError::Config("missing".into()).is_infrastructure());
        assert!(!PipelineError::Parse("bad".into()).is_infrastructure());
    }
}
