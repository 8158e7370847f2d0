use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the directory cache to its callers.
///
/// Cloneable so a single failed refresh can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("User not found in workspace: {0}")]
    NotFound(String),

    #[error("Slack directory unavailable after {attempts} rate-limited attempts")]
    UpstreamUnavailable { attempts: u32 },

    #[error("Slack transport error: {0}")]
    Transport(String),

    #[error("Slack authentication error: {0}")]
    Auth(String),

    #[error("Timed out waiting for directory refresh")]
    Timeout,

    #[error("Directory lookup cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DirectoryError {
    /// The key was absent after a confirmed refresh. A negative answer, not a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the caller may reasonably try the same lookup again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::Timeout | Self::Transport(_)
        )
    }
}

/// Failures reported by an [`UpstreamClient`](crate::upstream::UpstreamClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("transport: {0}")]
    Transport(String),

    #[error("auth: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(DirectoryError::NotFound("a@x.com".into()).is_not_found());
        assert!(!DirectoryError::NotFound("a@x.com".into()).is_retryable());

        assert!(DirectoryError::UpstreamUnavailable { attempts: 3 }.is_retryable());
        assert!(DirectoryError::Timeout.is_retryable());
        assert!(!DirectoryError::Auth("invalid_auth".into()).is_retryable());
        assert!(!DirectoryError::Cancelled.is_retryable());
    }

    #[test]
    fn test_timeout_is_distinct_from_unavailable() {
        assert_ne!(
            DirectoryError::Timeout.to_string(),
            DirectoryError::UpstreamUnavailable { attempts: 3 }.to_string()
        );
    }

    #[test]
    fn test_rate_limited_message_shows_whole_seconds() {
        let err = UpstreamError::RateLimited {
            retry_after: Duration::from_millis(12_500),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 12s");
    }
}
