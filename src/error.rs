//! Crate-wide error taxonomy and retry classification.

use thiserror::Error;

/// Error surfaced at the crate boundary.
///
/// Internal propagation mostly flows through `anyhow::Result`; this enum is
/// the small set of dispositions the queue, checkpointer and engine actually
/// branch on.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http {status}: {url}")]
    Http { status: u16, url: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("queue is full, dropped: {0}")]
    QueueFull(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<anyhow::Error> for CrawlError {
    fn from(e: anyhow::Error) -> Self {
        CrawlError::Transport(e.to_string())
    }
}

pub type CrawlResult<T> = Result<T, CrawlError>;

/// Retry disposition for a failed fetch/process attempt.
///
/// Mirrors the table in the error handling design: transport errors and 5xx
/// are retryable, 4xx (other than 429, which the fetcher handles inline and
/// never surfaces here) are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Http5xx,
    Http4xx,
    Parse,
    Filesystem,
    Unknown,
}

impl FailureKind {
    #[must_use]
    pub fn classify(error: &CrawlError) -> Self {
        match error {
            CrawlError::Transport(_) => FailureKind::Transport,
            CrawlError::Http { status, .. } if *status >= 500 => FailureKind::Http5xx,
            CrawlError::Http { .. } => FailureKind::Http4xx,
            CrawlError::Parse(_) => FailureKind::Parse,
            CrawlError::Filesystem(_) => FailureKind::Filesystem,
            _ => FailureKind::Unknown,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Transport | FailureKind::Http5xx | FailureKind::Unknown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_5xx_is_retryable() {
        let err = CrawlError::Http {
            status: 503,
            url: "https://example.com".into(),
        };
        let kind = FailureKind::classify(&err);
        assert_eq!(kind, FailureKind::Http5xx);
        assert!(kind.is_retryable());
    }

    #[test]
    fn http_4xx_is_not_retryable() {
        let err = CrawlError::Http {
            status: 404,
            url: "https://example.com".into(),
        };
        let kind = FailureKind::classify(&err);
        assert_eq!(kind, FailureKind::Http4xx);
        assert!(!kind.is_retryable());
    }
}
