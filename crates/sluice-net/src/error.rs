use reqwest::Error as ReqwestError;
use thiserror::Error;
use url::Url;

pub type NetResult<T> = Result<T, NetError>;

#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("timeout")]
    Timeout,

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: Url },

    #[error("request failed after {max_retries} retries: {source}")]
    RetryExhausted { max_retries: u32, source: Box<Self> },

    #[error("cancelled")]
    Cancelled,
}

impl NetError {
    /// Whether a fresh attempt could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::RetryExhausted { .. } | Self::Cancelled => false,
        }
    }
}

impl From<ReqwestError> for NetError {
    fn from(e: ReqwestError) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Alternate formatting keeps the full cause chain in the message.
        Self::Transport(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn url() -> Url {
        Url::parse("http://example.com/seg.ts").unwrap()
    }

    #[rstest]
    #[case::timeout(NetError::Timeout, true)]
    #[case::transport(NetError::Transport("connection reset".into()), true)]
    #[case::server_error(NetError::Status { status: 503, url: url() }, true)]
    #[case::too_many_requests(NetError::Status { status: 429, url: url() }, true)]
    #[case::not_found(NetError::Status { status: 404, url: url() }, false)]
    #[case::cancelled(NetError::Cancelled, false)]
    #[case::exhausted(
        NetError::RetryExhausted { max_retries: 3, source: Box::new(NetError::Timeout) },
        false
    )]
    fn retryability(#[case] error: NetError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }
}
