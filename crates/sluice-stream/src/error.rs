use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("manifest error: {0}")]
    Manifest(#[from] sluice_manifest::ManifestError),

    #[error("network error: {0}")]
    Net(#[from] sluice_net::NetError),

    #[error("representation has nothing to stream")]
    NothingToStream,

    #[error("stream not started")]
    NotStarted,

    #[error("stream stopped")]
    Stopped,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}
