use thiserror::Error;

pub type ManifestResult<T> = Result<T, ManifestError>;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("network error: {0}")]
    Net(#[from] sluice_net::NetError),

    #[error("decryption error: {0}")]
    Drm(#[from] sluice_drm::DrmError),

    #[error("playlist is missing the #EXTM3U header")]
    MissingHeader,

    #[error("unsupported encryption method: {0}")]
    UnsupportedEncryption(String),

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("playlist is not valid UTF-8")]
    InvalidEncoding,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("no such representation: period {period}, adaptation {adaptation}, representation {representation}")]
    UnknownRepresentation {
        period: usize,
        adaptation: usize,
        representation: usize,
    },
}
