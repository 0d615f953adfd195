use thiserror::Error;

pub type DrmResult<T> = Result<T, DrmError>;

#[derive(Debug, Error, Clone)]
pub enum DrmError {
    #[error("invalid key length {0}, expected 16")]
    InvalidKeyLength(usize),

    #[error("ciphertext length {0} is not a multiple of the AES block size")]
    UnalignedInput(usize),

    #[error("unpadding failed: {0}")]
    Unpad(String),

    #[error("invalid IV string: {0}")]
    InvalidIv(String),
}
