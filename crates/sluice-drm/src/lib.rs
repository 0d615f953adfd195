#![forbid(unsafe_code)]

//! Decryption port for the sluice streaming engine.
//!
//! The engine treats decryption as a collaborator behind the [`Decrypter`]
//! trait: the manifest layer resolves key material and drives the IV chain,
//! this crate turns ciphertext chunks into plaintext. [`Aes128CbcDecrypter`]
//! covers the AES-128 method; Widevine-CTR implementations plug in the same
//! trait from the host side.

mod decrypt;
mod error;
mod license;

pub use decrypt::{Aes128CbcDecrypter, Decrypter};
pub use error::{DrmError, DrmResult};
pub use license::LicenseConfig;
