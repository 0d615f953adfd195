#![forbid(unsafe_code)]

//! Manifest tree and playlist parsing for the sluice streaming engine.
//!
//! A manifest opens into a [`Tree`] of periods, adaptation sets,
//! representations and segments. The [`SharedTree`] handle owns the lock,
//! the live refresh task, and the decryption hook that segment workers
//! route downloaded chunks through.

mod error;
mod hls;
mod refresh;
pub mod resolve;
mod shared;
mod tree;

pub use error::{ManifestError, ManifestResult};
pub use hls::WIDEVINE_KEY_SYSTEM;
pub use shared::{SharedTree, TreeOptions};
pub use tree::{
    AdaptationSet, ContainerKind, EncryptionState, IncludedKinds, KidState, Period, PsshSet,
    RepAddress, RepFlags, Representation, Segment, SegmentRequest, SegmentTemplate, StreamKind,
    Tree, DEFAULT_TIMESCALE,
};
