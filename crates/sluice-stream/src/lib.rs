#![forbid(unsafe_code)]

//! Segment pipeline and byte-level reader for the sluice streaming engine.
//!
//! [`AdaptiveStream`] presents the bytes of a segmented, possibly
//! encrypted, possibly live stream as one contiguous sequence. A bounded
//! ring of segment buffers decouples the reader from a per-stream download
//! worker; decryption happens on the download path via the manifest tree's
//! data hook.

mod buffer;
mod error;
mod events;
mod options;
mod stream;
mod worker;

pub use buffer::MAX_SEGMENT_BUFFERS;
pub use error::{StreamError, StreamResult};
pub use events::StreamEvent;
pub use options::StreamOptions;
pub use stream::{AdaptiveStream, SeekOutcome};
