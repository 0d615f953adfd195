#![forbid(unsafe_code)]

//! HTTP transport for the sluice streaming engine.
//!
//! The engine never talks to `reqwest` directly; everything goes through the
//! [`Net`] trait so tests can inject stub transports and the streaming layer
//! can be handed any client. [`HttpClient`] is the production implementation
//! with built-in retry.

mod client;
mod error;
mod traits;
mod types;

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

pub use client::HttpClient;
pub use error::{NetError, NetResult};
pub use traits::Net;
pub use types::{Fetched, Headers, NetOptions, RangeSpec, RetryPolicy};

/// Streamed response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = NetResult<Bytes>> + Send>>;
