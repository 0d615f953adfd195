use async_trait::async_trait;
use url::Url;

use crate::{
    error::NetResult,
    types::{Fetched, Headers, RangeSpec},
    ByteStream,
};

/// Transport seam between the streaming engine and the network.
///
/// The manifest tree and the segment workers only ever hold an
/// `Arc<dyn Net>`; tests swap in stub implementations.
#[async_trait]
pub trait Net: Send + Sync {
    /// Fetch a whole resource into memory, following redirects.
    ///
    /// The returned [`Fetched`] carries the post-redirect URL so callers
    /// can rebase relative links.
    async fn get(&self, url: Url, headers: &Headers) -> NetResult<Fetched>;

    /// Open a streamed body, optionally limited to a byte range.
    async fn stream(
        &self,
        url: Url,
        headers: &Headers,
        range: Option<RangeSpec>,
    ) -> NetResult<ByteStream>;
}
