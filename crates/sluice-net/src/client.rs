use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{NetError, NetResult},
    traits::Net,
    types::{Fetched, Headers, NetOptions, RangeSpec},
    ByteStream,
};

/// Production [`Net`] implementation over `reqwest`.
///
/// Retry with exponential backoff is built in: every request is re-issued
/// up to `options.retry.max_retries` times while the failure classifies as
/// retryable.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .map_err(NetError::from)?;
        Ok(Self { inner, options })
    }

    fn apply_headers(
        mut req: reqwest::RequestBuilder,
        headers: &Headers,
    ) -> reqwest::RequestBuilder {
        for (name, value) in headers.iter() {
            req = req.header(name, value);
        }
        req
    }

    async fn get_once(&self, url: Url, headers: &Headers) -> NetResult<Fetched> {
        let req = Self::apply_headers(self.inner.get(url), headers)
            .timeout(self.options.request_timeout);

        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();
        let effective_url = resp.url().clone();

        if !status.is_success() {
            return Err(NetError::Status {
                status: status.as_u16(),
                url: effective_url,
            });
        }

        let bytes = resp.bytes().await.map_err(NetError::from)?;
        Ok(Fetched {
            bytes,
            effective_url,
        })
    }

    async fn stream_once(
        &self,
        url: Url,
        headers: &Headers,
        range: Option<RangeSpec>,
    ) -> NetResult<ByteStream> {
        let mut req = self.inner.get(url).timeout(self.options.request_timeout);
        if let Some(range) = range {
            req = req.header("Range", range.to_header_value());
        }
        req = Self::apply_headers(req, headers);

        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();

        // 206 is the expected answer to a Range request.
        if !status.is_success() && status.as_u16() != 206 {
            return Err(NetError::Status {
                status: status.as_u16(),
                url: resp.url().clone(),
            });
        }

        Ok(Box::pin(resp.bytes_stream().map_err(NetError::from)))
    }

    async fn with_retry<T, F, Fut>(&self, mut attempt_fn: F) -> NetResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = NetResult<T>>,
    {
        let policy = &self.options.retry;
        let mut last_error: Option<NetError> = None;

        for attempt in 0..=policy.max_retries {
            if attempt > 0 {
                let delay = policy.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "sluice-net: retrying");
                sleep(delay).await;
            }
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    warn!(attempt, error = %error, "sluice-net: retryable failure");
                    last_error = Some(error);
                }
            }
        }

        Err(NetError::RetryExhausted {
            max_retries: policy.max_retries,
            source: Box::new(last_error.unwrap_or(NetError::Timeout)),
        })
    }
}

#[async_trait]
impl Net for HttpClient {
    async fn get(&self, url: Url, headers: &Headers) -> NetResult<Fetched> {
        self.with_retry(|| self.get_once(url.clone(), headers)).await
    }

    async fn stream(
        &self,
        url: Url,
        headers: &Headers,
        range: Option<RangeSpec>,
    ) -> NetResult<ByteStream> {
        // Only connection establishment is retried; once a body stream is
        // handed out, mid-stream errors surface to the consumer.
        self.with_retry(|| self.stream_once(url.clone(), headers, range))
            .await
    }
}
