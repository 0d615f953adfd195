use std::time::Duration;

use bytes::Bytes;
use url::Url;

/// Ordered name → value header mapping.
///
/// Manifest and media headers must be sent in the order they were
/// configured, so this is backed by a `Vec` rather than a hash map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self { inner: Vec::new() }
    }

    /// Insert or replace a header, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.inner.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.inner.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (n, v) in iter {
            headers.insert(n, v);
        }
        headers
    }
}

/// Inclusive byte range for segment requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn to_header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// A fully buffered response together with the URL it was finally served
/// from (after redirects).
#[derive(Clone, Debug)]
pub struct Fetched {
    pub bytes: Bytes,
    pub effective_url: Url,
}

#[derive(Clone, Debug)]
pub struct NetOptions {
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            pool_max_idle_per_host: 4,
        }
    }
}

/// Exponential backoff: `base_delay * 2^(attempt-1)`, capped at `max_delay`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential = self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(exponential, self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_keep_insertion_order() {
        let mut headers = Headers::new();
        headers.insert("X-Second", "b");
        headers.insert("X-First", "a");
        headers.insert("X-Second", "c");

        let order: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(order, vec!["X-Second", "X-First"]);
        assert_eq!(headers.get("x-second"), Some("c"));
    }

    #[test]
    fn range_header_values() {
        assert_eq!(RangeSpec::new(0, Some(99)).to_header_value(), "bytes=0-99");
        assert_eq!(RangeSpec::new(512, None).to_header_value(), "bytes=512-");
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
    }
}
