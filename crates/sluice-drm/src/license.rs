//! License-key configuration string.
//!
//! Hosts hand the engine one `|`-separated string with five fields:
//! `query|headers|reserved|reserved|renewal-token`. The query suffix and
//! headers are applied to key-URI requests; the renewal token enables one
//! renew-and-retry cycle after a failed key fetch.

/// Parsed license-key configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LicenseConfig {
    /// Query string appended to the key URI (without leading `?`/`&`).
    pub query: String,
    /// Extra request headers for the key URI.
    pub headers: Vec<(String, String)>,
    /// Opaque token passed to [`crate::Decrypter::renew_license`].
    pub renewal_token: Option<String>,
}

impl LicenseConfig {
    /// Parse the five-field `|`-string. Missing fields are treated as empty.
    pub fn parse(raw: &str) -> Self {
        let mut fields = raw.split('|');
        let query = fields.next().unwrap_or("").to_string();
        let headers = parse_header_pairs(fields.next().unwrap_or(""));
        let _reserved1 = fields.next();
        let _reserved2 = fields.next();
        let renewal_token = fields
            .next()
            .filter(|token| !token.is_empty())
            .map(str::to_string);

        Self {
            query,
            headers,
            renewal_token,
        }
    }
}

/// Headers arrive as `&`-separated `Name=Value` pairs.
fn parse_header_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}
