//! URL resolution rules and segment-template placeholder substitution.
//!
//! Resolution is uniform everywhere a link appears in a manifest:
//! domain-absolute links (`/...`) are prefixed with the base domain,
//! scheme-less links with the current relative base, and absolute links
//! pass through. Substitution is a pure function of
//! `(template, value)` so the worker can materialise URLs at fetch time.

/// Split a manifest URL into `(base_url, base_domain)`:
/// `base_url` is everything up to and including the last `/` of the path,
/// `base_domain` is `scheme://host[:port]`.
pub fn split_manifest_url(url: &str) -> (String, String) {
    let without_query = url.split('?').next().unwrap_or(url);

    let base_url = match without_query.rfind('/') {
        // Keep scheme separators intact: "https://host" has no path slash.
        Some(pos) if pos > scheme_end(without_query) => without_query[..=pos].to_string(),
        _ => format!("{without_query}/"),
    };

    let base_domain = match without_query.find("://") {
        Some(scheme_pos) => {
            let after = &without_query[scheme_pos + 3..];
            let host_end = after.find('/').unwrap_or(after.len());
            format!("{}{}", &without_query[..scheme_pos + 3], &after[..host_end])
        }
        None => String::new(),
    };

    (base_url, base_domain)
}

fn scheme_end(url: &str) -> usize {
    url.find("://").map(|pos| pos + 2).unwrap_or(0)
}

/// Resolve one link against the current bases.
pub fn resolve(base_domain: &str, base_url: &str, link: &str) -> String {
    if link.starts_with('/') {
        format!("{base_domain}{link}")
    } else if !link.contains("://") {
        format!("{base_url}{link}")
    } else {
        link.to_string()
    }
}

/// Rewrite `base_url` to the redirected `effective_url` prefix, when one is
/// known and the URL is under the original base.
pub fn rewrite_effective(url: &str, base_url: &str, effective_url: &str) -> String {
    if !effective_url.is_empty() && !base_url.is_empty() {
        if let Some(rest) = url.strip_prefix(base_url) {
            return format!("{effective_url}{rest}");
        }
    }
    url.to_string()
}

/// Append the manifest query parameter to URLs under `base_url` that carry
/// no query of their own.
pub fn with_manifest_parameter(mut url: String, base_url: &str, parameter: &str) -> String {
    if !parameter.is_empty() && url.starts_with(base_url) && !url.contains('?') {
        url.push_str(parameter);
    }
    url
}

/// Substitute `$<name>$` and `$<name>%0Nd$` placeholders with `value`.
///
/// Unknown or malformed placeholder forms are left verbatim.
pub fn substitute_template(template: &str, name: &str, value: u64) -> String {
    let token = format!("${name}");
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(&token) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + token.len()..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push_str(&value.to_string());
            rest = tail;
        } else if let Some(width_spec) = after.strip_prefix("%0") {
            match width_spec.find("d$") {
                Some(end) => match width_spec[..end].parse::<usize>() {
                    Ok(width) => {
                        out.push_str(&format!("{value:0width$}"));
                        rest = &width_spec[end + 2..];
                    }
                    Err(_) => {
                        out.push_str(&token);
                        rest = after;
                    }
                },
                None => {
                    out.push_str(&token);
                    rest = after;
                }
            }
        } else {
            out.push_str(&token);
            rest = after;
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn manifest_url_split() {
        let (base_url, base_domain) = split_manifest_url("https://foo.bar/mpd/test.mpd");
        assert_eq!(base_url, "https://foo.bar/mpd/");
        assert_eq!(base_domain, "https://foo.bar");
    }

    #[test]
    fn manifest_url_split_strips_query() {
        let (base_url, base_domain) =
            split_manifest_url("https://foo.bar/live/master.m3u8?token=abc");
        assert_eq!(base_url, "https://foo.bar/live/");
        assert_eq!(base_domain, "https://foo.bar");
    }

    #[test]
    fn manifest_url_split_without_path() {
        let (base_url, base_domain) = split_manifest_url("https://foo.bar");
        assert_eq!(base_url, "https://foo.bar/");
        assert_eq!(base_domain, "https://foo.bar");
    }

    #[rstest]
    #[case::domain_absolute("/keys/k1.bin", "https://foo.bar/keys/k1.bin")]
    #[case::relative("media/seg1.ts", "https://foo.bar/hls/media/seg1.ts")]
    #[case::absolute("https://cdn.other/seg1.ts", "https://cdn.other/seg1.ts")]
    fn link_resolution(#[case] link: &str, #[case] expected: &str) {
        assert_eq!(
            resolve("https://foo.bar", "https://foo.bar/hls/", link),
            expected
        );
    }

    #[test]
    fn resolution_is_idempotent_for_absolute_urls() {
        let resolved = resolve("https://foo.bar", "https://foo.bar/hls/", "media/seg1.ts");
        assert_eq!(
            resolve("https://foo.bar", "https://foo.bar/hls/", &resolved),
            resolved
        );
    }

    #[test]
    fn effective_rewrite_applies_only_under_base() {
        assert_eq!(
            rewrite_effective(
                "https://foo.bar/hls/seg1.ts",
                "https://foo.bar/hls/",
                "https://edge-7.foo.bar/hls/"
            ),
            "https://edge-7.foo.bar/hls/seg1.ts"
        );
        assert_eq!(
            rewrite_effective(
                "https://cdn.other/seg1.ts",
                "https://foo.bar/hls/",
                "https://edge-7.foo.bar/hls/"
            ),
            "https://cdn.other/seg1.ts"
        );
    }

    #[test]
    fn manifest_parameter_rules() {
        let base = "https://foo.bar/hls/";
        assert_eq!(
            with_manifest_parameter("https://foo.bar/hls/v.m3u8".into(), base, "?auth=1"),
            "https://foo.bar/hls/v.m3u8?auth=1"
        );
        // Already has a query: left alone.
        assert_eq!(
            with_manifest_parameter("https://foo.bar/hls/v.m3u8?x=1".into(), base, "?auth=1"),
            "https://foo.bar/hls/v.m3u8?x=1"
        );
        // Not under the base: left alone.
        assert_eq!(
            with_manifest_parameter("https://cdn.other/v.m3u8".into(), base, "?auth=1"),
            "https://cdn.other/v.m3u8"
        );
    }

    #[rstest]
    #[case::number("…/segment_$Number$.m4s", "Number", 487_050, "…/segment_487050.m4s")]
    #[case::number_padded(
        "…/segment_$Number%08d$.m4s",
        "Number",
        487_050,
        "…/segment_00487050.m4s"
    )]
    #[case::time(
        "…/segment_$Time$.m4s",
        "Time",
        263_007_000_000,
        "…/segment_263007000000.m4s"
    )]
    #[case::no_placeholder("…/segment_42.m4s", "Number", 7, "…/segment_42.m4s")]
    #[case::malformed("…/segment_$Number%0xd$.m4s", "Number", 7, "…/segment_$Number%0xd$.m4s")]
    fn template_substitution(
        #[case] template: &str,
        #[case] name: &str,
        #[case] value: u64,
        #[case] expected: &str,
    ) {
        assert_eq!(substitute_template(template, name, value), expected);
    }

    #[test]
    fn substitution_is_pure_and_repeatable() {
        let template = "seg_$Number$_$Number%04d$.m4s";
        let first = substitute_template(template, "Number", 12);
        let second = substitute_template(template, "Number", 12);
        assert_eq!(first, "seg_12_0012.m4s");
        assert_eq!(first, second);
    }

    #[test]
    fn sequential_numbers_produce_sequential_urls() {
        let template = "https://cdn.example/segment_$Number$.m4s";
        let urls: Vec<String> = (487_050..487_055)
            .map(|n| substitute_template(template, "Number", n))
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/segment_487050.m4s",
                "https://cdn.example/segment_487051.m4s",
                "https://cdn.example/segment_487052.m4s",
                "https://cdn.example/segment_487053.m4s",
                "https://cdn.example/segment_487054.m4s",
            ]
        );
    }
}
