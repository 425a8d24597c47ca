use url::Url;

/// Query keys dropped regardless of case, in addition to any `utm_*` key.
const TRACKING_PARAMS: &[&str] = &[
    "ref", "spm", "fbclid", "gclid", "igshid", "mkt_tok", "mc_cid", "mc_eid", "_hsenc", "_hsmi",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Canonicalizes a link for identity and display.
///
/// Lower-cases scheme and host, drops the fragment, removes tracking query
/// parameters (`utm_*` plus a fixed list), keeps the remaining parameters in
/// their original order and strips trailing slashes from the path.
///
/// Never fails: input that does not parse as an absolute URL is returned
/// trimmed.
///
/// # Examples
///
/// ```
/// use feedroll::util::normalize_url;
///
/// assert_eq!(
///     normalize_url("https://EX.com/a/?utm_source=x&ref=y&id=1"),
///     "https://ex.com/a?id=1"
/// );
/// assert_eq!(normalize_url("  not a url  "), "not a url");
/// ```
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    // Opaque URLs (mailto:, data:) have no hierarchical path to tidy.
    if !url.cannot_be_a_base() {
        let path = url.path().trim_end_matches('/').to_string();
        url.set_path(if path.is_empty() { "/" } else { &path });
    }

    let mut out = String::from(url);
    if out.ends_with('/') {
        out.pop();
    }
    out
}

/// Same as [`normalize_url`], with the surviving query pairs sorted so that
/// parameter order never affects the result. Used only for identity keys.
pub(crate) fn identity_url(raw: &str) -> String {
    let normalized = normalize_url(raw);
    let Ok(mut url) = Url::parse(&normalized) else {
        return normalized;
    };
    if url.query().is_none() {
        return normalized;
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    String::from(url)
}

/// Returns the lower-cased host of a URL with its port when one other than
/// the scheme's default is given, or an empty string when there is no host.
pub fn host_of_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw.trim()) else {
        return String::new();
    };
    let Some(host) = url.host_str() else {
        return String::new();
    };
    let host = host.to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}
