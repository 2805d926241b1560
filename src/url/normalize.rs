use crate::{UrlError, UrlResult};
use url::form_urlencoded;
use url::Url;

/// Characters, besides ASCII alphanumerics, that stay unescaped in a normalized path
const PATH_SAFE: &[u8] = b"/:@-._~!$&'()*+,;=";

/// Schemes whose remainder can look like a port number but never names a host
const OPAQUE_SCHEMES: &[&str] = &[
    "data",
    "file",
    "javascript",
    "mailto",
    "news",
    "sms",
    "tel",
    "urn",
];

/// Normalizes a URL into the identity key used by the document repository
///
/// Returns an empty string for blank or unparseable input; callers treat that as
/// "skip this URL" rather than as an error.
///
/// # Examples
///
/// ```
/// use leasecrawl::url::normalize_url;
///
/// assert_eq!(
///     normalize_url("HTTP://Example.com:80/a%20b?b=2&a=1#top"),
///     "http://example.com/a%20b?a=1&b=2"
/// );
/// assert_eq!(normalize_url("   "), "");
/// ```
pub fn normalize_url(raw: &str) -> String {
    try_normalize_url(raw).unwrap_or_default()
}

/// Normalizes a URL, reporting why normalization failed
///
/// # Normalization Steps
///
/// 1. Trim whitespace; reject empty input
/// 2. Default a missing scheme to `http`; reject other schemes and embedded credentials
/// 3. Re-parse from an embedded absolute URL when the outer one carries no host
/// 4. Lowercase scheme and host, drop the scheme's default port
/// 5. Percent-decode the path and re-encode it with a fixed safe set
/// 6. Sort query parameters and re-encode them; drop an empty query
/// 7. Remove the fragment
pub fn try_normalize_url(raw: &str) -> UrlResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let source = embedded_absolute_url(trimmed).unwrap_or(trimmed);
    let mut url = Url::parse(&with_scheme(source)?).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlError::Malformed("credentials in URL".to_string()));
    }

    // The parser already lowercases special-scheme hosts; ports are checked explicitly
    if url.port().is_some_and(|port| is_default_port(url.scheme(), port)) {
        url.set_port(None)
            .map_err(|_| UrlError::Malformed("cannot clear port".to_string()))?;
    }

    let path = canonical_path(url.path());
    url.set_path(&path);

    let pairs = sorted_query_pairs(&url);
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter())
            .finish();
        url.set_query(Some(&query));
    }

    url.set_fragment(None);

    Ok(url.to_string())
}

/// Finds an absolute URL nested behind a host-less prefix such as `http:///` or `/`
///
/// Seed data that was encoded twice sometimes carries the real URL inside the path
/// of an otherwise empty one.
fn embedded_absolute_url(raw: &str) -> Option<&str> {
    let lower = raw.to_ascii_lowercase();
    let mut candidates: Vec<usize> = lower
        .match_indices("http://")
        .chain(lower.match_indices("https://"))
        .map(|(index, _)| index)
        .filter(|&index| index > 0)
        .collect();
    candidates.sort_unstable();

    candidates.into_iter().find_map(|index| {
        let prefix = raw[..index].trim_end_matches('/');
        let prefix = prefix.strip_suffix(':').unwrap_or(prefix);
        let hostless = prefix.is_empty()
            || prefix.eq_ignore_ascii_case("http")
            || prefix.eq_ignore_ascii_case("https");
        hostless.then(|| &raw[index..])
    })
}

/// Prepends `http` to scheme-less input
///
/// Input such as `mailto:user@example.com` has a scheme but no `//` authority; it is
/// rejected here instead of being read as userinfo on an `http` host. `host:port`
/// input like `localhost:8080` is still treated as scheme-less.
fn with_scheme(raw: &str) -> UrlResult<String> {
    let has_scheme = raw
        .split_once("://")
        .is_some_and(|(scheme, _)| is_scheme_name(scheme));

    if has_scheme {
        return Ok(raw.to_string());
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return Ok(format!("http://{}", rest));
    }

    if let Some((scheme, rest)) = raw.split_once(':') {
        let port = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let is_port = !port.is_empty() && port.chars().all(|c| c.is_ascii_digit());
        let opaque = OPAQUE_SCHEMES
            .iter()
            .any(|known| scheme.eq_ignore_ascii_case(known));
        if is_scheme_name(scheme) && (opaque || !is_port) {
            return Err(UrlError::InvalidScheme(scheme.to_ascii_lowercase()));
        }
    }

    Ok(format!("http://{}", raw))
}

/// Matches `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )`
fn is_scheme_name(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn is_default_port(scheme: &str, port: u16) -> bool {
    matches!((scheme, port), ("http", 80) | ("https", 443))
}

/// Decodes every percent escape in the path and re-encodes it canonically
///
/// Distinct encodings of the same logical path (`%7E` vs `~`, `%2f` vs `%2F`,
/// a literal space vs `%20`) all map to one spelling.
fn canonical_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let decoded = urlencoding::decode_binary(path.as_bytes());
    let mut encoded = String::with_capacity(decoded.len());
    for &byte in decoded.iter() {
        if byte.is_ascii_alphanumeric() || PATH_SAFE.contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

/// Returns query parameters sorted by key, then value
fn sorted_query_pairs(url: &Url) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    pairs
}
