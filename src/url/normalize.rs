use crate::UrlError;
use url::Url;

/// Tracking query parameters removed when no list is configured
pub const DEFAULT_TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "ref",
    "source",
];

/// Normalizes a URL using the default tracking parameter list
///
/// See [`normalize_url_with`] for the normalization steps.
///
/// # Examples
///
/// ```
/// use sumi_tide::url::normalize_url;
///
/// let url = normalize_url("https://EXAMPLE.COM/page/?b=2&utm_source=x&a=1#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page?a=1&b=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    normalize_url_with(url_str, DEFAULT_TRACKING_PARAMS)
}

/// Normalizes a URL into the key used for deduplication
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Accept only http and https; the scheme is kept as given
/// 3. Lowercase the host (default ports are dropped by the parser)
/// 4. Normalize path:
///    - Remove dot segments and repeated slashes
///    - Remove trailing slash (except for root /)
///    - Empty path becomes /
/// 5. Remove fragment
/// 6. Remove tracking query parameters (`utm_*` always, plus `tracking_params`)
/// 7. Sort remaining query parameters by key, keeping the original order of equal keys
/// 8. Remove empty query string
///
/// # Arguments
///
/// * `url_str` - The URL string to normalize
/// * `tracking_params` - Query parameter names to strip
///
/// # Returns
///
/// * `Ok(Url)` - Normalized URL
/// * `Err(UrlError)` - Failed to parse or normalize the URL
pub fn normalize_url_with<S: AsRef<str>>(
    url_str: &str,
    tracking_params: &[S],
) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    if host.is_empty() {
        return Err(UrlError::MissingDomain);
    }
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url, tracking_params);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut normalized_segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                normalized_segments.pop();
            }
            _ => normalized_segments.push(segment),
        }
    }

    if normalized_segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", normalized_segments.join("/"))
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params<S: AsRef<str>>(
    url: &Url,
    tracking_params: &[S],
) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key, tracking_params))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    // Stable sort keeps repeated keys in their original order
    params.sort_by(|a, b| a.0.cmp(&b.0));

    params
}

/// Checks if a query parameter is a tracking parameter
fn is_tracking_param<S: AsRef<str>>(key: &str, tracking_params: &[S]) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || tracking_params.iter().any(|p| p.as_ref() == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_is_preserved() {
        let result = normalize_url("http://example.com/page").unwrap();
        assert_eq!(result.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_www_is_preserved() {
        let result = normalize_url("https://www.example.com/").unwrap();
        assert_eq!(result.as_str(), "https://www.example.com/");
    }

    #[test]
    fn test_remove_trailing_slash() {
        let result = normalize_url("https://example.com/page/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_keep_root_slash() {
        let result = normalize_url("https://example.com").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("https://example.com/page#section").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_remove_tracking_params() {
        let result =
            normalize_url("https://example.com/page?utm_source=news&id=7&fbclid=abc").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page?id=7");
    }

    #[test]
    fn test_sort_query_params() {
        let result = normalize_url("https://example.com/search?z=1&a=2&m=3").unwrap();
        assert_eq!(result.as_str(), "https://example.com/search?a=2&m=3&z=1");
    }

    #[test]
    fn test_normalize_path_with_dots() {
        let result = normalize_url("https://example.com/a/./b/../c").unwrap();
        assert_eq!(result.as_str(), "https://example.com/a/c");
    }

    #[test]
    fn test_lowercase_domain() {
        let result = normalize_url("https://EXAMPLE.COM/Path").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Path");
    }

    #[test]
    fn test_default_port_dropped() {
        let result = normalize_url("https://example.com:443/page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");

        let result = normalize_url("http://example.com:8080/page").unwrap();
        assert_eq!(result.as_str(), "http://example.com:8080/page");
    }

    #[test]
    fn test_all_tracking_params_removed() {
        let result = normalize_url("https://example.com/?utm_source=a&utm_medium=b&gclid=c").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_equivalent_urls_normalize_identically() {
        let a = normalize_url("https://Example.com/players/?b=2&a=1&utm_campaign=x#stats").unwrap();
        let b = normalize_url("https://example.com/players?a=1&b=2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_custom_tracking_params() {
        let result =
            normalize_url_with("https://example.com/?session=1&page=2", &["session"]).unwrap();
        assert_eq!(result.as_str(), "https://example.com/?page=2");

        // utm_* is stripped even when not listed
        let result = normalize_url_with("https://example.com/?utm_whatever=1", &["session"]).unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_query_values_stay_encoded() {
        let result = normalize_url("https://example.com/search?q=hello%20world&a=x%26y").unwrap();
        assert_eq!(
            result.as_str(),
            "https://example.com/search?a=x%26y&q=hello+world"
        );
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://example.com/file");
        assert!(matches!(result, Err(UrlError::InvalidScheme(_))));
    }

    #[test]
    fn test_malformed_url() {
        let result = normalize_url("not a url");
        assert!(matches!(result, Err(UrlError::Parse(_))));
    }

    #[test]
    fn test_multiple_slashes() {
        let result = normalize_url("https://example.com//a///b").unwrap();
        assert_eq!(result.as_str(), "https://example.com/a/b");
    }

    #[test]
    fn test_parent_directory_at_root() {
        let result = normalize_url("https://example.com/../page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }
}
