use url::Url;

/// Extracts the domain that rate limiting and scoping are keyed on
///
/// The port is not part of the domain: every port on a host shares one
/// politeness budget.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_tide::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM:8443/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the lowercase file extension of the URL's last path segment, dot included
pub fn path_extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.last()?;
    let dot = last.rfind('.')?;
    if dot + 1 == last.len() {
        return None;
    }
    Some(last[dot..].to_ascii_lowercase())
}
