//! Domain pattern matching for rate-limit overrides and blocklists

/// Checks whether `domain` falls under `pattern`
///
/// A pattern names a registrable domain and covers it together with every
/// subdomain, matching on whole labels. A leading `*.` is accepted and means
/// the same thing, so `*.basketball-reference.com` and
/// `basketball-reference.com` both cover `www.basketball-reference.com`.
/// Comparison is ASCII case-insensitive.
///
/// # Arguments
///
/// * `pattern` - Configured domain, optionally prefixed with `*.`
/// * `domain` - Host being crawled, as returned by [`extract_domain`](super::extract_domain)
///
/// # Examples
///
/// ```
/// use sumi_tide::url::matches_domain;
///
/// assert!(matches_domain("doubleclick.net", "stats.g.doubleclick.net"));
/// assert!(matches_domain("*.basketball-reference.com", "basketball-reference.com"));
/// assert!(!matches_domain("x.com", "box.com"));
/// ```
pub fn matches_domain(pattern: &str, domain: &str) -> bool {
    let base = pattern.strip_prefix("*.").unwrap_or(pattern);
    if base.is_empty() || domain.len() < base.len() {
        return false;
    }

    let split = domain.len() - base.len();
    if !domain.is_char_boundary(split) || !domain[split..].eq_ignore_ascii_case(base) {
        return false;
    }
    split == 0 || domain[..split].ends_with('.')
}
