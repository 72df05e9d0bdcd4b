//! Page parsing for the fetcher
//!
//! Pulls out what the crawl needs from an HTML document: the title, the
//! outbound links to offer to the frontier, and how much readable text the
//! page holds (which drives simulated reading time).

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Prefixes of hrefs that never lead to a crawlable page
const INERT_SCHEMES: [&str; 4] = ["javascript:", "mailto:", "tel:", "data:"];

/// What a fetched page contributes to the crawl
#[derive(Debug, Clone)]
pub struct ParsedPage {
    /// Trimmed `<title>` text, if present and non-empty
    pub title: Option<String>,

    /// Distinct absolute http(s) links, in document order
    pub links: Vec<String>,

    /// Characters of whitespace-collapsed body text
    pub text_length: usize,
}

/// Parses an HTML document served from `page_url`
///
/// Anchors are collected first, then `<link rel="canonical">`. Anchors marked
/// `download`, fragment-only hrefs and inert schemes (`javascript:`, `mailto:`,
/// `tel:`, `data:`) are dropped. Relative hrefs resolve against `<base href>`
/// when the page declares one. A fragment on a link to another page is left in
/// place for the frontier's normalizer.
///
/// # Arguments
///
/// * `html` - The response body
/// * `page_url` - Final URL of the response, after redirects
///
/// # Returns
///
/// * `Ok(ParsedPage)` - Title, links and text length
/// * `Err(String)` - A selector could not be built
///
/// # Example
///
/// ```
/// use sumi_tide::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<title> Box Scores </title><a href="/boxscores/2024">2024</a>"#;
/// let page = parse_html(html, &Url::parse("https://example.com/").unwrap()).unwrap();
/// assert_eq!(page.title.as_deref(), Some("Box Scores"));
/// assert_eq!(page.links, vec!["https://example.com/boxscores/2024".to_string()]);
/// ```
pub fn parse_html(html: &str, page_url: &Url) -> Result<ParsedPage, String> {
    let document = Html::parse_document(html);
    let selectors = Selectors::new()?;

    let base = resolve_base(&document, &selectors, page_url);
    let mut links = LinkSet::default();
    for anchor in document.select(&selectors.anchor) {
        if anchor.value().attr("download").is_none() {
            links.add(anchor, &base);
        }
    }
    for canonical in document.select(&selectors.canonical) {
        links.add(canonical, &base);
    }

    Ok(ParsedPage {
        title: page_title(&document, &selectors),
        links: links.into_vec(),
        text_length: readable_length(&document, &selectors),
    })
}

struct Selectors {
    title: Selector,
    base: Selector,
    anchor: Selector,
    canonical: Selector,
    body: Selector,
}

impl Selectors {
    fn new() -> Result<Self, String> {
        let parse = |css: &str| {
            Selector::parse(css).map_err(|e| format!("Invalid selector '{}': {:?}", css, e))
        };
        Ok(Self {
            title: parse("title")?,
            base: parse("base[href]")?,
            anchor: parse("a[href]")?,
            canonical: parse("link[rel='canonical'][href]")?,
            body: parse("body")?,
        })
    }
}

/// Ordered, duplicate-free collection of resolved links
#[derive(Default)]
struct LinkSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl LinkSet {
    fn add(&mut self, element: ElementRef<'_>, base: &Url) {
        let Some(link) = element.value().attr("href").and_then(|h| absolutize(h, base)) else {
            return;
        };
        if self.seen.insert(link.clone()) {
            self.ordered.push(link);
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

fn page_title(document: &Html, selectors: &Selectors) -> Option<String> {
    let text: String = document.select(&selectors.title).next()?.text().collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// The URL relative links resolve against: `<base href>` or the page itself
fn resolve_base(document: &Html, selectors: &Selectors, page_url: &Url) -> Url {
    document
        .select(&selectors.base)
        .next()
        .and_then(|base| base.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .unwrap_or_else(|| page_url.clone())
}

/// Counts body characters, treating each whitespace run as one space
fn readable_length(document: &Html, selectors: &Selectors) -> usize {
    let words = document
        .select(&selectors.body)
        .flat_map(|body| body.text())
        .flat_map(str::split_whitespace);

    let (chars, count) = words.fold((0usize, 0usize), |(chars, count), word| {
        (chars + word.chars().count(), count + 1)
    });
    chars + count.saturating_sub(1)
}

/// Turns an href into an absolute http(s) URL, or `None` if it is not followable
fn absolutize(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if INERT_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme)) {
        return None;
    }

    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}
