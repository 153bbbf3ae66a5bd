//! Breadth-first same-domain crawl for targets with `max_pages > 1`.
//!
//! ```text
//! queue: [start] ─▶ fetch ─▶ extract text + title + links ─▶ keep if > 100 chars
//!          ▲                                   │
//!          └──────── unseen same-domain links ─┘
//! ```
//!
//! Kept pages are joined as `[title]\ntext` with [`PAGE_SEPARATOR`]
//! between them, so the combined text fingerprints and chunks like a
//! single page.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use scraper::{Html, Selector};
use url::Url;

use sitewatch_core::extract::extract_text;
use sitewatch_core::traits::PageFetcher;
use sitewatch_core::{Result, WatchError};

pub const PAGE_SEPARATOR: &str = "\n\n=== PAGE SEPARATOR ===\n\n";

/// Pages with this many extracted chars or fewer are not kept.
const MIN_PAGE_CHARS: usize = 100;

const SKIPPED_EXTENSIONS: &[&str] = &[".pdf", ".jpg", ".png", ".zip"];

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_pages: usize,
    /// Pause before each page after the first.
    pub settle: Duration,
}

/// Text, title and outgoing links of one fetched page.
#[derive(Debug, Default)]
struct PageExtract {
    title: String,
    text: String,
    links: Vec<Url>,
}

fn extract_page(
    html: &str,
    page_url: &Url,
    selector: Option<&str>,
    xpath: Option<&str>,
) -> PageExtract {
    let text = extract_text(html, selector, xpath);
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default();

    let links = match Selector::parse("a[href]") {
        Ok(sel) => document
            .select(&sel)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| page_url.join(href).ok())
            .collect(),
        Err(_) => Vec::new(),
    };

    PageExtract { title, text, links }
}

fn is_crawlable(url: &Url, start: &Url) -> bool {
    let path = url.path().to_lowercase();
    matches!(url.scheme(), "http" | "https")
        && url.host_str() == start.host_str()
        && url.port_or_known_default() == start.port_or_known_default()
        && !SKIPPED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// URL identity for the visited set: fragments never make a new page.
fn normalize(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

/// Crawl from `start_url` and return the combined text of kept pages.
///
/// A failure fetching the first page is returned; later failures are
/// logged and skipped. Returns an empty string when no page is kept.
pub async fn crawl(
    fetcher: &dyn PageFetcher,
    start_url: &str,
    selector: Option<&str>,
    xpath: Option<&str>,
    opts: &CrawlOptions,
) -> Result<String> {
    let start = Url::parse(start_url).map_err(|e| WatchError::fetch(format!("{}: {}", start_url, e)))?;
    let start = normalize(start);

    let mut queue: VecDeque<Url> = VecDeque::from([start.clone()]);
    let mut seen: HashSet<Url> = HashSet::from([start.clone()]);
    let mut pages: Vec<String> = Vec::new();
    let mut visited = 0usize;

    while let Some(url) = queue.pop_front() {
        if visited >= opts.max_pages {
            break;
        }
        if visited > 0 && !opts.settle.is_zero() {
            tokio::time::sleep(opts.settle).await;
        }
        visited += 1;

        let html = match fetcher.fetch(url.as_str()).await {
            Ok(html) => html,
            Err(e) if visited == 1 => return Err(e),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "skipping page that failed to fetch");
                continue;
            }
        };

        let page_url = url.clone();
        let selector_owned = selector.map(str::to_string);
        let xpath_owned = xpath.map(str::to_string);
        let page = tokio::task::spawn_blocking(move || {
            extract_page(&html, &page_url, selector_owned.as_deref(), xpath_owned.as_deref())
        })
        .await
        .map_err(|e| WatchError::fetch(format!("extraction task failed: {}", e)))?;

        let chars = page.text.chars().count();
        if chars > MIN_PAGE_CHARS {
            pages.push(format!("[{}]\n{}", page.title, page.text));
        } else {
            tracing::debug!(url = %url, chars, "skipping page with little content");
        }

        for link in page.links {
            let link = normalize(link);
            if is_crawlable(&link, &start) && seen.insert(link.clone()) {
                queue.push_back(link);
            }
        }
    }

    tracing::debug!(url = start_url, visited, kept = pages.len(), "crawl finished");
    Ok(pages.join(PAGE_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetcher;

    fn page(title: &str, body: &str, links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|l| format!("<a href=\"{}\">link</a>", l))
            .collect();
        format!(
            "<html><head><title>{}</title></head><body><p>{}</p>{}</body></html>",
            title, body, anchors
        )
    }

    fn long_text(word: &str) -> String {
        format!("{} ", word).repeat(40)
    }

    fn opts(max_pages: usize) -> CrawlOptions {
        CrawlOptions {
            max_pages,
            settle: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_crawl_follows_same_domain_links_breadth_first() {
        let fetcher = MockFetcher::new();
        fetcher.set_page(
            "https://example.com/",
            &page(
                "Home",
                &long_text("home"),
                &["/about", "https://other.org/x", "/brochure.pdf", "/about#team"],
            ),
        );
        fetcher.set_page("https://example.com/about", &page("About", &long_text("about"), &["/"]));

        let text = crawl(&fetcher, "https://example.com/", None, None, &opts(5))
            .await
            .unwrap();
        let parts: Vec<&str> = text.split(PAGE_SEPARATOR).collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("[Home]\nhome"));
        assert!(parts[1].starts_with("[About]\nabout"));
        assert_eq!(
            fetcher.calls(),
            vec!["https://example.com/", "https://example.com/about"]
        );
    }

    #[tokio::test]
    async fn test_crawl_respects_max_pages() {
        let fetcher = MockFetcher::new();
        fetcher.set_page("https://example.com/", &page("Home", &long_text("home"), &["/a", "/b"]));
        fetcher.set_page("https://example.com/a", &page("A", &long_text("a"), &[]));
        fetcher.set_page("https://example.com/b", &page("B", &long_text("b"), &[]));

        crawl(&fetcher, "https://example.com/", None, None, &opts(2))
            .await
            .unwrap();
        assert_eq!(fetcher.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_short_pages_skipped_and_later_failures_tolerated() {
        let fetcher = MockFetcher::new();
        fetcher.set_page(
            "https://example.com/",
            &page("Home", &long_text("home"), &["/short", "/missing"]),
        );
        fetcher.set_page("https://example.com/short", &page("Short", "tiny", &[]));

        let text = crawl(&fetcher, "https://example.com/", None, None, &opts(5))
            .await
            .unwrap();
        assert!(!text.contains(PAGE_SEPARATOR));
        assert!(text.starts_with("[Home]"));
    }

    #[tokio::test]
    async fn test_first_page_failure_is_fetch_error() {
        let fetcher = MockFetcher::new();
        let err = crawl(&fetcher, "https://example.com/", None, None, &opts(3))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "fetch_error");
    }
}
