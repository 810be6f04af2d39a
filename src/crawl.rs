//! Bounded breadth-first site crawler.
//!
//! Starts at a seed URL, follows `href` links that stay on the seed's host,
//! and stops after `max_pages` pages. Pages are returned in visit order.
//! A failed fetch aborts the crawl.

use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;
use url::Url;

use crate::errors::AcquireError;
use crate::web::WebClient;

/// Extensions that never lead to markup worth crawling.
const SKIPPED_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".pdf", ".zip", ".gz", ".tar",
    ".css", ".js", ".mp4", ".mp3", ".woff", ".woff2",
];

#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub markup: String,
}

fn href_pattern() -> &'static Regex {
    static HREF: OnceLock<Regex> = OnceLock::new();
    HREF.get_or_init(|| {
        Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).expect("href pattern is valid")
    })
}

pub fn crawl_site(
    web: &dyn WebClient,
    seed: &str,
    max_pages: usize,
) -> Result<Vec<CrawledPage>, AcquireError> {
    let seed_url = Url::parse(seed).map_err(|_| AcquireError::InvalidUrl(seed.to_string()))?;
    if !matches!(seed_url.scheme(), "http" | "https") {
        return Err(AcquireError::InvalidUrl(seed.to_string()));
    }
    let host = seed_url.host_str().map(str::to_string);

    tracing::info!("Crawling {} (max {} pages)", seed, max_pages);

    let mut queue = VecDeque::from([strip_fragment(seed_url)]);
    let mut seen: HashSet<String> = queue.iter().map(|u| u.to_string()).collect();
    let mut pages = Vec::new();

    while let Some(url) = queue.pop_front() {
        if pages.len() >= max_pages {
            break;
        }

        let markup = web.fetch_page(url.as_str())?;

        for link in extract_links(&url, &markup) {
            if link.host_str().map(str::to_string) != host {
                continue;
            }
            if seen.insert(link.to_string()) {
                queue.push_back(link);
            }
        }

        pages.push(CrawledPage {
            url: url.to_string(),
            markup,
        });
    }

    tracing::info!("Crawled {} pages from {}", pages.len(), seed);
    Ok(pages)
}

/// Absolute http(s) links found in `markup`, resolved against `base`.
pub fn extract_links(base: &Url, markup: &str) -> Vec<Url> {
    href_pattern()
        .captures_iter(markup)
        .filter_map(|cap| base.join(cap[1].trim()).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .filter(|u| {
            let path = u.path().to_ascii_lowercase();
            !SKIPPED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        })
        .map(strip_fragment)
        .collect()
}

fn strip_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}
