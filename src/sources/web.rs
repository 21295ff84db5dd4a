//! Web adapters: single URLs, sitemaps, and bounded recursive crawls.
//!
//! Fetches are best-effort: a page that fails, redirects into the wrong
//! content type, or renders to empty text is skipped. The crawler stays on
//! the start hosts unless explicit URL prefixes widen or narrow the scope.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, warn};

use super::{IngestSource, ItemStream, Result, SourceContext, SourceError};
use crate::model::{IngestItem, Metadata};

/// Shared fetcher with bounded timeouts and a fixed user agent.
pub(crate) struct PageFetcher {
    client: reqwest::Client,
}

impl PageFetcher {
    pub fn new(ctx: &SourceContext) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(ctx.request_timeout)
            .user_agent(ctx.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| SourceError::Request(e.to_string()))?;
        Ok(Arc::new(Self { client }))
    }

    /// Fetch a page. `None` means "skip this URL" (error status, wrong
    /// content type, network failure).
    pub async fn fetch(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "Fetch failed, skipping");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(url, status = %response.status(), "Non-success status, skipping");
            return None;
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.contains("text/html") && !content_type.contains("xml") {
            debug!(url, content_type = %content_type, "Unsupported content type, skipping");
            return None;
        }
        match response.text().await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(url, error = %e, "Body read failed, skipping");
                None
            }
        }
    }
}

fn page_item(url: &str, text: String) -> IngestItem {
    let mut metadata = Metadata::new();
    metadata.insert("source_url".into(), Value::from(url));
    IngestItem::new(url, text, metadata)
}

/// Fixed list of URLs.
pub struct UrlSource {
    urls: Vec<String>,
    fetcher: Arc<PageFetcher>,
}

impl UrlSource {
    pub fn new(urls: Vec<String>, ctx: &SourceContext) -> Result<Self> {
        Ok(Self {
            urls,
            fetcher: PageFetcher::new(ctx)?,
        })
    }
}

#[async_trait]
impl IngestSource for UrlSource {
    fn describe(&self) -> String {
        format!("web_url({} urls)", self.urls.len())
    }

    async fn stream(&self) -> Result<ItemStream> {
        Ok(url_stream(self.urls.clone(), self.fetcher.clone()))
    }
}

fn url_stream(urls: Vec<String>, fetcher: Arc<PageFetcher>) -> ItemStream {
    futures::stream::iter(urls)
        .filter_map(move |url| {
            let fetcher = fetcher.clone();
            async move {
                let html = fetcher.fetch(&url).await?;
                let text = html_to_text(&html);
                if text.trim().is_empty() {
                    return None;
                }
                Some(Ok(page_item(&url, text)))
            }
        })
        .boxed()
}

/// URLs listed in a sitemap, optionally truncated.
pub struct SitemapSource {
    sitemap_url: String,
    limit: Option<usize>,
    fetcher: Arc<PageFetcher>,
}

impl SitemapSource {
    pub fn new(sitemap_url: String, limit: Option<usize>, ctx: &SourceContext) -> Result<Self> {
        Ok(Self {
            sitemap_url,
            limit,
            fetcher: PageFetcher::new(ctx)?,
        })
    }
}

#[async_trait]
impl IngestSource for SitemapSource {
    fn describe(&self) -> String {
        format!("sitemap({})", self.sitemap_url)
    }

    async fn stream(&self) -> Result<ItemStream> {
        let xml = self
            .fetcher
            .fetch(&self.sitemap_url)
            .await
            .ok_or_else(|| SourceError::NotFound(format!("sitemap {}", self.sitemap_url)))?;
        let mut urls = extract_sitemap_locs(&xml);
        if let Some(limit) = self.limit {
            urls.truncate(limit);
        }
        debug!(sitemap = %self.sitemap_url, urls = urls.len(), "Sitemap parsed");
        Ok(url_stream(urls, self.fetcher.clone()))
    }
}

/// `<loc>` entries of a sitemap document, in order.
pub(crate) fn extract_sitemap_locs(xml: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<loc>") {
        rest = &rest[start + 5..];
        let Some(end) = rest.find("</loc>") else {
            break;
        };
        let loc = rest[..end].trim();
        if !loc.is_empty() {
            out.push(loc.to_string());
        }
        rest = &rest[end + 6..];
    }
    out
}

struct CrawlState {
    queue: VecDeque<String>,
    seen: HashSet<String>,
    hosts: HashSet<String>,
    allowed_prefixes: Vec<String>,
    max_pages: usize,
}

impl CrawlState {
    fn allowed(&self, url: &str) -> bool {
        if self.allowed_prefixes.is_empty() {
            Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_owned))
                .is_some_and(|host| self.hosts.contains(&host))
        } else {
            self.allowed_prefixes.iter().any(|p| url.starts_with(p))
        }
    }
}

/// Bounded breadth-first crawl from a set of start URLs.
pub struct WebsiteSource {
    start_urls: Vec<String>,
    allowed_prefixes: Vec<String>,
    max_pages: usize,
    fetcher: Arc<PageFetcher>,
}

impl WebsiteSource {
    pub fn new(
        start_urls: Vec<String>,
        allowed_prefixes: Vec<String>,
        max_pages: usize,
        ctx: &SourceContext,
    ) -> Result<Self> {
        Ok(Self {
            start_urls,
            allowed_prefixes,
            max_pages,
            fetcher: PageFetcher::new(ctx)?,
        })
    }
}

#[async_trait]
impl IngestSource for WebsiteSource {
    fn describe(&self) -> String {
        format!("website({} start urls)", self.start_urls.len())
    }

    async fn stream(&self) -> Result<ItemStream> {
        let hosts = self
            .start_urls
            .iter()
            .filter_map(|u| Url::parse(u).ok())
            .filter_map(|u| u.host_str().map(str::to_owned))
            .collect();
        let state = CrawlState {
            queue: self.start_urls.iter().map(|u| defragment(u)).collect(),
            seen: HashSet::new(),
            hosts,
            allowed_prefixes: self.allowed_prefixes.clone(),
            max_pages: self.max_pages,
        };
        let fetcher = self.fetcher.clone();

        let stream = futures::stream::unfold(state, move |mut state| {
            let fetcher = fetcher.clone();
            async move {
                while let Some(url) = state.queue.pop_front() {
                    if state.seen.len() >= state.max_pages {
                        return None;
                    }
                    if state.seen.contains(&url) || !state.allowed(&url) {
                        continue;
                    }
                    state.seen.insert(url.clone());

                    let Some(html) = fetcher.fetch(&url).await else {
                        continue;
                    };
                    for link in extract_links(&html, &url) {
                        if !state.seen.contains(&link) && state.allowed(&link) {
                            state.queue.push_back(link);
                        }
                    }
                    let text = html_to_text(&html);
                    if text.trim().is_empty() {
                        continue;
                    }
                    return Some((Ok(page_item(&url, text)), state));
                }
                None
            }
        });
        Ok(stream.boxed())
    }
}

fn defragment(url: &str) -> String {
    match url.split_once('#') {
        Some((before, _)) => before.to_string(),
        None => url.to_string(),
    }
}

/// Absolute, fragment-stripped hrefs of a page.
pub(crate) fn extract_links(html: &str, base: &str) -> Vec<String> {
    let Ok(base_url) = Url::parse(base) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let lower = html.to_ascii_lowercase();
    let mut offset = 0;
    while let Some(pos) = lower[offset..].find("href=") {
        let value_start = offset + pos + 5;
        offset = value_start;
        let rest = &html[value_start..];
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        let inner = &rest[1..];
        let Some(end) = inner.find(quote) else {
            continue;
        };
        let href = inner[..end].trim();
        if href.is_empty() || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        if let Ok(mut resolved) = base_url.join(href) {
            resolved.set_fragment(None);
            out.push(resolved.to_string());
        }
    }
    out
}

/// Best-effort HTML to plain text: drops non-content elements, strips tags,
/// decodes common entities, and collapses blank runs.
pub(crate) fn html_to_text(html: &str) -> String {
    const DROP: [&str; 7] = [
        "script", "style", "noscript", "iframe", "header", "footer", "nav",
    ];

    let mut out = String::with_capacity(html.len() / 2);
    let mut rest = html;
    let mut skip_until: Option<String> = None;

    while let Some(start) = rest.find('<') {
        if skip_until.is_none() {
            out.push_str(&rest[..start]);
        }
        rest = &rest[start + 1..];
        let Some(end) = rest.find('>') else {
            break;
        };
        let tag_body = &rest[..end];
        rest = &rest[end + 1..];

        let (closing, name_part) = match tag_body.strip_prefix('/') {
            Some(stripped) => (true, stripped),
            None => (false, tag_body),
        };
        let name: String = name_part
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        if let Some(waiting_for) = &skip_until {
            if closing && &name == waiting_for {
                skip_until = None;
            }
            continue;
        }
        if !closing && DROP.contains(&name.as_str()) && !tag_body.ends_with('/') {
            skip_until = Some(name);
            continue;
        }
        // Block-level boundaries become line breaks.
        if matches!(
            name.as_str(),
            "p" | "div" | "br" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
        ) {
            out.push('\n');
        }
    }
    if skip_until.is_none() {
        out.push_str(rest);
    }

    let decoded = decode_entities(&out);
    let mut lines: Vec<&str> = decoded.lines().map(str::trim).collect();
    lines.retain(|line| !line.is_empty());
    lines.join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
