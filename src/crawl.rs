//! Web page production for crawl ingests.
//!
//! The crawler itself is a capability: [`PageProducer`] yields pages with
//! extracted text, and the ingestion orchestrator treats them like any other
//! source. The bundled [`HttpPageProducer`] does a bounded same-domain
//! breadth-first fetch with a per-page deadline; anything smarter plugs in
//! behind the trait.

use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// What to crawl.
#[derive(Debug, Clone)]
pub struct CrawlSpec {
    pub url: String,
    /// `page` fetches only the seed; `site` follows same-domain links.
    pub crawl_type: String,
    pub max_pages: usize,
    pub depth: usize,
}

/// One produced page, ready for ingestion.
#[derive(Debug, Clone)]
pub struct PageInput {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
}

/// Capability over a page source.
#[async_trait]
pub trait PageProducer: Send + Sync {
    async fn produce(&self, spec: &CrawlSpec, cancel: &CancellationToken)
        -> Result<Vec<PageInput>>;
}

/// Bounded breadth-first HTTP fetcher.
pub struct HttpPageProducer {
    client: reqwest::Client,
}

impl HttpPageProducer {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent("ctxscope/0.3")
            .build()
            .map_err(Error::from)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageProducer for HttpPageProducer {
    async fn produce(
        &self,
        spec: &CrawlSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageInput>> {
        if !spec.url.starts_with("http://") && !spec.url.starts_with("https://") {
            return Err(Error::validation(format!("illegal URL: {}", spec.url)));
        }
        let seed_domain = domain_of(&spec.url)
            .ok_or_else(|| Error::validation(format!("illegal URL: {}", spec.url)))?;

        let follow_links = spec.crawl_type == "site" && spec.depth > 0;
        let max_pages = spec.max_pages.max(1);

        let mut pages: Vec<PageInput> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((spec.url.clone(), 0));
        seen.insert(spec.url.clone());

        while let Some((url, level)) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(Error::cancelled());
            }
            if pages.len() >= max_pages {
                break;
            }

            let html = match self.fetch(&url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %url, error = %e, "page fetch failed; skipping");
                    continue;
                }
            };

            let title = extract_title(&html);
            let content = html_to_text(&html);
            if !content.trim().is_empty() {
                pages.push(PageInput {
                    url: url.clone(),
                    title,
                    content,
                });
            }

            if follow_links && level < spec.depth {
                for link in extract_links(&html, &url) {
                    if domain_of(&link).as_deref() == Some(seed_domain.as_str())
                        && seen.insert(link.clone())
                    {
                        queue.push_back((link, level + 1));
                    }
                }
            }
        }

        debug!(pages = pages.len(), seed = %spec.url, "crawl produced pages");
        Ok(pages)
    }
}

impl HttpPageProducer {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::new(
                crate::error::ErrorKind::Io,
                format!("GET {url} returned {status}"),
            ));
        }
        Ok(response.text().await?)
    }
}

/// Host part of an absolute URL.
pub fn domain_of(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1)?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.split('@').last()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// `<title>` contents, if present.
pub fn extract_title(html: &str) -> Option<String> {
    let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
    re.captures(html)
        .map(|c| decode_entities(c[1].trim()))
        .filter(|t| !t.is_empty())
}

/// Reduce HTML to whitespace-normalized text: scripts and styles dropped,
/// block-level tags becoming line breaks, entities decoded.
pub fn html_to_text(html: &str) -> String {
    let scripts = Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")
        .expect("static regex");
    let without_scripts = scripts.replace_all(html, " ");

    let blocks = Regex::new(r"(?i)</?(p|div|br|li|ul|ol|h[1-6]|tr|table|section|article|header|footer|pre|blockquote)[^>]*>")
        .expect("static regex");
    let with_breaks = blocks.replace_all(&without_scripts, "\n");

    let tags = Regex::new(r"(?s)<[^>]+>").expect("static regex");
    let without_tags = tags.replace_all(&with_breaks, " ");

    let decoded = decode_entities(&without_tags);

    // Collapse runs of blank lines and intra-line whitespace.
    let mut out = String::with_capacity(decoded.len());
    let mut blank_run = 0usize;
    for line in decoded.lines() {
        let squeezed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if squeezed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&squeezed);
        out.push('\n');
    }
    out.trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// Absolute same-page links found in `href` attributes.
fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let re = Regex::new(r#"(?i)href\s*=\s*["']([^"'#]+)["']"#).expect("static regex");
    let base_origin = origin_of(base_url);

    re.captures_iter(html)
        .filter_map(|c| {
            let href = c[1].trim();
            if href.starts_with("http://") || href.starts_with("https://") {
                Some(href.to_string())
            } else if href.starts_with('/') {
                base_origin.as_ref().map(|o| format!("{o}{href}"))
            } else {
                None
            }
        })
        .collect()
}

fn origin_of(url: &str) -> Option<String> {
    let scheme_end = url.find("://")?;
    let rest = &url[scheme_end + 3..];
    let host_end = rest.find('/').unwrap_or(rest.len());
    Some(format!("{}{}", &url[..scheme_end + 3], &rest[..host_end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_extraction() {
        assert_eq!(domain_of("https://docs.rs/tokio"), Some("docs.rs".into()));
        assert_eq!(
            domain_of("http://user@Example.COM:8080/x"),
            Some("example.com".into())
        );
        assert_eq!(domain_of("not a url"), None);
    }

    #[test]
    fn title_extraction() {
        assert_eq!(
            extract_title("<html><head><title> My Page </title></head></html>"),
            Some("My Page".into())
        );
        assert_eq!(extract_title("<html><body>no title</body></html>"), None);
    }

    #[test]
    fn html_to_text_strips_scripts_and_tags() {
        let html = r#"
            <html><head><script>var x = 1;</script><style>p { color: red }</style></head>
            <body><h1>Heading</h1><p>First &amp; second.</p><div>Third</div></body></html>
        "#;
        let text = html_to_text(html);
        assert!(text.contains("Heading"));
        assert!(text.contains("First & second."));
        assert!(text.contains("Third"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn links_resolve_relative_to_origin() {
        let html = r##"<a href="/docs/intro">intro</a> <a href="https://other.dev/x">x</a> <a href="#frag">frag</a>"##;
        let links = extract_links(html, "https://site.dev/base/page");
        assert!(links.contains(&"https://site.dev/docs/intro".to_string()));
        assert!(links.contains(&"https://other.dev/x".to_string()));
        assert_eq!(links.len(), 2);
    }
}
