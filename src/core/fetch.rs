use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

static BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<!--.*?-->")
        .expect("block pattern is valid")
});
static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Retrieves the readable text of a web page.
#[async_trait]
pub trait WebFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

pub struct HttpFetcher {
    client: Client,
    max_chars: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_chars: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("demoforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build fetch HTTP client")?;
        Ok(Self { client, max_chars })
    }
}

#[async_trait]
impl WebFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        if !res.status().is_success() {
            bail!("GET {} returned {}", url, res.status());
        }
        let body = res.text().await?;
        Ok(html_to_text(&body, self.max_chars))
    }
}

/// Strip scripts, styles, comments and markup, decode the common entities,
/// collapse whitespace and cut to at most `max_chars` characters.
pub fn html_to_text(html: &str, max_chars: usize) -> String {
    let without_blocks = BLOCKS.replace_all(html, " ");
    let without_tags = TAGS.replace_all(&without_blocks, " ");
    let decoded = decode_entities(&without_tags);
    let collapsed = WHITESPACE.replace_all(&decoded, " ");
    let trimmed = collapsed.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => trimmed[..cut].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
