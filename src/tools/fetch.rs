//! Outbound page fetching for the research tools.
//!
//! This is the only place the server talks to third parties, and the only
//! place a timeout applies.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::ToolsConfig;
use crate::{Error, Result};

/// HTML search endpoint used for niche and topic research
pub const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// Source of page text.
#[async_trait]
pub trait PageFetcher: Send + Sync + 'static {
    /// Fetch `url` and return its visible text.
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// Run a web search and return the text of the results page.
    async fn search(&self, query: &str) -> Result<String> {
        let mut url = Url::parse(SEARCH_ENDPOINT).map_err(|e| Error::Fetch(e.to_string()))?;
        url.query_pairs_mut().append_pair("q", query);
        self.fetch_text(url.as_str()).await
    }
}

/// [`PageFetcher`] backed by `reqwest`.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a fetcher with the configured timeout and user agent.
    pub fn new(config: &ToolsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!(url, "Fetching page");
        let response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Fetch(format!("{url}: {e}")))?;
        let html = response.text().await?;
        Ok(html_to_text(&html))
    }
}

/// Strip markup, scripts and styles, leaving whitespace-normalized text.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    static BLOCKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();

    let blocks = BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<!--.*?-->").unwrap()
    });
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap());
    let space = SPACE.get_or_init(|| Regex::new(r"\s+").unwrap());

    let text = blocks.replace_all(html, " ");
    let text = tags.replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'");
    space.replace_all(&text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_styles_and_tags() {
        let html = r#"<html><head><style>p { color: red }</style>
            <script type="text/javascript">var x = "<b>";</script></head>
            <body><!-- hidden --><p>Hello&nbsp;<b>world</b> &amp; friends</p></body></html>"#;
        assert_eq!(html_to_text(html), "Hello world & friends");
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(html_to_text("  just   text \n"), "just text");
    }

    #[test]
    fn builds_client_from_config() {
        assert!(HttpFetcher::new(&ToolsConfig::default()).is_ok());
    }
}
