use std::time::Duration;

use reqwest::Client;
use rss::Channel;
use thiserror::Error;
use tracing::{debug, info};

/// Client identification sent with every feed request.
pub const USER_AGENT: &str = "gator";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FetchError {
    /// DNS, connection, TLS, timeout or body read failure
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response with a non-2xx status code
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),
    /// Body is not a readable RSS 2.0 document
    #[error("failed to parse XML: {0}")]
    Parse(#[from] rss::Error),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// `<pubDate>` exactly as it appeared in the document, empty if absent
    pub pub_date: String,
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        info!(url = %url, "Fetching feed");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UnexpectedStatus(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        debug!(url = %url, bytes = bytes.len(), "Downloaded feed body");

        Self::parse(&bytes)
    }

    /// Parses an RSS 2.0 document and decodes HTML entities in the text fields.
    pub fn parse(xml_bytes: &[u8]) -> Result<ParsedFeed, FetchError> {
        let channel = Channel::read_from(xml_bytes)?;

        let items = channel
            .items()
            .iter()
            .map(|item| FeedItem {
                title: unescape_html(item.title().unwrap_or_default()),
                link: item.link().unwrap_or_default().to_string(),
                description: unescape_html(item.description().unwrap_or_default()),
                pub_date: item.pub_date().unwrap_or_default().to_string(),
            })
            .collect();

        Ok(ParsedFeed {
            title: unescape_html(channel.title()),
            link: channel.link().to_string(),
            description: unescape_html(channel.description()),
            items,
        })
    }
}

/// Feeds often escape their markup twice, so after XML parsing the text can
/// still carry entities like `&amp;`. Each `&name;` / `&#n;` reference is
/// decoded on its own; a stray `&` or unknown name is left as written.
pub fn unescape_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        let candidate = &rest[amp..];

        match entity_len(candidate)
            .and_then(|len| htmlescape::decode_html(&candidate[..len]).ok().map(|s| (len, s)))
        {
            Some((len, value)) => {
                decoded.push_str(&value);
                rest = &candidate[len..];
            }
            None => {
                decoded.push('&');
                rest = &candidate[1..];
            }
        }
    }
    decoded.push_str(rest);
    decoded
}

/// Length of the `&...;` reference at the start of `text`, if it looks like one.
fn entity_len(text: &str) -> Option<usize> {
    let body = &text[1..];
    let end = body.find(|c: char| !(c.is_ascii_alphanumeric() || c == '#'))?;
    (end > 0 && body[end..].starts_with(';')).then_some(end + 2)
}
