//! Web access used by the data acquirer.
//!
//! [`WebClient`] is the narrow capability the acquirer depends on: fetch a
//! page, stream a download to disk, and render markup as plain text. The
//! production implementation, [`HttpWebClient`], uses a blocking `reqwest`
//! client and `html2text`; tests substitute in-memory fakes.
//!
//! There are no retries. Any transport error or non-2xx status is returned
//! to the caller as an [`AcquireError`].

use std::fs::File;
use std::path::Path;

use crate::config::AcquireConfig;
use crate::errors::AcquireError;

pub trait WebClient: Send + Sync {
    /// Fetch `url` and return the response body as text.
    fn fetch_page(&self, url: &str) -> Result<String, AcquireError>;

    /// Stream the body of `url` into a new file at `dest`, returning the byte count.
    fn download(&self, url: &str, dest: &Path) -> Result<u64, AcquireError>;

    /// Render HTML as readable plain text (headings, lists and links kept).
    fn html_to_text(&self, markup: &str) -> Result<String, AcquireError>;
}

pub struct HttpWebClient {
    client: reqwest::blocking::Client,
    text_width: usize,
}

impl HttpWebClient {
    /// Build the client. Must be called outside of an async runtime.
    pub fn new(config: &AcquireConfig) -> Result<Self, AcquireError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|source| AcquireError::Http {
                url: "<client setup>".to_string(),
                source,
            })?;
        Ok(Self {
            client,
            text_width: config.text_width,
        })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, AcquireError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|source| AcquireError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

impl WebClient for HttpWebClient {
    fn fetch_page(&self, url: &str) -> Result<String, AcquireError> {
        tracing::info!("Fetching content from {}", url);
        let body = self
            .get(url)?
            .text()
            .map_err(|source| AcquireError::Http {
                url: url.to_string(),
                source,
            })?;
        tracing::debug!(bytes = body.len(), "Fetched content from {}", url);
        Ok(body)
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64, AcquireError> {
        tracing::info!("Downloading {} to {}", url, dest.display());
        let mut response = self.get(url)?;
        let mut file = File::create(dest)?;
        let bytes = response
            .copy_to(&mut file)
            .map_err(|source| AcquireError::Http {
                url: url.to_string(),
                source,
            })?;
        tracing::info!(bytes, "Downloaded {}", url);
        Ok(bytes)
    }

    fn html_to_text(&self, markup: &str) -> Result<String, AcquireError> {
        html2text::config::plain()
            .string_from_read(markup.as_bytes(), self.text_width)
            .map_err(|e| AcquireError::Markup(e.to_string()))
    }
}
