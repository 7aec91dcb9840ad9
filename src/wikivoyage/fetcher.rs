//! Raw page markup from the Wikivoyage (MediaWiki) API.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://en.wikivoyage.org/w/api.php";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("API error {code}: {info}")]
    Api { code: String, info: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{page} returned status {status}")]
    Status { page: String, status: StatusCode },

    #[error("malformed response for {page}: {reason}")]
    Malformed { page: String, reason: String },

    #[error("invalid API url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("page not found: {0}")]
    NotFound(String),
}

/// Source of raw wiki markup for a page name
pub trait MarkupSource: Send + Sync {
    fn fetch_markup(&self, page: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    parse: Option<ParseBody>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ParseBody {
    wikitext: Option<WikitextBody>,
}

#[derive(Debug, Deserialize)]
struct WikitextBody {
    #[serde(rename = "*")]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

/// Fetches page wikitext with `action=parse`
pub struct WikivoyageFetcher {
    client: Client,
    api_url: Url,
    max_attempts: u32,
    retry_delay: Duration,
}

impl WikivoyageFetcher {
    pub fn new(
        api_url: &str,
        user_agent: &str,
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_url: Url::parse(api_url)?,
            max_attempts: max_attempts.max(1),
            retry_delay: Duration::from_secs(2),
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn page_url(&self, page: &str) -> Result<Url, FetchError> {
        Ok(Url::parse_with_params(
            self.api_url.as_str(),
            &[
                ("action", "parse"),
                ("page", page),
                ("prop", "wikitext"),
                ("format", "json"),
                ("redirects", "1"),
            ],
        )?)
    }

    async fn fetch_once(&self, url: &Url, page: &str) -> Result<String, FetchError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                page: page.to_string(),
                status,
            });
        }

        let body: ApiResponse = response.json().await?;
        extract_wikitext(page, body)
    }
}

fn extract_wikitext(page: &str, body: ApiResponse) -> Result<String, FetchError> {
    if let Some(error) = body.error {
        if error.code == "missingtitle" {
            return Err(FetchError::NotFound(page.to_string()));
        }
        return Err(FetchError::Api {
            code: error.code,
            info: error.info,
        });
    }

    body.parse
        .and_then(|p| p.wikitext)
        .map(|w| w.content)
        .ok_or_else(|| FetchError::Malformed {
            page: page.to_string(),
            reason: "missing parse.wikitext".to_string(),
        })
}

fn is_retryable(err: &FetchError) -> bool {
    match err {
        FetchError::Http(_) => true,
        FetchError::Status { status, .. } => status.is_server_error(),
        _ => false,
    }
}

impl MarkupSource for WikivoyageFetcher {
    async fn fetch_markup(&self, page: &str) -> Result<String, FetchError> {
        let url = self.page_url(page)?;
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!("Fetching {} (attempt {}/{})", page, attempts, self.max_attempts);

            match self.fetch_once(&url, page).await {
                Ok(markup) => return Ok(markup),
                Err(e) if is_retryable(&e) && attempts < self.max_attempts => {
                    warn!(
                        "Fetching {} failed (attempt {}/{}): {}",
                        page, attempts, self.max_attempts, e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
