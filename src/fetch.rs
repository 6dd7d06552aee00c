use std::thread;
use std::time::Duration;

use rand::Rng;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use tracing::{debug, warn};
use url::Url;

use crate::config::FetchSettings;
use crate::domain::Document;
use crate::error::HarvestError;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Source of documents for the resolver and the extractor.
///
/// Implementations are owned by a single worker, so they need to be `Send`
/// but not `Sync`.
pub trait Fetcher: Send {
    fn fetch(&self, url: &str) -> Result<Document, HarvestError>;
}

impl<F: Fetcher + Sync> Fetcher for &F {
    fn fetch(&self, url: &str) -> Result<Document, HarvestError> {
        (**self).fetch(url)
    }
}

/// Blocking HTTP client with browser-like headers, retry on transient
/// statuses, and a randomized pause after every request.
pub struct HttpFetcher {
    client: Client,
    settings: FetchSettings,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&settings.user_agent)?);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(ACCEPT_LANGUAGE, header_value(&settings.accept_language)?);
        headers.insert(REFERER, header_value(&settings.referer)?);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| HarvestError::Http {
                url: settings.referer.clone(),
                message: err.to_string(),
            })?;

        Ok(Self { client, settings })
    }

    fn fetch_once(&self, url: &str) -> Result<Document, HarvestError> {
        let parsed = Url::parse(url).map_err(|err| HarvestError::InvalidUrl {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        let response = self.send_with_retries(url, || self.client.get(parsed.clone()))?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(HarvestError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }
        let body = response.text().map_err(|err| HarvestError::Http {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        debug!(url, status, bytes = body.len(), "fetched");
        Ok(Document::new(url, body))
    }

    fn send_with_retries<F>(&self, url: &str, mut make_req: F) -> Result<Response, HarvestError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.settings.max_retries && is_retryable_status(status) {
                        let delay = self.backoff(attempt);
                        warn!(url, status, attempt = attempt + 1, ?delay, "retrying");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.settings.max_retries && err.is_timeout() {
                        let delay = self.backoff(attempt);
                        warn!(url, attempt = attempt + 1, ?delay, "request timed out, retrying");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Err(HarvestError::Http {
                        url: url.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.settings
            .backoff_base
            .saturating_mul(1u32 << attempt.min(16))
    }

    fn pause(&self) {
        let min = self.settings.delay_min.as_millis() as u64;
        let max = self.settings.delay_max.as_millis() as u64;
        if max == 0 {
            return;
        }
        let millis = rand::rng().random_range(min..=max);
        thread::sleep(Duration::from_millis(millis));
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Document, HarvestError> {
        let result = self.fetch_once(url);
        self.pause();
        result
    }
}

fn header_value(value: &str) -> Result<HeaderValue, HarvestError> {
    HeaderValue::from_str(value)
        .map_err(|err| HarvestError::InvalidConfig(format!("header value {value:?}: {err}")))
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
