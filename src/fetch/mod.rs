// src/fetch/mod.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("GET {url}: HTTP {status}")]
    Status { url: String, status: StatusCode },
}

/// Raw response of one GET.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub body: String,
}

/// Anything that can GET a page. Non-2xx responses are returned, not raised;
/// only transport failures are errors.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &Url, headers: &[(String, String)]) -> Result<FetchedPage>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get(&self, url: &Url, headers: &[(String, String)]) -> Result<FetchedPage> {
        debug!(%url, "GET");
        let mut req = self.client.get(url.clone());
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("reading body from {}", url))?;
        Ok(FetchedPage { status, body })
    }
}

/// GET `url`, and on HTTP 429 wait `rate_limit_wait` and try exactly once
/// more. Any non-2xx after that is a [`FetchError::Status`].
///
/// `requests` is bumped once per request actually sent.
pub async fn get_text<F: PageFetcher + ?Sized>(
    fetcher: &F,
    url: &Url,
    headers: &[(String, String)],
    rate_limit_wait: Duration,
    requests: &AtomicUsize,
) -> Result<String> {
    requests.fetch_add(1, Ordering::Relaxed);
    let mut page = fetcher.get(url, headers).await?;

    if page.status == StatusCode::TOO_MANY_REQUESTS {
        warn!(
            %url,
            wait_ms = rate_limit_wait.as_millis() as u64,
            "rate limited, waiting before retry"
        );
        sleep(rate_limit_wait).await;
        requests.fetch_add(1, Ordering::Relaxed);
        page = fetcher.get(url, headers).await?;
    }

    if !page.status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: page.status,
        }
        .into());
    }
    Ok(page.body)
}
