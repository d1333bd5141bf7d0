// src/harvest/mod.rs

use anyhow::{Context, Result};
use chrono::Utc;
use futures::{stream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{BodyFormat, Endpoint, HttpErrorPolicy, ItemLocator, PageCount, Pages};
use crate::export::write_result_set;
use crate::extract::{self, ExtractError, MissingFieldPolicy, ParsedPage, ResultSet};
use crate::fetch::{get_text, PageFetcher};
use crate::report::RunReport;

/// Counters collected over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestStats {
    pub pages_planned: u64,
    pub pages_fetched: u64,
    pub pages_skipped: u64,
    pub requests: u64,
    pub items_skipped: u64,
}

#[derive(Debug)]
pub struct Harvest {
    pub results: ResultSet,
    pub stats: HarvestStats,
}

/// `ceil(total / page_size)`.
pub fn page_count(total: u64, page_size: u64) -> u64 {
    total.div_ceil(page_size)
}

/// Spaces request starts at least `delay` apart across every in-flight page
/// of a run. The first caller goes immediately.
struct Throttle {
    delay: Duration,
    next: Mutex<Option<Instant>>,
}

impl Throttle {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next: Mutex::new(None),
        }
    }

    async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        // held across the sleep so waiters queue up one slot at a time
        let mut next = self.next.lock().await;
        if let Some(at) = *next {
            sleep_until(at).await;
        }
        *next = Some(Instant::now() + self.delay);
    }
}

/// Runs endpoints against a [`PageFetcher`].
pub struct Harvester<F> {
    fetcher: F,
}

impl<F: PageFetcher> Harvester<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch every page of `ep` and collect its records in page order.
    ///
    /// Nothing is written here; on error the partial result set is dropped.
    #[instrument(level = "info", skip_all, fields(endpoint = %ep.name))]
    pub async fn run(&self, ep: &Endpoint) -> Result<Harvest> {
        let requests = AtomicUsize::new(0);
        let throttle = Throttle::new(ep.request_delay);
        let mut stats = HarvestStats::default();
        let mut results = ResultSet::new(ep.columns(), ep.numeric_columns());

        // count-driven endpoints learn their size from the first page,
        // which is then reused instead of fetched twice
        let (planned, first) = match &ep.pages {
            Pages::List(urls) => (urls.len() as u64, None),
            Pages::Template {
                count: PageCount::Fixed(n),
                ..
            } => (*n, None),
            Pages::Template {
                count: PageCount::FromTotal(total),
                page_size,
                ..
            } => {
                // the total is unknown until this page arrives, so a failure
                // here aborts even under `on_http_error: skip`
                let body = self
                    .fetch_page(ep, 0, &throttle, &requests)
                    .await
                    .context("fetching first page")?;
                let parsed = parse_body(ep, &body).context("parsing first page")?;
                let count = parsed
                    .total_count
                    .ok_or_else(|| ExtractError::MissingTotal(total.name.clone()))?;
                // the first page has been fetched either way, even when the
                // total rounds down to nothing
                let pages = page_count(count, *page_size).max(1);
                info!(total = count, pages, "discovered page count");
                (pages, Some(parsed))
            }
        };
        stats.pages_planned = planned;

        let mut next = 0;
        if let Some(parsed) = first {
            absorb(ep, 0, parsed, &mut results, &mut stats)?;
            stats.pages_fetched += 1;
            next = 1;
        }

        let mut pages = stream::iter(next..planned)
            .map(|ordinal| {
                let (throttle, requests) = (&throttle, &requests);
                async move {
                    let body = self.fetch_page(ep, ordinal, throttle, requests).await;
                    (ordinal, body)
                }
            })
            .buffered(ep.concurrency.max(1));

        while let Some((ordinal, outcome)) = pages.next().await {
            match outcome {
                Ok(body) => {
                    let parsed = parse_body(ep, &body)
                        .with_context(|| format!("parsing page {}", ordinal))?;
                    absorb(ep, ordinal, parsed, &mut results, &mut stats)?;
                    stats.pages_fetched += 1;
                }
                Err(e) => match ep.on_http_error {
                    HttpErrorPolicy::Skip => {
                        warn!(page = ordinal, error = %e, "skipping page");
                        stats.pages_skipped += 1;
                    }
                    HttpErrorPolicy::Abort => {
                        error!(page = ordinal, error = %e, "aborting run");
                        return Err(e.context(format!("page {}", ordinal)));
                    }
                },
            }
        }

        stats.requests = requests.load(Ordering::Relaxed) as u64;
        info!(
            records = results.len(),
            pages = stats.pages_fetched,
            skipped = stats.pages_skipped,
            requests = stats.requests,
            "harvest complete"
        );
        Ok(Harvest { results, stats })
    }

    /// Run `ep` and write its artifact to the configured output.
    pub async fn harvest_to_file(&self, ep: &Endpoint) -> Result<RunReport> {
        let started_at = Utc::now();
        let timer = Instant::now();

        let harvest = self.run(ep).await?;
        write_result_set(&harvest.results, &ep.output)
            .with_context(|| format!("writing {}", ep.output.path.display()))?;

        let report = RunReport::new(ep, &harvest, started_at, Utc::now());
        info!(
            output = %ep.output.path.display(),
            records = report.records,
            elapsed = ?timer.elapsed(),
            "wrote artifact"
        );
        Ok(report)
    }

    async fn fetch_page(
        &self,
        ep: &Endpoint,
        ordinal: u64,
        throttle: &Throttle,
        requests: &AtomicUsize,
    ) -> Result<String> {
        let url = ep.page_url(ordinal)?;
        throttle.wait().await;
        debug!(page = ordinal, %url, "fetching");
        get_text(&self.fetcher, &url, &ep.headers, ep.rate_limit_wait, requests).await
    }
}

fn parse_body(ep: &Endpoint, body: &str) -> Result<ParsedPage, ExtractError> {
    let total = match &ep.pages {
        Pages::Template {
            count: PageCount::FromTotal(t),
            ..
        } => Some(t),
        _ => None,
    };
    match (&ep.format, &ep.item) {
        (BodyFormat::Html, ItemLocator::Css(item)) => extract::html::parse_page(
            body,
            item,
            &ep.fields,
            total.and_then(|t| t.selector.as_ref().map(|s| (t.name.as_str(), s))),
        ),
        (_, ItemLocator::Element(item)) => {
            extract::xml::parse_page(body, item, &ep.fields, total.map(|t| t.name.as_str()))
        }
        (BodyFormat::Xml, ItemLocator::Css(_)) => Err(ExtractError::Document(
            "css item locator on an xml endpoint".into(),
        )),
    }
}

/// Move the records of one page into `results`, applying the missing-field policy.
fn absorb(
    ep: &Endpoint,
    ordinal: u64,
    parsed: ParsedPage,
    results: &mut ResultSet,
    stats: &mut HarvestStats,
) -> Result<()> {
    if parsed.items.is_empty() {
        warn!(page = ordinal, "page has no items");
    }
    for item in parsed.items {
        match item {
            Ok(record) => results.records.push(record),
            Err(e) => match ep.on_missing_field {
                MissingFieldPolicy::FailFast => {
                    return Err(anyhow::Error::new(e).context(format!("page {}", ordinal)));
                }
                MissingFieldPolicy::SkipItem => {
                    warn!(page = ordinal, error = %e, "skipping item");
                    stats.items_skipped += 1;
                }
            },
        }
    }
    Ok(())
}
