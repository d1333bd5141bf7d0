use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::Endpoint;
use crate::export::OutputFormat;
use crate::harvest::Harvest;

/// Summary of one harvest run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub endpoint: String,
    pub pages_planned: u64,
    pub pages_fetched: u64,
    pub pages_skipped: u64,
    pub requests: u64,
    pub records: usize,
    pub items_skipped: u64,
    pub columns: Vec<String>,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(
        ep: &Endpoint,
        harvest: &Harvest,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let s = harvest.stats;
        Self {
            endpoint: ep.name.clone(),
            pages_planned: s.pages_planned,
            pages_fetched: s.pages_fetched,
            pages_skipped: s.pages_skipped,
            requests: s.requests,
            records: harvest.results.len(),
            items_skipped: s.items_skipped,
            columns: harvest.results.columns.clone(),
            output: ep.output.path.clone(),
            format: ep.output.format,
            started_at,
            finished_at,
        }
    }
}
