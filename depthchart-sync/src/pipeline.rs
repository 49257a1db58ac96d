use crate::aggregator::{ScrapeResult, SnapshotAggregator};
use crate::discovery::discover_team_links;
use crate::parser::DepthChartParser;
use crate::reconciler::Reconciler;
use crate::traits::{PageSource, RosterStore};
use crate::types::{Result, SyncConfig, SyncError, SyncSummary};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use interfaces::{Job, JobOutcome};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const JOB_NAME: &str = "update_players_depthchart";

/// Scrape -> parse -> aggregate -> reconcile, for one season.
pub struct DepthChartSync {
    source: Arc<dyn PageSource>,
    store: Arc<dyn RosterStore>,
    config: SyncConfig,
}

impl DepthChartSync {
    pub fn new(source: Arc<dyn PageSource>, store: Arc<dyn RosterStore>, config: SyncConfig) -> Self {
        Self { source, store, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Discover team pages and build the snapshot without touching the store.
    ///
    /// An index with no team links, or a crawl where every team page failed,
    /// is an error rather than an empty snapshot: reconciling an empty snapshot
    /// would delete the whole season.
    pub async fn scrape(&self) -> Result<ScrapeResult> {
        let index_url = self.config.index_url()?;
        info!("Fetching depth chart index {}", index_url);

        // No index, no teams: this is the one fetch that fails the run.
        let index_html = self.source.fetch_page(index_url.as_str()).await?;
        let team_pages = discover_team_links(&index_html, index_url.as_str(), &self.config.team_path_prefix)?;
        if team_pages.is_empty() {
            return Err(SyncError::Parse(format!(
                "No team links under {} on {}",
                self.config.team_path_prefix, index_url
            )));
        }

        let aggregator = SnapshotAggregator::new(
            self.source.clone(),
            DepthChartParser::new(self.config.target_positions.clone()),
            self.config.request_delay,
        );
        let result = aggregator.build_snapshot(&team_pages).await;

        if result.pages_failed == result.pages_total {
            return Err(SyncError::General(format!(
                "All {} team pages failed to load",
                result.pages_total
            )));
        }

        Ok(result)
    }

    /// Full run. Store writes are committed before this returns `Ok`.
    pub async fn sync(&self) -> Result<SyncSummary> {
        let started_at = Utc::now();

        let scrape = self.scrape().await?;
        if scrape.snapshot.is_empty() {
            warn!("Snapshot is empty; every assignment in season {} will be removed", self.config.season_id);
        }

        let report = Reconciler::new(self.store.clone())
            .reconcile(&scrape.snapshot, &self.config)
            .await?;

        Ok(SyncSummary {
            started_at,
            finished_at: Utc::now(),
            team_pages: scrape.pages_total,
            pages_failed: scrape.pages_failed,
            records_scraped: scrape.records_scraped,
            snapshot_size: scrape.snapshot.len(),
            report,
        })
    }

    /// Run and fold every failure, panics included, into an error outcome.
    pub async fn execute(&self) -> JobOutcome {
        match AssertUnwindSafe(self.sync()).catch_unwind().await {
            Ok(Ok(summary)) => {
                info!("Database synchronization complete");
                JobOutcome::success(summary.message())
            }
            Ok(Err(e)) => {
                error!("Depth chart sync for season {} failed: {}", self.config.season_id, e);
                JobOutcome::error(e.to_string())
            }
            Err(_) => {
                error!("Depth chart sync for season {} panicked", self.config.season_id);
                JobOutcome::error("depth chart sync panicked")
            }
        }
    }
}

#[async_trait]
impl Job for DepthChartSync {
    fn job_name(&self) -> String {
        JOB_NAME.to_string()
    }

    async fn run(&self) -> JobOutcome {
        self.execute().await
    }
}
