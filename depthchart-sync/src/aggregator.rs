use crate::parser::DepthChartParser;
use crate::traits::PageSource;
use crate::types::{PlayerRecord, Result, RosterSnapshot, TeamPageRef};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Snapshot plus how the scrape went.
#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub snapshot: RosterSnapshot,
    pub pages_total: usize,
    pub pages_failed: usize,
    pub records_scraped: usize,
}

/// Fetches team pages one at a time and folds them into a `RosterSnapshot`.
pub struct SnapshotAggregator {
    source: Arc<dyn PageSource>,
    parser: DepthChartParser,
    request_delay: Duration,
}

impl SnapshotAggregator {
    pub fn new(source: Arc<dyn PageSource>, parser: DepthChartParser, request_delay: Duration) -> Self {
        Self {
            source,
            parser,
            request_delay,
        }
    }

    /// Scrape every page in order. A page that cannot be fetched contributes
    /// zero records; the rest of the run carries on.
    pub async fn build_snapshot(&self, pages: &[TeamPageRef]) -> ScrapeResult {
        let pages_total = pages.len();
        let mut pages_failed = 0;
        let mut all_records = Vec::new();

        info!("Scraping {} team pages", pages_total);

        for (i, page) in pages.iter().enumerate() {
            match self.scrape_page(page).await {
                Ok(records) => all_records.extend(records),
                Err(e) => {
                    pages_failed += 1;
                    error!("Error parsing {}: {}", page.url, e);
                }
            }

            if i + 1 < pages_total && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
        }

        let records_scraped = all_records.len();
        let snapshot = RosterSnapshot::from_records(all_records);

        info!(
            "Scraped {} unique player-position records ({} raw, {}/{} pages failed)",
            snapshot.len(),
            records_scraped,
            pages_failed,
            pages_total
        );

        ScrapeResult {
            snapshot,
            pages_total,
            pages_failed,
            records_scraped,
        }
    }

    async fn scrape_page(&self, page: &TeamPageRef) -> Result<Vec<PlayerRecord>> {
        let html = self.source.fetch_page(&page.url).await?;
        Ok(self.parser.parse_team_page(&html, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::StaticPages;
    use crate::types::Position;

    fn team_page(code: &str, rows: &str) -> String {
        format!(
            r#"<div id="ctl00_phContent_DepWrapper" class="dt-{code}">
                 <table class="table-bordered"><tbody>{rows}</tbody></table>
               </div>"#
        )
    }

    fn page_ref(url: &str) -> TeamPageRef {
        TeamPageRef {
            url: url.to_string(),
            abbrev_hint: None,
        }
    }

    #[tokio::test]
    async fn failed_pages_are_skipped() {
        let pages = StaticPages::new().with_page(
            "https://x.com/depthchart/NE",
            team_page("NE", r#"<tr><td>QB</td><td>10</td><td><a>Drake Maye</a></td></tr>"#),
        );
        let aggregator = SnapshotAggregator::new(Arc::new(pages), DepthChartParser::default(), Duration::ZERO);

        let result = aggregator
            .build_snapshot(&[page_ref("https://x.com/depthchart/MIA"), page_ref("https://x.com/depthchart/NE")])
            .await;

        assert_eq!(result.pages_total, 2);
        assert_eq!(result.pages_failed, 1);
        assert_eq!(
            result.snapshot.records(),
            &[PlayerRecord::new("Drake Maye", "NE", Position::QB, 1)]
        );
    }

    #[tokio::test]
    async fn duplicates_across_pages_collapse() {
        let row = r#"<tr><td>WR</td><td>17</td><td><a>Garrett Wilson</a></td></tr>"#;
        let pages = StaticPages::new()
            .with_page("https://x.com/depthchart/NYJ", team_page("NYJ", row))
            .with_page("https://x.com/depthchart/NYJ/", team_page("NYJ", row));
        let aggregator = SnapshotAggregator::new(Arc::new(pages), DepthChartParser::default(), Duration::ZERO);

        let result = aggregator
            .build_snapshot(&[page_ref("https://x.com/depthchart/NYJ"), page_ref("https://x.com/depthchart/NYJ/")])
            .await;

        assert_eq!(result.records_scraped, 2);
        assert_eq!(result.snapshot.len(), 1);
    }

    #[tokio::test]
    async fn no_pages_means_empty_snapshot() {
        let aggregator = SnapshotAggregator::new(Arc::new(StaticPages::new()), DepthChartParser::default(), Duration::ZERO);

        let result = aggregator.build_snapshot(&[]).await;

        assert!(result.snapshot.is_empty());
        assert_eq!(result.pages_failed, 0);
    }
}
