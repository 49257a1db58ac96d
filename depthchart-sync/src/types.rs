use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Canonical depth chart positions tracked by the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Position {
    QB,
    WR,
    RB,
    TE,
}

impl Position {
    pub const ALL: [Position; 4] = [Position::QB, Position::WR, Position::RB, Position::TE];

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::QB => "QB",
            Position::WR => "WR",
            Position::RB => "RB",
            Position::TE => "TE",
        }
    }

    /// Map a raw row label from a team page onto a canonical position.
    /// Receiver variants collapse to WR; anything else is not tracked.
    /// Labels are matched as printed, so "qb" is not a quarterback row.
    pub fn normalize(raw: &str) -> Option<Position> {
        match raw.trim() {
            "LWR" | "RWR" | "SWR" => Some(Position::WR),
            other => other.parse().ok(),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QB" => Ok(Position::QB),
            "WR" => Ok(Position::WR),
            "RB" => Ok(Position::RB),
            "TE" => Ok(Position::TE),
            other => Err(SyncError::Parse(format!("Unknown position: {}", other))),
        }
    }
}

/// A team page found on the index page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamPageRef {
    pub url: String,
    pub abbrev_hint: Option<String>,
}

/// One observed (player, team, position, tier) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub player_name: String,
    pub team_abbrev: String,
    pub position: Position,
    pub tier: u32,
}

impl PlayerRecord {
    pub fn new(player_name: impl Into<String>, team_abbrev: impl Into<String>, position: Position, tier: u32) -> Self {
        Self {
            player_name: player_name.into(),
            team_abbrev: team_abbrev.into(),
            position,
            tier,
        }
    }
}

/// Deduplicated result of one scrape cycle. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RosterSnapshot {
    records: Vec<PlayerRecord>,
}

impl RosterSnapshot {
    /// Keeps the first occurrence of every exact tuple, in input order.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = PlayerRecord>,
    {
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|record| seen.insert(record.clone()))
            .collect();
        Self { records }
    }

    pub fn records(&self) -> &[PlayerRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a RosterSnapshot {
    type Item = &'a PlayerRecord;
    type IntoIter = std::slice::Iter<'a, PlayerRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// What to do with a record whose team abbreviation has no row in `teams`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnresolvedTeamPolicy {
    /// Log, count the record as skipped, keep going.
    #[default]
    Skip,
    /// Abort the run and roll back.
    Fail,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub season_id: i32,
    pub target_positions: BTreeSet<Position>,
    pub delete_orphan_players: bool,
    pub request_delay: Duration,
    pub base_url: String,
    pub index_path: String,
    pub team_path_prefix: String,
    pub unresolved_team_policy: UnresolvedTeamPolicy,
}

impl SyncConfig {
    pub fn for_season(season_id: i32) -> Self {
        Self {
            season_id,
            ..Default::default()
        }
    }

    pub fn index_url(&self) -> Result<url::Url> {
        Ok(url::Url::parse(&self.base_url)?.join(&self.index_path)?)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            season_id: 1,
            target_positions: Position::ALL.into_iter().collect(),
            delete_orphan_players: true,
            request_delay: Duration::from_secs(1),
            base_url: "https://www.ourlads.com".to_string(),
            index_path: "/nfldepthcharts/depthcharts.aspx".to_string(),
            team_path_prefix: "/nfldepthcharts/depthchart/".to_string(),
            unresolved_team_policy: UnresolvedTeamPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; depthchart-sync/0.1)".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 2,
            max_redirects: 5,
        }
    }
}

/// Row counts produced by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub season_id: i32,
    pub players_created: u64,
    pub assignments_created: u64,
    pub assignments_updated: u64,
    pub assignments_unchanged: u64,
    pub assignments_deleted: u64,
    pub players_deleted: u64,
    pub records_skipped: u64,
}

impl ReconcileReport {
    /// Rows inserted, updated or deleted.
    pub fn rows_written(&self) -> u64 {
        self.players_created
            + self.assignments_created
            + self.assignments_updated
            + self.assignments_deleted
            + self.players_deleted
    }

    /// True when the run wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.rows_written() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub team_pages: usize,
    pub pages_failed: usize,
    pub records_scraped: usize,
    pub snapshot_size: usize,
    pub report: ReconcileReport,
}

impl SyncSummary {
    pub fn message(&self) -> String {
        let r = &self.report;
        format!(
            "Players table updated for season {}: {} records from {} team pages ({} failed); \
             {} players created, {} assignments created, {} updated, {} removed, {} players deleted, {} skipped",
            r.season_id,
            self.snapshot_size,
            self.team_pages,
            self.pages_failed,
            r.players_created,
            r.assignments_created,
            r.assignments_updated,
            r.assignments_deleted,
            r.players_deleted,
            r.records_skipped,
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("No team found for abbreviation {team_abbrev}")]
    Resolution { team_abbrev: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("General error: {0}")]
    General(String),
}

impl SyncError {
    pub fn is_persistence(&self) -> bool {
        matches!(self, SyncError::Database(_) | SyncError::Migration(_) | SyncError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
