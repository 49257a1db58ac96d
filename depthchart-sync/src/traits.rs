use crate::types::{Position, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// Anything that can hand back the HTML for an absolute URL.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

/// Durable roster state (`teams`, `players`, `player_seasons`).
#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Open a transaction that holds the exclusive lease for `season_id`
    /// until it is committed, rolled back or dropped.
    async fn begin(&self, season_id: i32) -> Result<Box<dyn RosterTransaction>>;
}

/// A unit of work against the roster tables.
///
/// Nothing written through a transaction is visible to other readers until
/// `commit` returns. Dropping the transaction discards its writes.
#[async_trait]
pub trait RosterTransaction: Send {
    async fn team_id(&mut self, abbreviation: &str) -> Result<Option<i32>>;

    async fn find_player(&mut self, player_name: &str, team_id: i32) -> Result<Option<i32>>;

    async fn insert_player(&mut self, player_name: &str, position: Position, team_id: i32) -> Result<i32>;

    /// player_id -> tier for every assignment currently in the season.
    async fn season_assignments(&mut self, season_id: i32) -> Result<HashMap<i32, u32>>;

    async fn insert_assignment(&mut self, player_id: i32, season_id: i32, tier: u32) -> Result<()>;

    async fn update_tier(&mut self, player_id: i32, season_id: i32, tier: u32) -> Result<()>;

    async fn delete_assignments(&mut self, season_id: i32, player_ids: &[i32]) -> Result<u64>;

    /// Remove players that no longer hold an assignment in any season.
    async fn delete_orphan_players(&mut self) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
