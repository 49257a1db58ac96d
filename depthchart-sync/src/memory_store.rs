use crate::traits::{RosterStore, RosterTransaction};
use crate::types::{Position, Result, SyncError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRow {
    pub player_name: String,
    pub position: Position,
    pub team_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonRow {
    pub player_id: i32,
    pub season_id: i32,
    pub tier: u32,
}

/// The three roster tables, keyed by surrogate id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterTables {
    pub teams: BTreeMap<i32, String>,
    pub players: BTreeMap<i32, PlayerRow>,
    pub player_seasons: BTreeMap<i32, SeasonRow>,
    next_player_id: i32,
    next_player_season_id: i32,
}

impl RosterTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_teams(teams: &[(i32, &str)]) -> Self {
        let mut tables = Self::new();
        for (team_id, abbreviation) in teams {
            tables.teams.insert(*team_id, abbreviation.to_string());
        }
        tables
    }

    pub fn add_player(&mut self, player_name: &str, position: Position, team_id: i32) -> i32 {
        self.next_player_id += 1;
        let player_id = self.next_player_id;
        self.players.insert(
            player_id,
            PlayerRow {
                player_name: player_name.to_string(),
                position,
                team_id,
            },
        );
        player_id
    }

    /// Insert or overwrite the (player, season) assignment.
    pub fn set_assignment(&mut self, player_id: i32, season_id: i32, tier: u32) {
        if let Some(row) = self
            .player_seasons
            .values_mut()
            .find(|row| row.player_id == player_id && row.season_id == season_id)
        {
            row.tier = tier;
            return;
        }

        self.next_player_season_id += 1;
        self.player_seasons.insert(
            self.next_player_season_id,
            SeasonRow {
                player_id,
                season_id,
                tier,
            },
        );
    }

    pub fn team_id(&self, abbreviation: &str) -> Option<i32> {
        self.teams
            .iter()
            .find(|(_, abbr)| abbr.as_str() == abbreviation)
            .map(|(id, _)| *id)
    }

    pub fn player_id(&self, player_name: &str, team_id: i32) -> Option<i32> {
        self.players
            .iter()
            .find(|(_, p)| p.player_name == player_name && p.team_id == team_id)
            .map(|(id, _)| *id)
    }

    pub fn tier(&self, player_id: i32, season_id: i32) -> Option<u32> {
        self.player_seasons
            .values()
            .find(|row| row.player_id == player_id && row.season_id == season_id)
            .map(|row| row.tier)
    }

    pub fn season_size(&self, season_id: i32) -> usize {
        self.player_seasons
            .values()
            .filter(|row| row.season_id == season_id)
            .count()
    }
}

/// Operations a `MemoryRosterStore` can be told to fail, for exercising rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    InsertPlayer,
    InsertAssignment,
    UpdateTier,
    DeleteAssignments,
    DeleteOrphans,
    Commit,
}

/// In-process roster store.
///
/// A transaction takes the table lock for its whole life (which also makes it
/// the season lease), works on a private copy and swaps it in on commit.
#[derive(Clone, Default)]
pub struct MemoryRosterStore {
    tables: Arc<Mutex<RosterTables>>,
    fail_at: Option<FailPoint>,
}

impl MemoryRosterStore {
    pub fn new(tables: RosterTables) -> Self {
        Self {
            tables: Arc::new(Mutex::new(tables)),
            fail_at: None,
        }
    }

    pub fn failing_at(mut self, fail_at: FailPoint) -> Self {
        self.fail_at = Some(fail_at);
        self
    }

    /// Copy of the committed state.
    pub async fn tables(&self) -> RosterTables {
        self.tables.lock().await.clone()
    }
}

#[async_trait]
impl RosterStore for MemoryRosterStore {
    async fn begin(&self, _season_id: i32) -> Result<Box<dyn RosterTransaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryRosterTransaction {
            guard,
            working,
            fail_at: self.fail_at,
        }))
    }
}

pub struct MemoryRosterTransaction {
    guard: OwnedMutexGuard<RosterTables>,
    working: RosterTables,
    fail_at: Option<FailPoint>,
}

impl MemoryRosterTransaction {
    fn check(&self, point: FailPoint) -> Result<()> {
        if self.fail_at == Some(point) {
            return Err(SyncError::Store(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }
}

#[async_trait]
impl RosterTransaction for MemoryRosterTransaction {
    async fn team_id(&mut self, abbreviation: &str) -> Result<Option<i32>> {
        Ok(self.working.team_id(abbreviation))
    }

    async fn find_player(&mut self, player_name: &str, team_id: i32) -> Result<Option<i32>> {
        Ok(self.working.player_id(player_name, team_id))
    }

    async fn insert_player(&mut self, player_name: &str, position: Position, team_id: i32) -> Result<i32> {
        self.check(FailPoint::InsertPlayer)?;
        if !self.working.teams.contains_key(&team_id) {
            return Err(SyncError::Store(format!("team {} does not exist", team_id)));
        }
        Ok(self.working.add_player(player_name, position, team_id))
    }

    async fn season_assignments(&mut self, season_id: i32) -> Result<HashMap<i32, u32>> {
        Ok(self
            .working
            .player_seasons
            .values()
            .filter(|row| row.season_id == season_id)
            .map(|row| (row.player_id, row.tier))
            .collect())
    }

    async fn insert_assignment(&mut self, player_id: i32, season_id: i32, tier: u32) -> Result<()> {
        self.check(FailPoint::InsertAssignment)?;
        if self.working.tier(player_id, season_id).is_some() {
            return Err(SyncError::Store(format!(
                "duplicate assignment for player {} in season {}",
                player_id, season_id
            )));
        }
        self.working.set_assignment(player_id, season_id, tier);
        Ok(())
    }

    async fn update_tier(&mut self, player_id: i32, season_id: i32, tier: u32) -> Result<()> {
        self.check(FailPoint::UpdateTier)?;
        self.working.set_assignment(player_id, season_id, tier);
        Ok(())
    }

    async fn delete_assignments(&mut self, season_id: i32, player_ids: &[i32]) -> Result<u64> {
        self.check(FailPoint::DeleteAssignments)?;
        let before = self.working.player_seasons.len();
        self.working
            .player_seasons
            .retain(|_, row| !(row.season_id == season_id && player_ids.contains(&row.player_id)));
        Ok((before - self.working.player_seasons.len()) as u64)
    }

    async fn delete_orphan_players(&mut self) -> Result<u64> {
        self.check(FailPoint::DeleteOrphans)?;
        let RosterTables {
            players,
            player_seasons,
            ..
        } = &mut self.working;
        let before = players.len();
        players.retain(|player_id, _| player_seasons.values().any(|row| row.player_id == *player_id));
        Ok((before - players.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.check(FailPoint::Commit)?;
        let MemoryRosterTransaction { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
