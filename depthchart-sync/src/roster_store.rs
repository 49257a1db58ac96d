use crate::traits::{RosterStore, RosterTransaction};
use crate::types::{Position, Result, SyncError};
use async_trait::async_trait;
use sqlx::{PgPool, Pool, Postgres, Row, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};

/// First key of the two-key advisory lock; the second key is the season id.
const SEASON_LOCK_CLASS: i32 = 0x4443;

/// Roster tables in Postgres.
pub struct PgRosterStore {
    db: Pool<Postgres>,
}

impl PgRosterStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    /// Create `teams`, `players` and `player_seasons` if they are missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        info!("Roster schema is up to date");
        Ok(())
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl RosterStore for PgRosterStore {
    async fn begin(&self, season_id: i32) -> Result<Box<dyn RosterTransaction>> {
        let mut tx = self.db.begin().await?;

        // Blocks until any other run for this season has committed or rolled back.
        // Released automatically when the transaction ends.
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(SEASON_LOCK_CLASS)
            .bind(season_id)
            .execute(&mut *tx)
            .await?;

        debug!("Acquired season lease for season {}", season_id);
        Ok(Box::new(PgRosterTransaction { tx }))
    }
}

pub struct PgRosterTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RosterTransaction for PgRosterTransaction {
    async fn team_id(&mut self, abbreviation: &str) -> Result<Option<i32>> {
        let team_id = sqlx::query_scalar::<_, i32>("SELECT team_id FROM teams WHERE abbreviation = $1")
            .bind(abbreviation)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(team_id)
    }

    async fn find_player(&mut self, player_name: &str, team_id: i32) -> Result<Option<i32>> {
        let player_id = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT player_id FROM players
            WHERE player_name = $1 AND team_id = $2
            ORDER BY player_id
            LIMIT 1
            "#,
        )
        .bind(player_name)
        .bind(team_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(player_id)
    }

    async fn insert_player(&mut self, player_name: &str, position: Position, team_id: i32) -> Result<i32> {
        let player_id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO players (player_name, position, team_id)
            VALUES ($1, $2, $3)
            RETURNING player_id
            "#,
        )
        .bind(player_name)
        .bind(position.as_str())
        .bind(team_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(player_id)
    }

    async fn season_assignments(&mut self, season_id: i32) -> Result<HashMap<i32, u32>> {
        let rows = sqlx::query("SELECT player_id, tier FROM player_seasons WHERE season_id = $1")
            .bind(season_id)
            .fetch_all(&mut *self.tx)
            .await?;

        let mut assignments = HashMap::with_capacity(rows.len());
        for row in rows {
            let player_id: i32 = row.try_get("player_id")?;
            let tier: i32 = row.try_get("tier")?;
            let tier = u32::try_from(tier)
                .map_err(|_| SyncError::Store(format!("Negative tier {} for player {}", tier, player_id)))?;
            assignments.insert(player_id, tier);
        }
        Ok(assignments)
    }

    async fn insert_assignment(&mut self, player_id: i32, season_id: i32, tier: u32) -> Result<()> {
        sqlx::query("INSERT INTO player_seasons (player_id, season_id, tier) VALUES ($1, $2, $3)")
            .bind(player_id)
            .bind(season_id)
            .bind(tier_value(tier)?)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_tier(&mut self, player_id: i32, season_id: i32, tier: u32) -> Result<()> {
        sqlx::query("UPDATE player_seasons SET tier = $1 WHERE player_id = $2 AND season_id = $3")
            .bind(tier_value(tier)?)
            .bind(player_id)
            .bind(season_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_assignments(&mut self, season_id: i32, player_ids: &[i32]) -> Result<u64> {
        if player_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM player_seasons WHERE season_id = $1 AND player_id = ANY($2)")
            .bind(season_id)
            .bind(player_ids.to_vec())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_orphan_players(&mut self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM players p
            WHERE NOT EXISTS (
                SELECT 1 FROM player_seasons ps WHERE ps.player_id = p.player_id
            )
            "#,
        )
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgRosterTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PgRosterTransaction { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

fn tier_value(tier: u32) -> Result<i32> {
    i32::try_from(tier).map_err(|_| SyncError::Store(format!("Tier {} out of range", tier)))
}
