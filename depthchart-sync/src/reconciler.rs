use crate::traits::{RosterStore, RosterTransaction};
use crate::types::{ReconcileReport, Result, RosterSnapshot, SyncConfig, SyncError, UnresolvedTeamPolicy};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Converges the persisted season onto a snapshot.
///
/// Everything happens in one store transaction: upserts for what was observed,
/// then deletion of assignments nobody observed. Any error rolls back both.
pub struct Reconciler {
    store: Arc<dyn RosterStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RosterStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile(&self, snapshot: &RosterSnapshot, config: &SyncConfig) -> Result<ReconcileReport> {
        let mut tx = self.store.begin(config.season_id).await?;

        match apply_snapshot(tx.as_mut(), snapshot, config).await {
            Ok(report) => {
                tx.commit().await?;
                info!(
                    "Season {} reconciled: {} players created, {} assignments created, {} updated, {} unchanged, {} removed, {} players deleted, {} records skipped",
                    report.season_id,
                    report.players_created,
                    report.assignments_created,
                    report.assignments_updated,
                    report.assignments_unchanged,
                    report.assignments_deleted,
                    report.players_deleted,
                    report.records_skipped,
                );
                Ok(report)
            }
            Err(e) => {
                warn!("Reconciliation for season {} failed, rolling back: {}", config.season_id, e);
                if let Err(rollback_error) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }
}

async fn apply_snapshot(
    tx: &mut dyn RosterTransaction,
    snapshot: &RosterSnapshot,
    config: &SyncConfig,
) -> Result<ReconcileReport> {
    let season_id = config.season_id;
    let mut report = ReconcileReport {
        season_id,
        ..Default::default()
    };

    // Assignments as they stood before this run; the lease keeps them stable.
    let existing = tx.season_assignments(season_id).await?;

    let mut team_ids: HashMap<&str, Option<i32>> = HashMap::new();
    let mut player_ids: HashMap<(&str, i32), i32> = HashMap::new();
    let mut observed: HashMap<i32, u32> = HashMap::new();
    let mut observed_order: Vec<i32> = Vec::new();

    // Phase 1: resolve every record to a player, creating players as needed.
    for record in snapshot {
        let team_id = match team_ids.get(record.team_abbrev.as_str()) {
            Some(cached) => *cached,
            None => {
                let resolved = tx.team_id(&record.team_abbrev).await?;
                team_ids.insert(record.team_abbrev.as_str(), resolved);
                resolved
            }
        };

        let Some(team_id) = team_id else {
            match config.unresolved_team_policy {
                UnresolvedTeamPolicy::Skip => {
                    warn!(
                        "Skipping {} ({} {}): no team with abbreviation {:?}",
                        record.player_name, record.position, record.tier, record.team_abbrev
                    );
                    report.records_skipped += 1;
                    continue;
                }
                UnresolvedTeamPolicy::Fail => {
                    return Err(SyncError::Resolution {
                        team_abbrev: record.team_abbrev.clone(),
                    });
                }
            }
        };

        let key = (record.player_name.as_str(), team_id);
        let player_id = match player_ids.get(&key) {
            Some(id) => *id,
            None => {
                let id = match tx.find_player(&record.player_name, team_id).await? {
                    Some(id) => id,
                    None => {
                        let id = tx.insert_player(&record.player_name, record.position, team_id).await?;
                        debug!("Created player {} ({}) as {}", record.player_name, record.team_abbrev, id);
                        report.players_created += 1;
                        id
                    }
                };
                player_ids.insert(key, id);
                id
            }
        };

        // A player listed more than once keeps the last tier seen.
        if observed.insert(player_id, record.tier).is_none() {
            observed_order.push(player_id);
        }
    }

    for player_id in &observed_order {
        let tier = observed[player_id];
        match existing.get(player_id) {
            Some(current) if *current == tier => report.assignments_unchanged += 1,
            Some(_) => {
                tx.update_tier(*player_id, season_id, tier).await?;
                report.assignments_updated += 1;
            }
            None => {
                tx.insert_assignment(*player_id, season_id, tier).await?;
                report.assignments_created += 1;
            }
        }
    }

    // Phase 2: drop assignments that were not observed this run.
    let touched: HashSet<i32> = observed.keys().copied().collect();
    let mut stale: Vec<i32> = existing
        .keys()
        .filter(|player_id| !touched.contains(player_id))
        .copied()
        .collect();
    stale.sort_unstable();

    if stale.is_empty() {
        info!("No players to remove from season {}", season_id);
    } else {
        info!("Removing {} players from season {}", stale.len(), season_id);
        report.assignments_deleted = tx.delete_assignments(season_id, &stale).await?;

        if config.delete_orphan_players {
            report.players_deleted = tx.delete_orphan_players().await?;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::{FailPoint, MemoryRosterStore, RosterTables};
    use crate::types::{PlayerRecord, Position};
    use std::time::Duration;

    fn config(season_id: i32) -> SyncConfig {
        SyncConfig::for_season(season_id)
    }

    fn snapshot(records: Vec<PlayerRecord>) -> RosterSnapshot {
        RosterSnapshot::from_records(records)
    }

    fn teams() -> RosterTables {
        RosterTables::with_teams(&[(1, "NE"), (2, "NYJ")])
    }

    #[tokio::test]
    async fn empty_store_gets_players_and_assignments() {
        let store = Arc::new(MemoryRosterStore::new(teams()));
        let reconciler = Reconciler::new(store.clone());

        let report = reconciler
            .reconcile(
                &snapshot(vec![
                    PlayerRecord::new("Smith", "NE", Position::QB, 1),
                    PlayerRecord::new("Jones", "NYJ", Position::WR, 1),
                ]),
                &config(5),
            )
            .await
            .unwrap();

        assert_eq!(report.players_created, 2);
        assert_eq!(report.assignments_created, 2);
        assert_eq!(report.assignments_deleted, 0);
        assert_eq!(report.players_deleted, 0);

        let tables = store.tables().await;
        let smith = tables.player_id("Smith", 1).unwrap();
        assert_eq!(tables.players[&smith].position, Position::QB);
        assert_eq!(tables.tier(smith, 5), Some(1));
        assert_eq!(tables.season_size(5), 2);
    }

    #[tokio::test]
    async fn same_snapshot_twice_changes_nothing() {
        let store = Arc::new(MemoryRosterStore::new(teams()));
        let reconciler = Reconciler::new(store.clone());
        let snap = snapshot(vec![
            PlayerRecord::new("Smith", "NE", Position::QB, 1),
            PlayerRecord::new("Smith", "NE", Position::QB, 3),
            PlayerRecord::new("Jones", "NYJ", Position::WR, 2),
        ]);

        reconciler.reconcile(&snap, &config(1)).await.unwrap();
        let after_first = store.tables().await;

        let second = reconciler.reconcile(&snap, &config(1)).await.unwrap();

        assert!(second.is_noop(), "{:?}", second);
        assert_eq!(second.assignments_unchanged, 2);
        assert_eq!(store.tables().await, after_first);
    }

    #[tokio::test]
    async fn stale_assignments_and_orphans_are_removed() {
        let mut tables = teams();
        let a = tables.add_player("Alpha", Position::QB, 1);
        let b = tables.add_player("Bravo", Position::RB, 1);
        let c = tables.add_player("Charlie", Position::TE, 2);
        tables.set_assignment(a, 1, 1);
        tables.set_assignment(b, 1, 1);
        tables.set_assignment(c, 1, 2);
        let store = Arc::new(MemoryRosterStore::new(tables));

        let report = Reconciler::new(store.clone())
            .reconcile(
                &snapshot(vec![
                    PlayerRecord::new("Alpha", "NE", Position::QB, 2),
                    PlayerRecord::new("Charlie", "NYJ", Position::TE, 1),
                ]),
                &config(1),
            )
            .await
            .unwrap();

        assert_eq!(report.assignments_updated, 2);
        assert_eq!(report.assignments_deleted, 1);
        assert_eq!(report.players_deleted, 1);

        let tables = store.tables().await;
        assert_eq!(tables.tier(a, 1), Some(2));
        assert_eq!(tables.tier(c, 1), Some(1));
        assert_eq!(tables.tier(b, 1), None);
        assert!(!tables.players.contains_key(&b));
    }

    #[tokio::test]
    async fn players_with_other_seasons_survive_pruning() {
        let mut tables = teams();
        let b = tables.add_player("Bravo", Position::RB, 1);
        tables.set_assignment(b, 1, 1);
        tables.set_assignment(b, 0, 1);
        let store = Arc::new(MemoryRosterStore::new(tables));

        let report = Reconciler::new(store.clone())
            .reconcile(&RosterSnapshot::default(), &config(1))
            .await
            .unwrap();

        assert_eq!(report.assignments_deleted, 1);
        assert_eq!(report.players_deleted, 0);
        let tables = store.tables().await;
        assert_eq!(tables.tier(b, 0), Some(1));
        assert!(tables.players.contains_key(&b));
    }

    #[tokio::test]
    async fn orphan_deletion_can_be_disabled() {
        let mut tables = teams();
        let b = tables.add_player("Bravo", Position::RB, 1);
        tables.set_assignment(b, 1, 1);
        let store = Arc::new(MemoryRosterStore::new(tables));
        let mut cfg = config(1);
        cfg.delete_orphan_players = false;

        let report = Reconciler::new(store.clone())
            .reconcile(&RosterSnapshot::default(), &cfg)
            .await
            .unwrap();

        assert_eq!(report.assignments_deleted, 1);
        assert_eq!(report.players_deleted, 0);
        assert!(store.tables().await.players.contains_key(&b));
    }

    #[tokio::test]
    async fn other_seasons_are_untouched() {
        let mut tables = teams();
        let a = tables.add_player("Alpha", Position::QB, 1);
        tables.set_assignment(a, 2, 4);
        let store = Arc::new(MemoryRosterStore::new(tables));

        Reconciler::new(store.clone())
            .reconcile(&snapshot(vec![PlayerRecord::new("Alpha", "NE", Position::QB, 1)]), &config(1))
            .await
            .unwrap();

        let tables = store.tables().await;
        assert_eq!(tables.tier(a, 1), Some(1));
        assert_eq!(tables.tier(a, 2), Some(4));
    }

    #[tokio::test]
    async fn unknown_team_is_skipped_by_default() {
        let store = Arc::new(MemoryRosterStore::new(teams()));

        let report = Reconciler::new(store.clone())
            .reconcile(
                &snapshot(vec![
                    PlayerRecord::new("Ghost", "XXX", Position::QB, 1),
                    PlayerRecord::new("Smith", "NE", Position::QB, 1),
                ]),
                &config(1),
            )
            .await
            .unwrap();

        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.players_created, 1);
        assert_eq!(store.tables().await.players.len(), 1);
    }

    #[tokio::test]
    async fn unknown_team_can_fail_the_run() {
        let store = Arc::new(MemoryRosterStore::new(teams()));
        let mut cfg = config(1);
        cfg.unresolved_team_policy = UnresolvedTeamPolicy::Fail;

        let result = Reconciler::new(store.clone())
            .reconcile(
                &snapshot(vec![
                    PlayerRecord::new("Smith", "NE", Position::QB, 1),
                    PlayerRecord::new("Ghost", "XXX", Position::QB, 1),
                ]),
                &cfg,
            )
            .await;

        assert!(matches!(result, Err(SyncError::Resolution { ref team_abbrev }) if team_abbrev == "XXX"));
        assert_eq!(store.tables().await, teams());
    }

    #[tokio::test]
    async fn persistence_failure_rolls_back_both_phases() {
        let mut tables = teams();
        let a = tables.add_player("Alpha", Position::QB, 1);
        let b = tables.add_player("Bravo", Position::RB, 1);
        tables.set_assignment(a, 1, 3);
        tables.set_assignment(b, 1, 1);
        let before = tables.clone();
        let store = Arc::new(MemoryRosterStore::new(tables).failing_at(FailPoint::DeleteOrphans));

        let result = Reconciler::new(store.clone())
            .reconcile(
                &snapshot(vec![
                    PlayerRecord::new("Alpha", "NE", Position::QB, 1),
                    PlayerRecord::new("Newbie", "NYJ", Position::WR, 1),
                ]),
                &config(1),
            )
            .await;

        let err = result.unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(store.tables().await, before);
    }

    #[tokio::test]
    async fn commit_failure_leaves_store_unchanged() {
        let store = Arc::new(MemoryRosterStore::new(teams()).failing_at(FailPoint::Commit));

        let result = Reconciler::new(store.clone())
            .reconcile(&snapshot(vec![PlayerRecord::new("Smith", "NE", Position::QB, 1)]), &config(1))
            .await;

        assert!(result.is_err());
        assert_eq!(store.tables().await, teams());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn season_lease_blocks_a_second_transaction_until_commit() {
        let store = Arc::new(MemoryRosterStore::new(teams()));
        let first = store.begin(1).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(100), store.begin(1)).await;
        assert!(blocked.is_err(), "second begin returned while the first was open");

        let contender = {
            let store = store.clone();
            tokio::spawn(async move { store.begin(1).await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        first.commit().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), contender)
            .await
            .expect("lease released on commit")
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn season_lease_is_released_on_rollback() {
        let store = Arc::new(MemoryRosterStore::new(teams()));
        let first = store.begin(1).await.unwrap();
        first.rollback().await.unwrap();

        let second = tokio::time::timeout(Duration::from_secs(5), store.begin(1)).await;
        assert!(second.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_runs_for_one_season_apply_one_after_the_other() {
        let store = Arc::new(MemoryRosterStore::new(teams()));

        let run = |name: &'static str| {
            let reconciler = Reconciler::new(store.clone());
            let snap = snapshot(vec![PlayerRecord::new(name, "NE", Position::QB, 1)]);
            tokio::spawn(async move { reconciler.reconcile(&snap, &config(1)).await })
        };
        let (alpha, bravo) = tokio::join!(run("Alpha"), run("Bravo"));
        let alpha = alpha.unwrap().unwrap();
        let bravo = bravo.unwrap().unwrap();

        // The run that went second saw the first one's player and removed it.
        assert_eq!(alpha.assignments_deleted + bravo.assignments_deleted, 1);
        let (later, survivor) = if alpha.assignments_deleted == 1 {
            (&alpha, "Alpha")
        } else {
            (&bravo, "Bravo")
        };
        assert_eq!(later.players_deleted, 1);

        let tables = store.tables().await;
        assert_eq!(tables.players.len(), 1);
        assert_eq!(tables.season_size(1), 1);
        let id = tables.player_id(survivor, 1).unwrap();
        assert_eq!(tables.tier(id, 1), Some(1));
    }
}
