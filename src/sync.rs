//! Fetch-and-reconcile pipelines.
//!
//! Ties the API client, the reconciliation engine and the store together:
//! league-group sync, war-log batch sync, current-war sync, roster refresh.
//! Batch operations never abort on a single member — every tag gets an
//! explicit per-item outcome so a skip is distinguishable from an empty
//! success.
//!
//! Concurrency contract: callers must not reconcile the same clan or group
//! concurrently; concurrent pipelines over unrelated tags are fine (the only
//! shared state is the rate limiter and the counters).

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use std::fmt;
use tracing::{debug, info, warn};

use crate::models::{Config, GraphError, LeagueGroup, War, WarOrigin, WarState};
use crate::reconcile::{self, GroupPhase, ReconcileStats};
use crate::scrapers::{CocApiClient, FetchError};
use crate::storage::{self, Store};
use crate::tags::fmt_tag;

/// Per-item result of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { count: usize },
    /// The tag does not resolve to an active league right now.
    SkippedNotInLeague,
    /// The clan's war log is private.
    SkippedPrivate,
    /// Offline mode with no captured document.
    SkippedNoData,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<(String, SyncOutcome)>,
}

impl BatchReport {
    fn push(&mut self, tag: impl Into<String>, outcome: SyncOutcome) {
        self.items.push((tag.into(), outcome));
    }

    pub fn synced(&self) -> usize {
        self.items
            .iter()
            .filter(|(_, o)| matches!(o, SyncOutcome::Synced { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.items
            .iter()
            .filter(|(_, o)| {
                matches!(
                    o,
                    SyncOutcome::SkippedNotInLeague
                        | SyncOutcome::SkippedPrivate
                        | SyncOutcome::SkippedNoData
                )
            })
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|(_, o)| matches!(o, SyncOutcome::Failed(_)))
            .count()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} synced, {} skipped, {} failed",
            self.synced(),
            self.skipped(),
            self.failed()
        )
    }
}

/// Map a war-log fetch failure to the per-item outcome.
fn warlog_outcome(err: &FetchError) -> SyncOutcome {
    match err {
        FetchError::LogPrivate => SyncOutcome::SkippedPrivate,
        FetchError::CacheMiss(_) => SyncOutcome::SkippedNoData,
        other => SyncOutcome::Failed(other.to_string()),
    }
}

pub struct SyncEngine {
    client: CocApiClient,
    store: Store,
    config: Config,
}

impl SyncEngine {
    pub fn new(config: Config) -> Result<Self> {
        let client = CocApiClient::new(&config)?;
        let store = Store::open(&config.database_path)?;
        Ok(Self {
            client,
            store,
            config,
        })
    }

    /// Test/embedding constructor over prebuilt parts.
    pub fn with_parts(client: CocApiClient, store: Store, config: Config) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn current_month() -> NaiveDate {
        Utc::now()
            .date_naive()
            .with_day(1)
            .expect("first of month is always valid")
    }

    /// Sync one clan's league group for the season: reconcile the group
    /// document, then resolve every round tag into a war. Returns the group
    /// id, or `None` when the clan is not in a league.
    pub async fn sync_league_group(
        &self,
        clan_tag: &str,
        season: Option<NaiveDate>,
    ) -> Result<Option<i64>> {
        let tag = fmt_tag(clan_tag)?;
        let month = season.unwrap_or_else(Self::current_month);
        let season_id = self
            .store
            .exec(|c| storage::get_or_create_season(c, month))?;

        // a clan already marked out of league this season is not refetched
        if self.store.exec(|c| storage::in_league(c, &tag, season_id))? == Some(false) {
            debug!(%tag, "known not in league, skipping");
            return Ok(None);
        }

        let persisted = match self
            .store
            .exec(|c| storage::group_id_for_clan(c, &tag, season_id))?
        {
            Some(id) => self.store.exec(|c| storage::load_group(c, id))?,
            None => None,
        };

        let fully_tagged = match &persisted {
            Some(p) => {
                let id = p.id.context("loaded group without id")?;
                self.store.exec(|c| storage::tag_count(c, id))? >= self.config.expected_tags()
            }
            None => false,
        };

        let group_id = if fully_tagged {
            // nothing new can appear on the group document itself
            let p = persisted.as_ref().expect("fully_tagged implies persisted");
            p.id
        } else {
            let raw = match self.client.get_league_group(&tag).await {
                Ok(raw) => raw,
                Err(FetchError::NotFound) | Err(FetchError::CacheMiss(_)) => {
                    self.store
                        .exec(|c| storage::set_in_league(c, &tag, season_id, false))?;
                    info!(%tag, "not in a league this season");
                    return Ok(None);
                }
                Err(e) => return Err(e).context("league group fetch failed"),
            };

            let mut fetched = match LeagueGroup::from_raw(raw, season_id) {
                Ok(g) => g,
                Err(GraphError::NotInWar) => {
                    self.store
                        .exec(|c| storage::set_in_league(c, &tag, season_id, false))?;
                    return Ok(None);
                }
                Err(e) => return Err(e).context("league group document rejected"),
            };

            // the group document does not carry the league tier; pull it off
            // the clan when it is not already persisted
            if persisted.as_ref().and_then(|p| p.league_id).is_none() {
                match self.client.get_clan(&tag).await {
                    Ok(clan) => fetched.league_id = clan.war_league.map(|l| l.id),
                    Err(e) => debug!(%tag, error = %e, "league tier lookup failed"),
                }
            }

            let report = reconcile::reconcile_group(&mut fetched, persisted.as_ref())
                .map_err(|e| anyhow!(e))?;
            self.store.with_tx(|tx| {
                storage::apply_group(tx, &mut fetched)?;
                storage::delete_orphans(tx, &report.orphans)?;
                for clan in &fetched.clans {
                    storage::upsert_clan(tx, &clan.tag, &clan.name)?;
                    for member in &clan.members {
                        storage::upsert_player(tx, &member.tag, &member.name)?;
                    }
                }
                Ok(())
            })?;
            info!(
                %tag,
                inserted = report.stats.inserted,
                updated = report.stats.updated,
                orphaned = report.stats.orphaned,
                "league group reconciled"
            );
            fetched.id
        };

        let group_id = group_id.context("group id missing after reconcile")?;
        self.resolve_round_wars(group_id).await?;

        let phase = self.group_phase(group_id)?;
        info!(%tag, group_id, ?phase, "league group synced");
        Ok(Some(group_id))
    }

    /// Resolve a group's round tags into wars: fetch unresolved tags, refetch
    /// live wars, leave ended wars frozen (association fix-up only).
    async fn resolve_round_wars(&self, group_id: i64) -> Result<()> {
        let group = self
            .store
            .exec(|c| storage::load_group(c, group_id))?
            .context("group vanished during sync")?;

        for round in &group.rounds {
            for wt in &round.tags {
                let war_id = match wt.war_id {
                    Some(id) => Some(id),
                    None => self
                        .store
                        .exec(|c| storage::find_war_id_by_tag(c, &wt.tag))?,
                };

                let resolved_state = match war_id {
                    Some(id) => self.store.exec(|c| storage::war_state(c, id))?,
                    None => None,
                };

                match (war_id, resolved_state) {
                    (Some(id), Some(WarState::WarEnded)) => {
                        // frozen; just make sure the associations are recorded
                        self.store.with_tx(|tx| {
                            storage::set_tag_war(tx, &wt.tag, round.id, id)?;
                            storage::fix_war_round(tx, id, round.id)?;
                            Ok(())
                        })?;
                    }
                    _ => {
                        // unresolved or still live: fetch the tag
                        let raw = match self.client.get_league_war(&wt.tag).await {
                            Ok(raw) => raw,
                            Err(FetchError::NotFound) | Err(FetchError::CacheMiss(_)) => continue,
                            Err(e) => return Err(e).context("league war fetch failed"),
                        };
                        let mut war = match War::from_raw(raw, WarOrigin::League) {
                            Ok(w) => w,
                            Err(GraphError::NotInWar) => continue,
                            Err(GraphError::Malformed(msg)) => {
                                warn!(war_tag = %wt.tag, error = %msg, "skipping malformed war document");
                                continue;
                            }
                        };
                        war.war_tag = Some(wt.tag.clone());
                        war.round_id = round.id;
                        self.merge_war(war, Some((&wt.tag, round.id)))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reconcile one war against its persisted counterpart (semantic-key
    /// lookup) and commit it as a unit, together with the tag association
    /// and the dimension upserts.
    fn merge_war(
        &self,
        mut war: War,
        tag_assoc: Option<(&str, Option<i64>)>,
    ) -> Result<ReconcileStats> {
        let persisted = self
            .store
            .exec(|c| storage::find_war_by_key(c, &war.semantic_key()))?;
        let report = reconcile::reconcile_war(&mut war, persisted.as_ref())
            .map_err(|e| anyhow!(e))?;

        self.store.with_tx(|tx| {
            storage::apply_war(tx, &mut war)?;
            storage::delete_orphans(tx, &report.orphans)?;
            if let (Some((tag, round_id)), Some(war_id)) = (tag_assoc, war.id) {
                storage::set_tag_war(tx, tag, round_id, war_id)?;
            }
            for side in &war.sides {
                if let Some(name) = &side.name {
                    storage::upsert_clan(tx, &side.tag, name)?;
                }
                for member in &side.members {
                    if let Some(name) = &member.name {
                        storage::upsert_player(tx, &member.tag, name)?;
                    }
                }
            }
            Ok(())
        })?;

        debug!(
            side1 = %war.sides[0].tag,
            side2 = %war.sides[1].tag,
            inserted = report.stats.inserted,
            updated = report.stats.updated,
            touched = report.stats.touched,
            orphaned = report.stats.orphaned,
            "war reconciled"
        );
        Ok(report.stats)
    }

    /// Ingest the war logs of a batch of clans. One private log, dead tag or
    /// malformed entry never aborts the batch.
    pub async fn sync_war_logs(&self, tags: &[String]) -> BatchReport {
        let mut report = BatchReport::default();
        for raw_tag in tags {
            let tag = match fmt_tag(raw_tag) {
                Ok(t) => t,
                Err(e) => {
                    report.push(raw_tag.clone(), SyncOutcome::Failed(e.to_string()));
                    continue;
                }
            };
            let outcome = match self.client.get_war_log(&tag).await {
                Ok(log) => match self.ingest_war_log(&tag, log) {
                    Ok(count) => SyncOutcome::Synced { count },
                    Err(e) => {
                        warn!(%tag, error = %e, "war log ingest failed");
                        SyncOutcome::Failed(e.to_string())
                    }
                },
                Err(e) => {
                    if matches!(e, FetchError::LogPrivate) {
                        info!(%tag, "war log is private, skipping");
                    }
                    warlog_outcome(&e)
                }
            };
            report.push(tag, outcome);
        }
        info!(%report, "war log batch done");
        report
    }

    fn ingest_war_log(
        &self,
        tag: &str,
        log: crate::scrapers::wire::RawWarLog,
    ) -> Result<usize> {
        let mut synced = 0;
        for item in log.items {
            // defunct opponents and resultless rows are dead entries
            let defunct = item
                .opponent
                .as_ref()
                .map(|o| o.tag.is_none())
                .unwrap_or(true)
                || item.result.is_none();
            if defunct {
                continue;
            }
            let war = match War::from_raw(item, WarOrigin::WarLog) {
                Ok(w) => w,
                Err(GraphError::NotInWar) => continue,
                Err(GraphError::Malformed(msg)) => {
                    warn!(%tag, error = %msg, "skipping malformed war-log entry");
                    continue;
                }
            };
            self.merge_war(war, None)?;
            synced += 1;
        }
        Ok(synced)
    }

    /// Sync the clan's current (non-league) war, if any.
    pub async fn sync_current_war(&self, clan_tag: &str) -> Result<Option<ReconcileStats>> {
        let tag = fmt_tag(clan_tag)?;
        let raw = match self.client.get_current_war(&tag).await {
            Ok(raw) => raw,
            Err(FetchError::LogPrivate) => {
                info!(%tag, "current war hidden, skipping");
                return Ok(None);
            }
            Err(FetchError::CacheMiss(_)) => return Ok(None),
            Err(e) => return Err(e).context("current war fetch failed"),
        };
        let war = match War::from_raw(raw, WarOrigin::Current) {
            Ok(w) => w,
            Err(GraphError::NotInWar) => return Ok(None),
            Err(e) => return Err(e).context("current war document rejected"),
        };
        Ok(Some(self.merge_war(war, None)?))
    }

    /// Refresh the member roster of each clan.
    pub async fn update_members(&self, tags: &[String]) -> BatchReport {
        let mut report = BatchReport::default();
        for raw_tag in tags {
            let tag = match fmt_tag(raw_tag) {
                Ok(t) => t,
                Err(e) => {
                    report.push(raw_tag.clone(), SyncOutcome::Failed(e.to_string()));
                    continue;
                }
            };
            let outcome = match self.client.get_clan_members(&tag).await {
                Ok(list) => {
                    let upserted = self.store.with_tx(|tx| {
                        let mut n = 0;
                        for m in &list.items {
                            let member_tag = match fmt_tag(&m.tag) {
                                Ok(t) => t,
                                Err(_) => continue,
                            };
                            storage::upsert_player(tx, &member_tag, &m.name)?;
                            n += 1;
                        }
                        Ok(n)
                    });
                    match upserted {
                        Ok(count) => SyncOutcome::Synced { count },
                        Err(e) => SyncOutcome::Failed(e.to_string()),
                    }
                }
                Err(e) => warlog_outcome(&e),
            };
            report.push(tag, outcome);
        }
        report
    }

    /// Refetch every persisted war that has not ended yet (tag-reachable
    /// wars only).
    pub async fn refresh_unfinished(&self) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let wars = self.store.exec(storage::unfinished_wars)?;
        for (_, war_tag) in wars {
            let Some(war_tag) = war_tag else { continue };
            let raw = match self.client.get_league_war(&war_tag).await {
                Ok(raw) => raw,
                Err(e) => {
                    report.push(war_tag, warlog_outcome(&e));
                    continue;
                }
            };
            let outcome = match War::from_raw(raw, WarOrigin::League) {
                Ok(mut war) => {
                    war.war_tag = Some(war_tag.clone());
                    match self.merge_war(war, None) {
                        Ok(_) => SyncOutcome::Synced { count: 1 },
                        Err(e) => SyncOutcome::Failed(e.to_string()),
                    }
                }
                Err(GraphError::NotInWar) => SyncOutcome::SkippedNotInLeague,
                Err(GraphError::Malformed(msg)) => SyncOutcome::Failed(msg),
            };
            report.push(war_tag, outcome);
        }
        Ok(report)
    }

    /// Current lifecycle phase of a group, derived from persisted counts.
    pub fn group_phase(&self, group_id: i64) -> Result<GroupPhase> {
        let tag_count = self.store.exec(|c| storage::tag_count(c, group_id))?;
        let states = self
            .store
            .exec(|c| storage::last_round_war_states(c, group_id))?;
        Ok(reconcile::group_phase(
            tag_count,
            self.config.expected_tags(),
            self.config.wars_per_round,
            &states,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warlog_outcome_classification() {
        assert_eq!(
            warlog_outcome(&FetchError::LogPrivate),
            SyncOutcome::SkippedPrivate
        );
        assert_eq!(
            warlog_outcome(&FetchError::CacheMiss("x".into())),
            SyncOutcome::SkippedNoData
        );
        assert!(matches!(
            warlog_outcome(&FetchError::Transport("timeout".into())),
            SyncOutcome::Failed(_)
        ));
        assert!(matches!(
            warlog_outcome(&FetchError::NotFound),
            SyncOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_batch_report_tally() {
        let mut report = BatchReport::default();
        report.push("#A", SyncOutcome::Synced { count: 3 });
        report.push("#B", SyncOutcome::Synced { count: 0 });
        report.push("#C", SyncOutcome::SkippedPrivate);
        report.push("#D", SyncOutcome::Failed("boom".into()));
        assert_eq!(report.synced(), 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.to_string(), "2 synced, 1 skipped, 1 failed");
    }
}
