//! Fixture reconciliation: decide per candidate whether to insert, update or
//! leave alone, then apply those decisions one record at a time.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use kickoff_core::{Fixture, FixtureCandidate, FixtureKey, FixtureStatus, FixtureUpdate};
use kickoff_storage::{FixtureRepository, PersistenceError};
use serde::Serialize;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Insert unknown fixtures, update known ones.
    Upsert,
    /// Only touch fixtures that already exist.
    UpdateOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FixtureAction {
    Insert,
    Update {
        id: i64,
        update: FixtureUpdate,
        /// Stored status was not finished and the provider now says finished.
        completes: bool,
    },
    Unchanged {
        id: i64,
    },
    SkipUnknown,
}

/// Smallest change that brings `stored` in line with the provider.
///
/// Status is written when it differs. Scores are written only for live or
/// finished matches and only when they differ, so a pending fixture never
/// picks up a provider placeholder score.
pub fn minimal_update(stored: &Fixture, candidate: &FixtureCandidate) -> FixtureUpdate {
    let status = (stored.status != candidate.status).then_some(candidate.status);
    let score = (candidate.status.has_score() && stored.score() != candidate.score())
        .then(|| candidate.score());
    FixtureUpdate { status, score }
}

/// Row to insert for `candidate`. A pending match never carries a score,
/// whatever the provider sent.
pub fn insert_row(candidate: &FixtureCandidate) -> FixtureCandidate {
    let mut row = candidate.clone();
    if !row.status.has_score() {
        row.home_score = None;
        row.away_score = None;
    }
    row
}

pub fn plan_fixture(
    candidate: &FixtureCandidate,
    existing: Option<&Fixture>,
    mode: ReconcileMode,
) -> FixtureAction {
    let Some(stored) = existing else {
        return match mode {
            ReconcileMode::Upsert => FixtureAction::Insert,
            ReconcileMode::UpdateOnly => FixtureAction::SkipUnknown,
        };
    };

    let update = minimal_update(stored, candidate);
    if update.is_empty() {
        return FixtureAction::Unchanged { id: stored.id };
    }
    FixtureAction::Update {
        id: stored.id,
        update,
        completes: stored.status != FixtureStatus::Finished
            && candidate.status == FixtureStatus::Finished,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedUpdate {
    pub id: i64,
    pub key: FixtureKey,
    pub update: FixtureUpdate,
    pub completes: bool,
}

/// What a pass would do, computed without writing anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub inserts: Vec<FixtureKey>,
    pub updates: Vec<PlannedUpdate>,
    pub unchanged: usize,
    pub skipped: usize,
}

impl ReconcilePlan {
    pub fn build(candidates: &[FixtureCandidate], persisted: &[Fixture], mode: ReconcileMode) -> Self {
        let mut plan = Self::default();
        let mut seen: HashSet<FixtureKey> = HashSet::new();

        for candidate in candidates {
            let key = candidate.key();
            if !seen.insert(key.clone()) {
                debug!(%key, "duplicate candidate in batch");
                plan.skipped += 1;
                continue;
            }
            let existing = persisted.iter().find(|f| f.key() == key);
            match plan_fixture(candidate, existing, mode) {
                FixtureAction::Insert => plan.inserts.push(key),
                FixtureAction::Update {
                    id,
                    update,
                    completes,
                } => plan.updates.push(PlannedUpdate {
                    id,
                    key,
                    update,
                    completes,
                }),
                FixtureAction::Unchanged { .. } => plan.unchanged += 1,
                FixtureAction::SkipUnknown => plan.skipped += 1,
            }
        }
        plan
    }

    pub fn completing_gameweeks(&self) -> BTreeSet<i32> {
        self.updates
            .iter()
            .filter(|u| u.completes)
            .map(|u| u.key.gameweek_id)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub newly_finished: usize,
    /// Gameweeks where at least one fixture was just written as finished.
    pub completed_gameweeks: BTreeSet<i32>,
}

pub struct ReconciliationEngine {
    repo: Arc<dyn FixtureRepository>,
}

impl ReconciliationEngine {
    pub fn new(repo: Arc<dyn FixtureRepository>) -> Self {
        Self { repo }
    }

    /// Apply candidates sequentially. A failed lookup or write is logged and
    /// counted; the remaining candidates are still processed.
    pub async fn reconcile(
        &self,
        candidates: &[FixtureCandidate],
        mode: ReconcileMode,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for candidate in candidates {
            let key = candidate.key();
            let existing = match self.repo.find_fixture(&key).await {
                Ok(existing) => existing,
                Err(err) => {
                    error!(%key, error = %err, "fixture lookup failed");
                    outcome.failed += 1;
                    continue;
                }
            };

            match plan_fixture(candidate, existing.as_ref(), mode) {
                FixtureAction::Insert => match self.repo.insert_fixture(&insert_row(candidate)).await {
                    Ok(_) => outcome.inserted += 1,
                    Err(err) => {
                        error!(%key, error = %err, "fixture insert failed");
                        outcome.failed += 1;
                    }
                },
                FixtureAction::Update {
                    id,
                    update,
                    completes,
                } => match self.repo.update_fixture(id, &update).await {
                    Ok(()) => {
                        outcome.updated += 1;
                        if completes {
                            info!(%key, "fixture finished");
                            outcome.newly_finished += 1;
                            outcome.completed_gameweeks.insert(candidate.gameweek_id);
                        }
                    }
                    Err(err) => {
                        error!(%key, fixture_id = id, error = %err, "fixture update failed");
                        outcome.failed += 1;
                    }
                },
                FixtureAction::Unchanged { .. } => outcome.unchanged += 1,
                FixtureAction::SkipUnknown => {
                    debug!(%key, "fixture not stored yet; skipping");
                    outcome.skipped += 1;
                }
            }
        }

        outcome
    }

    /// Insert every candidate without lookups. Used right after a wipe.
    pub async fn insert_all(&self, candidates: &[FixtureCandidate]) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        for candidate in candidates {
            match self.repo.insert_fixture(&insert_row(candidate)).await {
                Ok(_) => outcome.inserted += 1,
                Err(err) => {
                    error!(key = %candidate.key(), error = %err, "fixture insert failed");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    /// Dry run against the stored fixtures of every gameweek the candidates touch.
    pub async fn plan(
        &self,
        candidates: &[FixtureCandidate],
        mode: ReconcileMode,
    ) -> Result<ReconcilePlan, PersistenceError> {
        let gameweeks: BTreeSet<i32> = candidates.iter().map(|c| c.gameweek_id).collect();
        let mut persisted = Vec::new();
        for gameweek_id in gameweeks {
            persisted.extend(self.repo.list_fixtures(gameweek_id).await?);
        }
        Ok(ReconcilePlan::build(candidates, &persisted, mode))
    }
}
