use std::collections::BTreeSet;
use std::sync::Arc;

use kickoff_core::FixtureStatus;
use kickoff_storage::{FixtureRepository, StandingsSnapshot};
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub snapshotted: Vec<i32>,
    pub incomplete: Vec<i32>,
    pub failed: Vec<i32>,
}

/// Takes a standings snapshot for each flagged gameweek once every fixture in
/// it is stored as finished.
pub struct CompletionDispatcher {
    repo: Arc<dyn FixtureRepository>,
    snapshot: Arc<dyn StandingsSnapshot>,
}

impl CompletionDispatcher {
    pub fn new(repo: Arc<dyn FixtureRepository>, snapshot: Arc<dyn StandingsSnapshot>) -> Self {
        Self { repo, snapshot }
    }

    pub async fn dispatch(&self, gameweeks: &BTreeSet<i32>) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for &gameweek_id in gameweeks {
            // re-read: the pass may have left other fixtures unfinished
            let fixtures = match self.repo.list_fixtures(gameweek_id).await {
                Ok(fixtures) => fixtures,
                Err(err) => {
                    error!(gameweek_id, error = %err, "reading gameweek fixtures failed");
                    outcome.failed.push(gameweek_id);
                    continue;
                }
            };

            let complete = !fixtures.is_empty()
                && fixtures.iter().all(|f| f.status == FixtureStatus::Finished);
            if !complete {
                outcome.incomplete.push(gameweek_id);
                continue;
            }

            match self.snapshot.snapshot_standings(gameweek_id).await {
                Ok(()) => {
                    info!(gameweek_id, "gameweek complete; standings snapshot taken");
                    outcome.snapshotted.push(gameweek_id);
                }
                Err(err) => {
                    error!(gameweek_id, error = %err, "standings snapshot failed");
                    outcome.failed.push(gameweek_id);
                }
            }
        }

        outcome
    }
}
