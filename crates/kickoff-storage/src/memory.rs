use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kickoff_core::{Fixture, FixtureCandidate, FixtureKey, FixtureUpdate, Gameweek};

use crate::repository::{FixtureRepository, PersistenceError, StandingsSnapshot};

#[derive(Debug, Default)]
struct MemoryState {
    gameweeks: BTreeMap<i32, Gameweek>,
    fixtures: BTreeMap<i64, Fixture>,
    /// prediction id -> fixture id
    predictions: BTreeMap<i64, i64>,
    next_fixture_id: i64,
    next_prediction_id: i64,
    inserts: Vec<FixtureKey>,
    updates: Vec<(i64, FixtureUpdate)>,
    snapshots: Vec<i32>,
    rejected: HashSet<FixtureKey>,
    failing_snapshots: HashSet<i32>,
}

/// In-process store with the same constraints as the Postgres schema
/// (foreign keys, unique identity key, single current gameweek). It records
/// every write so tests can assert on them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Place a fixture directly, bypassing the write log.
    pub fn seed_fixture(&self, fixture: Fixture) {
        let mut state = self.state();
        state.next_fixture_id = state.next_fixture_id.max(fixture.id);
        state.fixtures.insert(fixture.id, fixture);
    }

    pub fn seed_gameweek(&self, gameweek: Gameweek) {
        self.state().gameweeks.insert(gameweek.id, gameweek);
    }

    pub fn add_prediction(&self, fixture_id: i64) -> Result<i64, PersistenceError> {
        let mut state = self.state();
        if !state.fixtures.contains_key(&fixture_id) {
            return Err(PersistenceError::NotFound { id: fixture_id });
        }
        state.next_prediction_id += 1;
        let id = state.next_prediction_id;
        state.predictions.insert(id, fixture_id);
        Ok(id)
    }

    /// Make every insert or update for `key` fail.
    pub fn reject_writes_for(&self, key: FixtureKey) {
        self.state().rejected.insert(key);
    }

    pub fn fail_snapshot_for(&self, gameweek_id: i32) {
        self.state().failing_snapshots.insert(gameweek_id);
    }

    pub fn fixtures(&self) -> Vec<Fixture> {
        self.state().fixtures.values().cloned().collect()
    }

    pub fn gameweeks(&self) -> Vec<Gameweek> {
        self.state().gameweeks.values().cloned().collect()
    }

    pub fn prediction_count(&self) -> usize {
        self.state().predictions.len()
    }

    pub fn inserts(&self) -> Vec<FixtureKey> {
        self.state().inserts.clone()
    }

    pub fn updates(&self) -> Vec<(i64, FixtureUpdate)> {
        self.state().updates.clone()
    }

    pub fn snapshots(&self) -> Vec<i32> {
        self.state().snapshots.clone()
    }

    pub fn clear_write_log(&self) {
        let mut state = self.state();
        state.inserts.clear();
        state.updates.clear();
        state.snapshots.clear();
    }
}

#[async_trait]
impl FixtureRepository for MemoryStore {
    async fn list_gameweeks(&self) -> Result<Vec<Gameweek>, PersistenceError> {
        Ok(self.gameweeks())
    }

    async fn list_fixtures(&self, gameweek_id: i32) -> Result<Vec<Fixture>, PersistenceError> {
        let mut fixtures: Vec<Fixture> = self
            .state()
            .fixtures
            .values()
            .filter(|f| f.gameweek_id == gameweek_id)
            .cloned()
            .collect();
        fixtures.sort_by_key(|f| (f.kickoff_time, f.id));
        Ok(fixtures)
    }

    async fn find_fixture(&self, key: &FixtureKey) -> Result<Option<Fixture>, PersistenceError> {
        Ok(self
            .state()
            .fixtures
            .values()
            .find(|f| f.key() == *key)
            .cloned())
    }

    async fn insert_fixture(
        &self,
        candidate: &FixtureCandidate,
    ) -> Result<Fixture, PersistenceError> {
        let mut state = self.state();
        let key = candidate.key();
        if state.rejected.contains(&key) {
            return Err(PersistenceError::Rejected(format!("insert of {key} refused")));
        }
        if !state.gameweeks.contains_key(&candidate.gameweek_id) {
            return Err(PersistenceError::Rejected(format!(
                "gameweek {} does not exist",
                candidate.gameweek_id
            )));
        }
        if state.fixtures.values().any(|f| f.key() == key) {
            return Err(PersistenceError::Rejected(format!("duplicate fixture {key}")));
        }

        state.next_fixture_id += 1;
        let fixture = Fixture::from_candidate(state.next_fixture_id, candidate);
        state.fixtures.insert(fixture.id, fixture.clone());
        state.inserts.push(key);
        Ok(fixture)
    }

    async fn update_fixture(
        &self,
        id: i64,
        update: &FixtureUpdate,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state();
        let key = match state.fixtures.get(&id) {
            Some(fixture) => fixture.key(),
            None => return Err(PersistenceError::NotFound { id }),
        };
        if state.rejected.contains(&key) {
            return Err(PersistenceError::Rejected(format!("update of {key} refused")));
        }
        if let Some(fixture) = state.fixtures.get_mut(&id) {
            fixture.apply(update);
        }
        state.updates.push((id, *update));
        Ok(())
    }

    async fn upsert_gameweeks(&self, rows: &[Gameweek]) -> Result<(), PersistenceError> {
        if rows.iter().filter(|g| g.is_current).count() > 1 {
            return Err(PersistenceError::Rejected(
                "more than one current gameweek".to_string(),
            ));
        }
        let mut state = self.state();
        if let Some(current) = rows.iter().find(|g| g.is_current) {
            for gw in state.gameweeks.values_mut() {
                if gw.id != current.id {
                    gw.is_current = false;
                }
            }
        }
        for gw in rows {
            state.gameweeks.insert(gw.id, gw.clone());
        }
        Ok(())
    }

    async fn delete_all_predictions(&self) -> Result<u64, PersistenceError> {
        let mut state = self.state();
        let n = state.predictions.len() as u64;
        state.predictions.clear();
        Ok(n)
    }

    async fn delete_all_fixtures(&self) -> Result<u64, PersistenceError> {
        let mut state = self.state();
        if !state.predictions.is_empty() {
            return Err(PersistenceError::Rejected(
                "predictions still reference fixtures".to_string(),
            ));
        }
        let n = state.fixtures.len() as u64;
        state.fixtures.clear();
        Ok(n)
    }

    async fn delete_all_gameweeks(&self) -> Result<u64, PersistenceError> {
        let mut state = self.state();
        if !state.fixtures.is_empty() {
            return Err(PersistenceError::Rejected(
                "fixtures still reference gameweeks".to_string(),
            ));
        }
        let n = state.gameweeks.len() as u64;
        state.gameweeks.clear();
        Ok(n)
    }
}

#[async_trait]
impl StandingsSnapshot for MemoryStore {
    async fn snapshot_standings(&self, gameweek_id: i32) -> Result<(), PersistenceError> {
        let mut state = self.state();
        if state.failing_snapshots.contains(&gameweek_id) {
            return Err(PersistenceError::Rejected(format!(
                "snapshot for gameweek {gameweek_id} failed"
            )));
        }
        state.snapshots.push(gameweek_id);
        Ok(())
    }
}
