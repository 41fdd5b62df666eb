use async_trait::async_trait;
use kickoff_core::{Fixture, FixtureCandidate, FixtureKey, FixtureUpdate, Gameweek};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("fixture {id} not found")]
    NotFound { id: i64 },
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Fixture and gameweek persistence used by the sync passes.
#[async_trait]
pub trait FixtureRepository: Send + Sync {
    async fn list_gameweeks(&self) -> Result<Vec<Gameweek>, PersistenceError>;

    async fn list_fixtures(&self, gameweek_id: i32) -> Result<Vec<Fixture>, PersistenceError>;

    async fn find_fixture(&self, key: &FixtureKey) -> Result<Option<Fixture>, PersistenceError>;

    async fn insert_fixture(&self, candidate: &FixtureCandidate)
        -> Result<Fixture, PersistenceError>;

    /// Writes only the fields present in `update`.
    async fn update_fixture(&self, id: i64, update: &FixtureUpdate)
        -> Result<(), PersistenceError>;

    /// Insert-or-replace by id. When a row in `rows` is current, every other
    /// stored gameweek loses the flag in the same write.
    async fn upsert_gameweeks(&self, rows: &[Gameweek]) -> Result<(), PersistenceError>;

    async fn delete_all_predictions(&self) -> Result<u64, PersistenceError>;

    async fn delete_all_fixtures(&self) -> Result<u64, PersistenceError>;

    async fn delete_all_gameweeks(&self) -> Result<u64, PersistenceError>;
}

/// Freezes standings for a completed gameweek. Implementations must tolerate
/// being called more than once for the same gameweek.
#[async_trait]
pub trait StandingsSnapshot: Send + Sync {
    async fn snapshot_standings(&self, gameweek_id: i32) -> Result<(), PersistenceError>;
}
