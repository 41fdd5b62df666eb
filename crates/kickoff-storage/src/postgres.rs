use async_trait::async_trait;
use kickoff_core::{Fixture, FixtureCandidate, FixtureKey, FixtureStatus, FixtureUpdate, Gameweek};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use crate::repository::{FixtureRepository, PersistenceError, StandingsSnapshot};

const FIXTURE_COLUMNS: &str = "id, gameweek_id, home_team, away_team, home_short, away_short, \
     home_logo, away_logo, kickoff_time, status, home_score, away_score";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("migrations applied");
        Ok(())
    }
}

fn fixture_from_row(row: &PgRow) -> Result<Fixture, PersistenceError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<FixtureStatus>()
        .map_err(|e| PersistenceError::Rejected(e.to_string()))?;
    Ok(Fixture {
        id: row.try_get("id")?,
        gameweek_id: row.try_get("gameweek_id")?,
        home_team: row.try_get("home_team")?,
        away_team: row.try_get("away_team")?,
        home_short: row.try_get("home_short")?,
        away_short: row.try_get("away_short")?,
        home_logo: row.try_get("home_logo")?,
        away_logo: row.try_get("away_logo")?,
        kickoff_time: row.try_get("kickoff_time")?,
        status,
        home_score: row.try_get("home_score")?,
        away_score: row.try_get("away_score")?,
    })
}

#[async_trait]
impl FixtureRepository for PgStore {
    async fn list_gameweeks(&self) -> Result<Vec<Gameweek>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, start_date, end_date, is_current
              FROM gameweeks
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Gameweek {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                start_date: row.try_get("start_date")?,
                end_date: row.try_get("end_date")?,
                is_current: row.try_get("is_current")?,
            });
        }
        Ok(out)
    }

    async fn list_fixtures(&self, gameweek_id: i32) -> Result<Vec<Fixture>, PersistenceError> {
        let rows = sqlx::query(&format!(
            "SELECT {FIXTURE_COLUMNS} FROM fixtures WHERE gameweek_id = $1 ORDER BY kickoff_time, id"
        ))
        .bind(gameweek_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(fixture_from_row).collect()
    }

    async fn find_fixture(&self, key: &FixtureKey) -> Result<Option<Fixture>, PersistenceError> {
        let row = sqlx::query(&format!(
            "SELECT {FIXTURE_COLUMNS} FROM fixtures \
              WHERE gameweek_id = $1 AND home_short = $2 AND away_short = $3"
        ))
        .bind(key.gameweek_id)
        .bind(&key.home_short)
        .bind(&key.away_short)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(fixture_from_row).transpose()
    }

    async fn insert_fixture(
        &self,
        candidate: &FixtureCandidate,
    ) -> Result<Fixture, PersistenceError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO fixtures (
                gameweek_id, home_team, away_team, home_short, away_short,
                home_logo, away_logo, kickoff_time, status, home_score, away_score
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {FIXTURE_COLUMNS}
            "#
        ))
        .bind(candidate.gameweek_id)
        .bind(&candidate.home_team)
        .bind(&candidate.away_team)
        .bind(&candidate.home_short)
        .bind(&candidate.away_short)
        .bind(&candidate.home_logo)
        .bind(&candidate.away_logo)
        .bind(candidate.kickoff_time)
        .bind(candidate.status.as_str())
        .bind(candidate.home_score)
        .bind(candidate.away_score)
        .fetch_one(&self.pool)
        .await?;
        fixture_from_row(&row)
    }

    async fn update_fixture(
        &self,
        id: i64,
        update: &FixtureUpdate,
    ) -> Result<(), PersistenceError> {
        if update.is_empty() {
            return Ok(());
        }
        let score = update.score.unwrap_or_default();
        let result = sqlx::query(
            r#"
            UPDATE fixtures
               SET status     = COALESCE($2::text, status),
                   home_score = CASE WHEN $3 THEN $4::int ELSE home_score END,
                   away_score = CASE WHEN $3 THEN $5::int ELSE away_score END
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status.map(FixtureStatus::as_str))
        .bind(update.score.is_some())
        .bind(score.home)
        .bind(score.away)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound { id });
        }
        Ok(())
    }

    async fn upsert_gameweeks(&self, rows: &[Gameweek]) -> Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await?;

        if let Some(current) = rows.iter().find(|g| g.is_current) {
            sqlx::query("UPDATE gameweeks SET is_current = FALSE WHERE is_current AND id <> $1")
                .bind(current.id)
                .execute(&mut *tx)
                .await?;
        }

        for gw in rows {
            sqlx::query(
                r#"
                INSERT INTO gameweeks (id, name, start_date, end_date, is_current)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE
                   SET name = EXCLUDED.name,
                       start_date = EXCLUDED.start_date,
                       end_date = EXCLUDED.end_date,
                       is_current = EXCLUDED.is_current
                "#,
            )
            .bind(gw.id)
            .bind(&gw.name)
            .bind(gw.start_date)
            .bind(gw.end_date)
            .bind(gw.is_current)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_all_predictions(&self) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM predictions")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all_fixtures(&self) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM fixtures").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_all_gameweeks(&self) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM gameweeks").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StandingsSnapshot for PgStore {
    async fn snapshot_standings(&self, gameweek_id: i32) -> Result<(), PersistenceError> {
        sqlx::query("SELECT snapshot_gameweek_standings($1)")
            .bind(gameweek_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
