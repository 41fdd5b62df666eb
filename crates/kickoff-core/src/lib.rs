//! Core fixture/gameweek model shared by the kickoff crates.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "kickoff-core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureStatus {
    Pending,
    Live,
    Finished,
}

impl FixtureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FixtureStatus::Pending => "pending",
            FixtureStatus::Live => "live",
            FixtureStatus::Finished => "finished",
        }
    }

    /// Live and finished matches carry a meaningful score.
    pub fn has_score(self) -> bool {
        matches!(self, FixtureStatus::Live | FixtureStatus::Finished)
    }
}

impl fmt::Display for FixtureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown fixture status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for FixtureStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FixtureStatus::Pending),
            "live" => Ok(FixtureStatus::Live),
            "finished" => Ok(FixtureStatus::Finished),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Reconciliation identity: the provider's match id is never persisted, so a
/// stored fixture is found by its gameweek and the two team codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FixtureKey {
    pub gameweek_id: i32,
    pub home_short: String,
    pub away_short: String,
}

impl fmt::Display for FixtureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GW{} {}-{}", self.gameweek_id, self.home_short, self.away_short)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub home: Option<i32>,
    pub away: Option<i32>,
}

impl ScoreLine {
    pub fn new(home: Option<i32>, away: Option<i32>) -> Self {
        Self { home, away }
    }
}

/// Normalized provider fixture, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureCandidate {
    pub external_id: i64,
    pub gameweek_id: i32,
    pub home_team: String,
    pub away_team: String,
    pub home_short: String,
    pub away_short: String,
    pub home_logo: Option<String>,
    pub away_logo: Option<String>,
    pub kickoff_time: DateTime<Utc>,
    pub status: FixtureStatus,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
}

impl FixtureCandidate {
    pub fn key(&self) -> FixtureKey {
        FixtureKey {
            gameweek_id: self.gameweek_id,
            home_short: self.home_short.clone(),
            away_short: self.away_short.clone(),
        }
    }

    pub fn score(&self) -> ScoreLine {
        ScoreLine::new(self.home_score, self.away_score)
    }
}

/// Persisted fixture row. Predictions reference `id`, so the gameweek, teams
/// and kickoff are write-once; only status and score change after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub id: i64,
    pub gameweek_id: i32,
    pub home_team: String,
    pub away_team: String,
    pub home_short: String,
    pub away_short: String,
    pub home_logo: Option<String>,
    pub away_logo: Option<String>,
    pub kickoff_time: DateTime<Utc>,
    pub status: FixtureStatus,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
}

impl Fixture {
    pub fn from_candidate(id: i64, candidate: &FixtureCandidate) -> Self {
        Self {
            id,
            gameweek_id: candidate.gameweek_id,
            home_team: candidate.home_team.clone(),
            away_team: candidate.away_team.clone(),
            home_short: candidate.home_short.clone(),
            away_short: candidate.away_short.clone(),
            home_logo: candidate.home_logo.clone(),
            away_logo: candidate.away_logo.clone(),
            kickoff_time: candidate.kickoff_time,
            status: candidate.status,
            home_score: candidate.home_score,
            away_score: candidate.away_score,
        }
    }

    pub fn key(&self) -> FixtureKey {
        FixtureKey {
            gameweek_id: self.gameweek_id,
            home_short: self.home_short.clone(),
            away_short: self.away_short.clone(),
        }
    }

    pub fn score(&self) -> ScoreLine {
        ScoreLine::new(self.home_score, self.away_score)
    }

    /// Apply a minimal update in place; identity-bearing fields are untouched.
    pub fn apply(&mut self, update: &FixtureUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(score) = update.score {
            self.home_score = score.home;
            self.away_score = score.away;
        }
    }
}

/// Minimal status/score change for an existing fixture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureUpdate {
    pub status: Option<FixtureStatus>,
    pub score: Option<ScoreLine>,
}

impl FixtureUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.score.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gameweek {
    pub id: i32,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_current: bool,
}

/// Just enough of a fixture to decide which gameweek is current.
pub trait Kickoff {
    fn kickoff_time(&self) -> DateTime<Utc>;
    fn status(&self) -> FixtureStatus;
}

impl<T: Kickoff + ?Sized> Kickoff for &T {
    fn kickoff_time(&self) -> DateTime<Utc> {
        (**self).kickoff_time()
    }

    fn status(&self) -> FixtureStatus {
        (**self).status()
    }
}

impl Kickoff for FixtureCandidate {
    fn kickoff_time(&self) -> DateTime<Utc> {
        self.kickoff_time
    }

    fn status(&self) -> FixtureStatus {
        self.status
    }
}

impl Kickoff for Fixture {
    fn kickoff_time(&self) -> DateTime<Utc> {
        self.kickoff_time
    }

    fn status(&self) -> FixtureStatus {
        self.status
    }
}

/// Time source for everything that reads the wall clock or waits on it.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock: `sleep` returns immediately after advancing time and
/// recording the requested duration.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
    }
}
