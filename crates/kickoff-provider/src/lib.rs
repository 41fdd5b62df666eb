//! Match-data provider contract, football-data.org v4 client and the fixture normalizer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use kickoff_core::{Clock, FixtureCandidate, FixtureStatus};
use kickoff_storage::{FetchError, HttpClientConfig, RateLimitConfig, RateLimitedClient};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "kickoff-provider";

pub const DEFAULT_BASE_URL: &str = "https://api.football-data.org/v4";
pub const DEFAULT_COMPETITION: &str = "PL";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("FOOTBALL_DATA_API_KEY is not set")]
    MissingApiKey,
    #[error("competition endpoint did not report a current matchday")]
    MissingCurrentMatchday,
    #[error("building provider client: {0}")]
    Client(anyhow::Error),
}

// football-data.org wire shapes. Only the fields the sync reads are modelled.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTeam {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub crest: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawScoreLine {
    pub home: Option<i32>,
    pub away: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScore {
    #[serde(default)]
    pub full_time: RawScoreLine,
}

/// One provider match record as fetched; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMatch {
    pub id: i64,
    pub matchday: Option<i32>,
    pub utc_date: DateTime<Utc>,
    pub status: String,
    pub home_team: RawTeam,
    pub away_team: RawTeam,
    #[serde(default)]
    pub score: RawScore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchesResponse {
    #[serde(default)]
    pub matches: Vec<RawMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonInfo {
    pub id: i64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub current_matchday: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionResponse {
    pub current_season: Option<SeasonInfo>,
}

#[async_trait]
pub trait MatchProvider: Send + Sync {
    fn provider_id(&self) -> &'static str;

    /// The competition's own notion of the current matchday.
    async fn current_matchday(&self) -> Result<u32, ProviderError>;

    async fn season_matches(&self) -> Result<Vec<RawMatch>, ProviderError>;

    async fn matchday_matches(&self, matchday: u32) -> Result<Vec<RawMatch>, ProviderError>;

    /// Matches kicking off between the two dates, inclusive.
    async fn matches_between(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<RawMatch>, ProviderError>;
}

const TEAM_SHORT_CODES: &[(&str, &str)] = &[
    ("Arsenal FC", "ARS"),
    ("Aston Villa FC", "AVL"),
    ("AFC Bournemouth", "BOU"),
    ("Brentford FC", "BRE"),
    ("Brighton & Hove Albion FC", "BHA"),
    ("Chelsea FC", "CHE"),
    ("Crystal Palace FC", "CRY"),
    ("Everton FC", "EVE"),
    ("Fulham FC", "FUL"),
    ("Ipswich Town FC", "IPS"),
    ("Leicester City FC", "LEI"),
    ("Liverpool FC", "LIV"),
    ("Manchester City FC", "MCI"),
    ("Manchester United FC", "MUN"),
    ("Newcastle United FC", "NEW"),
    ("Nottingham Forest FC", "NFO"),
    ("Southampton FC", "SOU"),
    ("Tottenham Hotspur FC", "TOT"),
    ("West Ham United FC", "WHU"),
    ("Wolverhampton Wanderers FC", "WOL"),
];

pub fn map_status(provider_status: &str) -> FixtureStatus {
    match provider_status {
        "IN_PLAY" | "PAUSED" | "HALFTIME" | "EXTRA_TIME" | "PENALTY_SHOOTOUT" => {
            FixtureStatus::Live
        }
        "FINISHED" | "AWARDED" => FixtureStatus::Finished,
        _ => FixtureStatus::Pending,
    }
}

/// Three-letter code from the provider's full club name; unknown clubs use
/// their first three letters.
pub fn short_code(team_name: &str) -> String {
    TEAM_SHORT_CODES
        .iter()
        .find(|(name, _)| *name == team_name)
        .map(|(_, code)| (*code).to_string())
        .unwrap_or_else(|| team_name.chars().take(3).collect::<String>().to_uppercase())
}

pub fn clean_team_name(name: &str) -> String {
    let name = name.strip_suffix(" FC").unwrap_or(name);
    let name = name.strip_prefix("AFC ").unwrap_or(name);
    let name = name.strip_suffix(" & Hove Albion").unwrap_or(name);
    name.to_string()
}

fn crest_or_none(crest: &Option<String>) -> Option<String> {
    crest
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(ToString::to_string)
}

/// `None` when the provider has not assigned the match to a matchday.
pub fn normalize_match(raw: &RawMatch) -> Option<FixtureCandidate> {
    let gameweek_id = raw.matchday?;
    Some(FixtureCandidate {
        external_id: raw.id,
        gameweek_id,
        home_team: clean_team_name(&raw.home_team.name),
        away_team: clean_team_name(&raw.away_team.name),
        home_short: short_code(&raw.home_team.name),
        away_short: short_code(&raw.away_team.name),
        home_logo: crest_or_none(&raw.home_team.crest),
        away_logo: crest_or_none(&raw.away_team.crest),
        kickoff_time: raw.utc_date,
        status: map_status(&raw.status),
        home_score: raw.score.full_time.home,
        away_score: raw.score.full_time.away,
    })
}

pub fn normalize_matches(raw: &[RawMatch]) -> Vec<FixtureCandidate> {
    raw.iter()
        .filter_map(|m| {
            let candidate = normalize_match(m);
            if candidate.is_none() {
                warn!(match_id = m.id, "dropping match without a matchday");
            }
            candidate
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct FootballDataConfig {
    pub base_url: String,
    pub competition: String,
    pub api_key: Option<String>,
    pub user_agent: Option<String>,
    pub timeout: Duration,
    pub rate_limit: RateLimitConfig,
}

impl Default for FootballDataConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            competition: DEFAULT_COMPETITION.to_string(),
            api_key: None,
            user_agent: None,
            timeout: Duration::from_secs(20),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

pub struct FootballDataProvider {
    client: RateLimitedClient,
    base_url: String,
    competition: String,
}

impl FootballDataProvider {
    pub fn new(config: FootballDataConfig, clock: Arc<dyn Clock>) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ProviderError::MissingApiKey)?;
        let client = RateLimitedClient::new(
            HttpClientConfig {
                timeout: config.timeout,
                user_agent: config.user_agent,
                headers: vec![("X-Auth-Token".to_string(), api_key)],
                rate_limit: config.rate_limit,
            },
            clock,
        )
        .map_err(ProviderError::Client)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            competition: config.competition,
        })
    }

    fn competition_url(&self, suffix: &str) -> String {
        format!("{}/competitions/{}{}", self.base_url, self.competition, suffix)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        what: &'static str,
    ) -> Result<T, ProviderError> {
        let resp = self.client.fetch(url).await?;
        resp.json()
            .map_err(|source| ProviderError::Decode { what, source })
    }

    async fn get_matches(&self, url: &str) -> Result<Vec<RawMatch>, ProviderError> {
        let body: MatchesResponse = self.get_json(url, "matches response").await?;
        info!(count = body.matches.len(), url, "fetched matches");
        Ok(body.matches)
    }
}

#[async_trait]
impl MatchProvider for FootballDataProvider {
    fn provider_id(&self) -> &'static str {
        "football-data"
    }

    async fn current_matchday(&self) -> Result<u32, ProviderError> {
        let body: CompetitionResponse = self
            .get_json(&self.competition_url(""), "competition response")
            .await?;
        let matchday = body
            .current_season
            .and_then(|s| s.current_matchday)
            .ok_or(ProviderError::MissingCurrentMatchday)?;
        info!(matchday, "competition reports current matchday");
        Ok(matchday)
    }

    async fn season_matches(&self) -> Result<Vec<RawMatch>, ProviderError> {
        self.get_matches(&self.competition_url("/matches")).await
    }

    async fn matchday_matches(&self, matchday: u32) -> Result<Vec<RawMatch>, ProviderError> {
        self.get_matches(&self.competition_url(&format!("/matches?matchday={matchday}")))
            .await
    }

    async fn matches_between(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<RawMatch>, ProviderError> {
        self.get_matches(&self.competition_url(&format!(
            "/matches?dateFrom={}&dateTo={}",
            date_from.format("%Y-%m-%d"),
            date_to.format("%Y-%m-%d")
        )))
        .await
    }
}

#[derive(Debug, Default)]
struct RecordedState {
    current_matchday: Option<u32>,
    matches: Vec<RawMatch>,
    unavailable: bool,
}

/// Serves previously captured football-data responses. Used for offline runs
/// and as the provider in tests; the served data can be swapped between passes.
#[derive(Debug, Default)]
pub struct RecordedProvider {
    state: Mutex<RecordedState>,
}

impl RecordedProvider {
    pub fn new(matches: Vec<RawMatch>) -> Self {
        Self {
            state: Mutex::new(RecordedState {
                current_matchday: None,
                matches,
                unavailable: false,
            }),
        }
    }

    /// Load `matches.json` and, when present, `competition.json` from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let matches: MatchesResponse = read_json_file(dir.join("matches.json"))?;
        let provider = Self::new(matches.matches);

        let competition_path = dir.join("competition.json");
        if competition_path.exists() {
            let competition: CompetitionResponse = read_json_file(&competition_path)?;
            provider.state().current_matchday =
                competition.current_season.and_then(|s| s.current_matchday);
        }
        Ok(provider)
    }

    fn state(&self) -> MutexGuard<'_, RecordedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_matches(&self, matches: Vec<RawMatch>) {
        self.state().matches = matches;
    }

    pub fn set_current_matchday(&self, matchday: Option<u32>) {
        self.state().current_matchday = matchday;
    }

    /// Make every call fail the way an outage of the live API would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    fn check_available(&self) -> Result<(), ProviderError> {
        if self.state().unavailable {
            return Err(ProviderError::Fetch(FetchError::Provider {
                status: 503,
                body: "recorded provider unavailable".to_string(),
            }));
        }
        Ok(())
    }
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let data = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[async_trait]
impl MatchProvider for RecordedProvider {
    fn provider_id(&self) -> &'static str {
        "recorded"
    }

    async fn current_matchday(&self) -> Result<u32, ProviderError> {
        self.check_available()?;
        self.state()
            .current_matchday
            .ok_or(ProviderError::MissingCurrentMatchday)
    }

    async fn season_matches(&self) -> Result<Vec<RawMatch>, ProviderError> {
        self.check_available()?;
        Ok(self.state().matches.clone())
    }

    async fn matchday_matches(&self, matchday: u32) -> Result<Vec<RawMatch>, ProviderError> {
        self.check_available()?;
        Ok(self
            .state()
            .matches
            .iter()
            .filter(|m| m.matchday == i32::try_from(matchday).ok())
            .cloned()
            .collect())
    }

    async fn matches_between(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<RawMatch>, ProviderError> {
        self.check_available()?;
        Ok(self
            .state()
            .matches
            .iter()
            .filter(|m| {
                let day = m.utc_date.date_naive();
                day >= date_from && day <= date_to
            })
            .cloned()
            .collect())
    }
}
