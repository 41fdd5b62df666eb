//! Current-gameweek resolution and gameweek row derivation.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use kickoff_core::{FixtureStatus, Gameweek, Kickoff};
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    /// How far ahead a kickoff may be for its gameweek to count as upcoming.
    pub horizon: Duration,
    /// Added to the latest kickoff to get a gameweek's end date.
    pub end_buffer: Duration,
    /// Used only when there are no gameweeks at all.
    pub default_gameweek: i32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            horizon: Duration::days(14),
            end_buffer: Duration::hours(3),
            default_gameweek: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    UpcomingWithinHorizon,
    LatestWithFinished,
    LowestPresent,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub gameweek_id: i32,
    pub rule: ResolutionRule,
}

pub fn group_by_gameweek<T>(items: &[T], gameweek_of: impl Fn(&T) -> i32) -> BTreeMap<i32, Vec<&T>> {
    let mut groups: BTreeMap<i32, Vec<&T>> = BTreeMap::new();
    for item in items {
        groups.entry(gameweek_of(item)).or_default().push(item);
    }
    groups
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GameweekResolver {
    config: ResolverConfig,
}

impl GameweekResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Pick the single current gameweek:
    /// 1. lowest gameweek with a kickoff in `(now, now + horizon]`;
    /// 2. else highest gameweek with a finished fixture;
    /// 3. else lowest gameweek present, or the configured default when empty.
    pub fn resolve<T: Kickoff>(
        &self,
        groups: &BTreeMap<i32, Vec<T>>,
        now: DateTime<Utc>,
    ) -> Resolution {
        // no upcoming rule when the horizon runs past the representable range
        let horizon_end = now.checked_add_signed(self.config.horizon);

        let upcoming = horizon_end.and_then(|horizon_end| {
            groups.iter().find(|(_, fixtures)| {
                fixtures.iter().any(|f| {
                    let kickoff = f.kickoff_time();
                    kickoff > now && kickoff <= horizon_end
                })
            })
        });
        if let Some((id, _)) = upcoming {
            return Resolution {
                gameweek_id: *id,
                rule: ResolutionRule::UpcomingWithinHorizon,
            };
        }

        let latest_finished = groups.iter().rev().find(|(_, fixtures)| {
            fixtures
                .iter()
                .any(|f| f.status() == FixtureStatus::Finished)
        });
        if let Some((id, _)) = latest_finished {
            return Resolution {
                gameweek_id: *id,
                rule: ResolutionRule::LatestWithFinished,
            };
        }

        match groups.keys().next() {
            Some(id) => Resolution {
                gameweek_id: *id,
                rule: ResolutionRule::LowestPresent,
            },
            None => Resolution {
                gameweek_id: self.config.default_gameweek,
                rule: ResolutionRule::Default,
            },
        }
    }

    /// One row per non-empty group, flagged current when its id is `current`.
    pub fn gameweek_rows<T: Kickoff>(
        &self,
        groups: &BTreeMap<i32, Vec<T>>,
        current: i32,
    ) -> Vec<Gameweek> {
        groups
            .iter()
            .filter_map(|(id, fixtures)| {
                let start = fixtures.iter().map(|f| f.kickoff_time()).min()?;
                let latest = fixtures.iter().map(|f| f.kickoff_time()).max()?;
                Some(Gameweek {
                    id: *id,
                    name: format!("Gameweek {id}"),
                    start_date: start,
                    end_date: latest.checked_add_signed(self.config.end_buffer).unwrap_or(latest),
                    is_current: *id == current,
                })
            })
            .collect()
    }
}
