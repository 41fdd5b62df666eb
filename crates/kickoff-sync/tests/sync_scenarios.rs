use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use kickoff_core::{FixtureKey, FixtureStatus, ManualClock, ScoreLine};
use kickoff_provider::{MatchProvider, RawScoreLine, RecordedProvider};
use kickoff_storage::{FixtureRepository, MemoryStore};
use kickoff_sync::{ResolutionRule, SyncConfig, SyncError, SyncPipeline};

const CITY_SPURS: i64 = 537796;
const LEEDS_EVERTON: i64 = 537797;
const SUNDERLAND_BRENTFORD: i64 = 537805;

struct Harness {
    provider: Arc<RecordedProvider>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    pipeline: SyncPipeline,
}

fn sample_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/football-data")
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, day, hour, 0, 0).single().unwrap()
}

fn harness(now: DateTime<Utc>) -> Harness {
    let provider = Arc::new(RecordedProvider::from_dir(sample_dir()).expect("sample provider"));
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(now));
    let pipeline = SyncPipeline::new(
        SyncConfig::default(),
        provider.clone(),
        store.clone(),
        store.clone(),
        clock.clone(),
    );
    Harness {
        provider,
        store,
        clock,
        pipeline,
    }
}

async fn set_result(provider: &RecordedProvider, id: i64, status: &str, home: Option<i32>, away: Option<i32>) {
    let mut matches = provider.season_matches().await.unwrap();
    let m = matches.iter_mut().find(|m| m.id == id).expect("match in sample");
    m.status = status.to_string();
    m.score.full_time = RawScoreLine { home, away };
    provider.set_matches(matches);
}

fn key(gameweek_id: i32, home: &str, away: &str) -> FixtureKey {
    FixtureKey {
        gameweek_id,
        home_short: home.into(),
        away_short: away.into(),
    }
}

#[tokio::test]
async fn full_sync_populates_store_and_resolves_current() {
    let h = harness(at(23, 12));
    let summary = h.pipeline.run_full_sync().await.unwrap();

    assert_eq!(summary.gameweeks_written, 3);
    assert_eq!(summary.fixtures_inserted, 8);
    assert_eq!(summary.fixtures_updated, 0);
    assert_eq!(summary.current_gameweek, 2);
    assert_eq!(summary.resolution_rule, ResolutionRule::UpcomingWithinHorizon);
    assert!(summary.completed_gameweeks.is_empty());

    let gameweeks = h.store.gameweeks();
    let current: Vec<i32> = gameweeks.iter().filter(|g| g.is_current).map(|g| g.id).collect();
    assert_eq!(current, vec![2]);
    assert_eq!(gameweeks[0].name, "Gameweek 1");
    assert_eq!(gameweeks[0].start_date, at(15, 19));
    assert_eq!(gameweeks[0].end_date, at(16, 17));

    let city = h.store.find_fixture(&key(2, "MCI", "TOT")).await.unwrap().unwrap();
    assert_eq!(city.status, FixtureStatus::Live);
    assert_eq!(city.score(), ScoreLine::new(Some(0), Some(1)));
    let leeds = h.store.find_fixture(&key(2, "LEE", "EVE")).await.unwrap().unwrap();
    assert_eq!(leeds.status, FixtureStatus::Pending);
    assert_eq!(leeds.score(), ScoreLine::default());
}

#[tokio::test]
async fn repeated_full_sync_writes_nothing() {
    let h = harness(at(23, 12));
    h.pipeline.run_full_sync().await.unwrap();
    h.store.clear_write_log();

    let again = h.pipeline.run_full_sync().await.unwrap();

    assert_eq!(again.fixtures_inserted, 0);
    assert_eq!(again.fixtures_updated, 0);
    assert_eq!(again.fixtures_unchanged, 8);
    assert!(h.store.inserts().is_empty());
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn completing_a_gameweek_snapshots_it_once() {
    let h = harness(at(23, 12));
    h.pipeline.run_full_sync().await.unwrap();

    set_result(&h.provider, CITY_SPURS, "FINISHED", Some(1), Some(2)).await;
    set_result(&h.provider, LEEDS_EVERTON, "FINISHED", Some(2), Some(0)).await;
    h.clock.set(at(26, 12));

    let summary = h.pipeline.run_full_sync().await.unwrap();
    assert_eq!(summary.fixtures_updated, 2);
    assert_eq!(summary.completed_gameweeks, vec![2]);
    assert_eq!(summary.snapshotted_gameweeks, vec![2]);
    assert_eq!(summary.current_gameweek, 3);
    assert_eq!(h.store.snapshots(), vec![2]);

    let again = h.pipeline.run_full_sync().await.unwrap();
    assert!(again.snapshotted_gameweeks.is_empty());
    assert_eq!(h.store.snapshots(), vec![2]);
}

#[tokio::test]
async fn score_sync_only_touches_stored_fixtures() {
    let h = harness(at(23, 12));

    let cold = h.pipeline.run_score_only_sync().await.unwrap();
    assert_eq!(cold.matches_checked, 2);
    assert_eq!(cold.skipped_unknown, 2);
    assert_eq!(cold.updated, 0);
    assert!(h.store.fixtures().is_empty());

    h.pipeline.run_full_sync().await.unwrap();
    set_result(&h.provider, CITY_SPURS, "PAUSED", Some(1), Some(1)).await;
    let half_time = h.pipeline.run_score_only_sync().await.unwrap();
    assert_eq!(half_time.updated, 1);
    assert_eq!(half_time.newly_finished_count, 0);

    set_result(&h.provider, CITY_SPURS, "FINISHED", Some(1), Some(2)).await;
    let full_time = h.pipeline.run_score_only_sync().await.unwrap();
    assert_eq!(full_time.updated, 1);
    assert_eq!(full_time.newly_finished_count, 1);
    // Leeds v Everton is still to play
    assert!(full_time.snapshotted_gameweeks.is_empty());
}

#[tokio::test]
async fn pending_fixture_ignores_provider_scores() {
    let h = harness(at(23, 12));
    set_result(&h.provider, SUNDERLAND_BRENTFORD, "SCHEDULED", Some(0), Some(0)).await;

    h.pipeline.run_full_sync().await.unwrap();
    let sunderland = h.store.find_fixture(&key(3, "SUN", "BRE")).await.unwrap().unwrap();
    assert_eq!(sunderland.score(), ScoreLine::default());

    h.store.clear_write_log();
    h.pipeline.run_full_sync().await.unwrap();
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn matchday_sync_updates_that_round_only() {
    let h = harness(at(23, 12));
    h.pipeline.run_full_sync().await.unwrap();
    set_result(&h.provider, CITY_SPURS, "FINISHED", Some(1), Some(2)).await;

    let summary = h.pipeline.run_matchday_sync(2).await.unwrap();
    assert_eq!(summary.matches_checked, 3);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.newly_finished_count, 1);
}

#[tokio::test]
async fn one_failing_record_does_not_abort_the_pass() {
    let h = harness(at(23, 12));
    h.store.reject_writes_for(key(2, "MCI", "TOT"));

    let summary = h.pipeline.run_full_sync().await.unwrap();
    assert_eq!(summary.fixtures_inserted, 7);
    assert_eq!(summary.fixtures_failed, 1);
}

#[tokio::test]
async fn provider_outage_is_fatal_and_writes_nothing() {
    let h = harness(at(23, 12));
    h.provider.set_unavailable(true);

    let err = h.pipeline.run_full_sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Provider(_)));
    assert!(h.store.gameweeks().is_empty());
    assert!(h.store.fixtures().is_empty());
}

#[tokio::test]
async fn resync_wipes_predictions_and_rebuilds() {
    let h = harness(at(23, 12));
    h.pipeline.run_full_sync().await.unwrap();
    let city = h.store.find_fixture(&key(2, "MCI", "TOT")).await.unwrap().unwrap();
    h.store.add_prediction(city.id).unwrap();

    let summary = h.pipeline.run_destructive_resync().await.unwrap();

    assert_eq!(summary.predictions_deleted, 1);
    assert_eq!(summary.fixtures_deleted, 8);
    assert_eq!(summary.gameweeks_deleted, 3);
    assert_eq!(summary.fixtures_inserted, 8);
    assert_eq!(summary.current_gameweek, 2);
    assert_eq!(h.store.prediction_count(), 0);
    assert_eq!(h.store.fixtures().len(), 8);
    assert!(h.store.fixtures().iter().all(|f| f.id > 8));
}

#[tokio::test]
async fn resync_leaves_store_alone_when_provider_is_down() {
    let h = harness(at(23, 12));
    h.pipeline.run_full_sync().await.unwrap();
    let city = h.store.find_fixture(&key(2, "MCI", "TOT")).await.unwrap().unwrap();
    h.store.add_prediction(city.id).unwrap();
    h.provider.set_unavailable(true);

    assert!(h.pipeline.run_destructive_resync().await.is_err());
    assert_eq!(h.store.fixtures().len(), 8);
    assert_eq!(h.store.prediction_count(), 1);
}

#[tokio::test]
async fn dry_run_reports_without_writing() {
    let h = harness(at(23, 12));
    h.pipeline.run_full_sync().await.unwrap();
    h.store.clear_write_log();
    set_result(&h.provider, CITY_SPURS, "FINISHED", Some(1), Some(2)).await;

    let plan = h.pipeline.plan_full_sync().await.unwrap();

    assert_eq!(plan.current.gameweek_id, 2);
    assert_eq!(plan.gameweeks.len(), 3);
    assert!(plan.plan.inserts.is_empty());
    assert_eq!(plan.plan.updates.len(), 1);
    assert_eq!(plan.plan.unchanged, 7);
    assert_eq!(plan.completing_gameweeks, vec![2]);
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn anchor_and_stored_current_agree_on_sample() {
    let h = harness(at(23, 12));
    assert_eq!(h.pipeline.provider_anchor().await.unwrap(), 2);

    h.pipeline.run_full_sync().await.unwrap();
    let stored = h.pipeline.resolve_stored_current().await.unwrap();
    assert_eq!(stored.gameweek_id, 2);
}
