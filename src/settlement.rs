//! Matchday settlement.
//!
//! Derives outcomes for finished fixtures, grades every still-pending bet
//! that references them, persists statuses and payouts, and credits winners
//! through the atomic point increment. Safe to re-run: the pending-only query
//! excludes everything a previous run already settled.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::bets::{self, BetWithSelections};
use crate::error::Result;
use crate::provider::{FootballApi, ProviderFixture};
use crate::scheduler;
use crate::types::{round2, BetStatus, MatchOutcome, SelectionCode};

#[derive(Debug, Default, Clone)]
pub struct SettlementSummary {
    pub fixtures_finished: usize,
    pub fixtures_skipped_missing_goals: usize,
    pub settled: usize,
    pub won: usize,
    pub lost: usize,
    pub left_pending: usize,
    pub points_credited: f64,
}

/// Full settlement pass for one competition: fetch finished fixtures from the
/// provider, then grade against them.
pub async fn process_competition(
    pool: &SqlitePool,
    api: &FootballApi,
    cfg: &Config,
    comp: crate::types::Competition,
) -> Result<SettlementSummary> {
    let comp_cfg = cfg.competition(comp);
    let finished = api.finished_fixtures(comp_cfg.league_id, comp_cfg.season).await?;
    let summary = settle_finished_fixtures(pool, &finished).await?;
    info!(
        "Settlement for {comp}: {} fixtures, {} bets settled ({} won / {} lost), {:.2} points credited",
        summary.fixtures_finished, summary.settled, summary.won, summary.lost, summary.points_credited
    );
    Ok(summary)
}

/// Like `process_competition`, but also unschedules the one-shot job that
/// triggered this run once it succeeds.
pub async fn process_with_job(
    pool: &SqlitePool,
    api: &FootballApi,
    cfg: &Config,
    comp: crate::types::Competition,
    job_name: Option<&str>,
) -> Result<SettlementSummary> {
    let summary = process_competition(pool, api, cfg, comp).await?;
    if let Some(name) = job_name {
        if scheduler::mark_completed(pool, name).await? {
            info!("Unscheduled job {name}");
        }
    }
    Ok(summary)
}

/// Grades all pending bets referencing the given finished fixtures.
///
/// Fixtures without both goal counts produce no outcome and are excluded
/// entirely — their bets stay pending for a later run.
pub async fn settle_finished_fixtures(
    pool: &SqlitePool,
    finished: &[ProviderFixture],
) -> Result<SettlementSummary> {
    let mut summary = SettlementSummary::default();
    let mut outcomes: std::collections::HashMap<i64, MatchOutcome> =
        std::collections::HashMap::new();

    for fx in finished {
        let (Some(home), Some(away)) = (fx.goals.home, fx.goals.away) else {
            summary.fixtures_skipped_missing_goals += 1;
            continue;
        };
        let outcome = MatchOutcome::from_goals(home, away);
        upsert_match_result(pool, fx, home, away, outcome).await?;
        outcomes.insert(fx.fixture.id, outcome);
    }
    summary.fixtures_finished = outcomes.len();

    let fixture_ids: Vec<i64> = outcomes.keys().copied().collect();
    let pending = bets::pending_bets_for_fixtures(pool, &fixture_ids).await?;

    for entry in pending {
        settle_one_bet(pool, &entry, &outcomes, &mut summary).await?;
    }

    Ok(summary)
}

async fn settle_one_bet(
    pool: &SqlitePool,
    entry: &BetWithSelections,
    outcomes: &std::collections::HashMap<i64, MatchOutcome>,
    summary: &mut SettlementSummary,
) -> Result<()> {
    let mut leg_statuses: Vec<(i64, BetStatus)> = Vec::new();
    let mut any_lost = false;
    let mut all_resolved = true;

    for sel in &entry.selections {
        if sel.status != "pending" {
            continue;
        }
        let Some(&outcome) = outcomes.get(&sel.fixture_id) else {
            all_resolved = false;
            continue;
        };
        let Some(code) = SelectionCode::parse(&sel.code) else {
            // An ungradeable code should never get past placement validation.
            // Leave the leg (and the bet) pending rather than guessing.
            warn!("Bet {} has ungradeable selection code {:?}", entry.bet.id, sel.code);
            all_resolved = false;
            continue;
        };

        if code.wins_against(outcome) {
            leg_statuses.push((sel.id, BetStatus::Won));
        } else {
            leg_statuses.push((sel.id, BetStatus::Lost));
            any_lost = true;
        }
    }

    let decision = if any_lost {
        Some((BetStatus::Lost, 0.0))
    } else if all_resolved {
        let payout = round2(entry.bet.stake * entry.bet.odds);
        Some((BetStatus::Won, payout))
    } else {
        // No losing leg yet, but some legs still unresolved — the combo stays
        // pending until its remaining fixtures finish.
        None
    };

    match decision {
        Some((status, payout)) => {
            let applied = bets::settle_bet(pool, entry.bet.id, status, payout, &leg_statuses).await?;
            if !applied {
                // Another settlement run got there first; nothing to credit.
                return Ok(());
            }
            summary.settled += 1;
            match status {
                BetStatus::Won => {
                    summary.won += 1;
                    summary.points_credited += payout;
                    bets::credit_points(pool, &entry.bet.user_id, payout).await?;
                }
                BetStatus::Lost => summary.lost += 1,
                _ => {}
            }
        }
        None => {
            summary.left_pending += 1;
            if !leg_statuses.is_empty() {
                // Record resolved winning legs even while the bet stays open.
                bets::settle_leg_statuses(pool, &leg_statuses).await?;
            }
        }
    }

    Ok(())
}

async fn upsert_match_result(
    pool: &SqlitePool,
    fx: &ProviderFixture,
    home_goals: i64,
    away_goals: i64,
    outcome: MatchOutcome,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO match_results
            (fixture_id, home_team, away_team, home_goals, away_goals, outcome, kickoff, finished_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(fixture_id) DO UPDATE SET
            home_goals = excluded.home_goals,
            away_goals = excluded.away_goals,
            outcome = excluded.outcome,
            finished_at = excluded.finished_at
        "#,
    )
    .bind(fx.fixture.id)
    .bind(&fx.teams.home.name)
    .bind(&fx.teams.away.name)
    .bind(home_goals)
    .bind(away_goals)
    .bind(outcome.to_string())
    .bind(fx.fixture.date)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::profiles::test_fixtures::{seed_league, seed_profile};
    use crate::db::test_pool;
    use crate::provider::{
        FixtureGoals, FixtureInfo, FixtureLeague, FixtureStatus, FixtureTeams, ProviderFixture,
        TeamInfo,
    };
    use crate::types::{validate_bet, PlaceBetRequest, PlaceSelection};
    use chrono::TimeZone;

    fn finished_fixture(id: i64, home_goals: Option<i64>, away_goals: Option<i64>) -> ProviderFixture {
        ProviderFixture {
            fixture: FixtureInfo {
                id,
                date: Utc.with_ymd_and_hms(2026, 3, 7, 20, 0, 0).unwrap(),
                status: FixtureStatus { short: "FT".to_string() },
            },
            teams: FixtureTeams {
                home: TeamInfo { id: 1, name: "Home FC".to_string() },
                away: TeamInfo { id: 2, name: "Away FC".to_string() },
            },
            league: FixtureLeague { id: 140, name: "La Liga".to_string(), season: 2025 },
            goals: FixtureGoals { home: home_goals, away: away_goals },
        }
    }

    async fn seed_user(pool: &sqlx::SqlitePool, id: &str) {
        seed_league(pool, &format!("league-{id}")).await;
        seed_profile(pool, id, Some(&format!("league-{id}")), 1000.0).await;
    }

    async fn place(
        pool: &sqlx::SqlitePool,
        user: &str,
        stake: f64,
        selections: Vec<(i64, &str, f64)>,
    ) -> i64 {
        let req = PlaceBetRequest {
            stake,
            week: 1,
            selections: selections
                .into_iter()
                .map(|(fixture_id, label, odds)| PlaceSelection {
                    fixture_id,
                    market: "Match Winner".to_string(),
                    selection: label.to_string(),
                    odds,
                })
                .collect(),
        };
        let bet = validate_bet(&req, 1.0, 5).unwrap();
        bets::place_bet(pool, user, &bet).await.unwrap()
    }

    async fn bet_state(pool: &sqlx::SqlitePool, bet_id: i64) -> (String, f64) {
        sqlx::query_as::<_, (String, f64)>("SELECT status, payout FROM bets WHERE id = ?")
            .bind(bet_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn total_points(pool: &sqlx::SqlitePool, user: &str) -> f64 {
        sqlx::query_scalar("SELECT total_points FROM profiles WHERE id = ?")
            .bind(user)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn home_win_pays_stake_times_odds() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        let bet_id = place(&pool, "u1", 100.0, vec![(10, "Home", 1.8)]).await;

        let summary = settle_finished_fixtures(&pool, &[finished_fixture(10, Some(2), Some(1))])
            .await
            .unwrap();

        assert_eq!(summary.settled, 1);
        assert_eq!(summary.won, 1);
        let (status, payout) = bet_state(&pool, bet_id).await;
        assert_eq!(status, "won");
        assert_eq!(payout, 180.0);
        assert_eq!(total_points(&pool, "u1").await, 180.0);
    }

    #[tokio::test]
    async fn draw_loses_an_away_selection() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        let bet_id = place(&pool, "u1", 50.0, vec![(11, "Away", 2.5)]).await;

        settle_finished_fixtures(&pool, &[finished_fixture(11, Some(1), Some(1))])
            .await
            .unwrap();

        let (status, payout) = bet_state(&pool, bet_id).await;
        assert_eq!(status, "lost");
        assert_eq!(payout, 0.0);
        assert_eq!(total_points(&pool, "u1").await, 0.0);
    }

    #[tokio::test]
    async fn fixtures_without_goals_are_skipped() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        let bet_id = place(&pool, "u1", 10.0, vec![(12, "Home", 1.5)]).await;

        let summary = settle_finished_fixtures(&pool, &[finished_fixture(12, None, Some(1))])
            .await
            .unwrap();

        assert_eq!(summary.fixtures_skipped_missing_goals, 1);
        assert_eq!(summary.settled, 0);
        let (status, _) = bet_state(&pool, bet_id).await;
        assert_eq!(status, "pending");
    }

    #[tokio::test]
    async fn rerunning_settlement_pays_nothing_twice() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        place(&pool, "u1", 100.0, vec![(13, "Home", 2.0)]).await;

        let fixtures = [finished_fixture(13, Some(3), Some(0))];
        settle_finished_fixtures(&pool, &fixtures).await.unwrap();
        assert_eq!(total_points(&pool, "u1").await, 200.0);

        let second = settle_finished_fixtures(&pool, &fixtures).await.unwrap();
        assert_eq!(second.settled, 0);
        assert_eq!(total_points(&pool, "u1").await, 200.0);
    }

    #[tokio::test]
    async fn credited_points_equal_sum_of_payouts() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        seed_user(&pool, "u2").await;
        place(&pool, "u1", 100.0, vec![(20, "Home", 1.8)]).await;
        place(&pool, "u1", 40.0, vec![(21, "Draw", 3.0)]).await;
        place(&pool, "u2", 25.0, vec![(20, "Away", 4.0)]).await;

        let summary = settle_finished_fixtures(
            &pool,
            &[
                finished_fixture(20, Some(2), Some(1)),
                finished_fixture(21, Some(0), Some(0)),
            ],
        )
        .await
        .unwrap();

        assert_eq!(summary.settled, 3);
        assert_eq!(summary.won, 2);
        assert_eq!(summary.lost, 1);

        let payout_sum: f64 = sqlx::query_scalar("SELECT SUM(payout) FROM bets")
            .fetch_one(&pool)
            .await
            .unwrap();
        let credited = total_points(&pool, "u1").await + total_points(&pool, "u2").await;
        assert_eq!(payout_sum, credited);
        assert_eq!(summary.points_credited, credited);
    }

    #[tokio::test]
    async fn combo_loses_when_any_leg_loses() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        let bet_id =
            place(&pool, "u1", 10.0, vec![(30, "Home", 2.0), (31, "Home", 1.5)]).await;

        settle_finished_fixtures(
            &pool,
            &[
                finished_fixture(30, Some(1), Some(0)),
                finished_fixture(31, Some(0), Some(2)),
            ],
        )
        .await
        .unwrap();

        let (status, payout) = bet_state(&pool, bet_id).await;
        assert_eq!(status, "lost");
        assert_eq!(payout, 0.0);
    }

    #[tokio::test]
    async fn lost_combo_marks_unresolved_legs_terminal() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        let bet_id =
            place(&pool, "u1", 10.0, vec![(35, "Home", 2.0), (36, "Away", 3.0)]).await;

        // Only the first leg's fixture has finished, and it loses the bet.
        settle_finished_fixtures(&pool, &[finished_fixture(35, Some(0), Some(1))])
            .await
            .unwrap();

        let (status, _) = bet_state(&pool, bet_id).await;
        assert_eq!(status, "lost");

        // The never-resolved second leg inherits the terminal status instead
        // of staying pending on a settled bet.
        let leg_statuses: Vec<String> = sqlx::query_scalar(
            "SELECT status FROM bet_selections WHERE bet_id = ? ORDER BY id",
        )
        .bind(bet_id)
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(leg_statuses, vec!["lost", "lost"]);
    }

    #[tokio::test]
    async fn combo_with_unresolved_leg_stays_pending_until_complete() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        let bet_id =
            place(&pool, "u1", 10.0, vec![(40, "Home", 2.0), (41, "Away", 3.0)]).await;

        // Only the first leg's fixture has finished; it wins.
        let first = settle_finished_fixtures(&pool, &[finished_fixture(40, Some(2), Some(0))])
            .await
            .unwrap();
        assert_eq!(first.left_pending, 1);
        let (status, _) = bet_state(&pool, bet_id).await;
        assert_eq!(status, "pending");

        // Second leg finishes and wins: whole combo resolves at 6.0 odds.
        settle_finished_fixtures(&pool, &[finished_fixture(41, Some(0), Some(1))])
            .await
            .unwrap();
        let (status, payout) = bet_state(&pool, bet_id).await;
        assert_eq!(status, "won");
        assert_eq!(payout, 60.0);
        assert_eq!(total_points(&pool, "u1").await, 60.0);
    }

    #[tokio::test]
    async fn cancelled_bet_is_never_settled() {
        let pool = test_pool().await;
        seed_user(&pool, "u1").await;
        let bet_id = place(&pool, "u1", 100.0, vec![(50, "Home", 1.8)]).await;
        assert!(bets::cancel_bet(&pool, bet_id, "u1").await.unwrap());

        settle_finished_fixtures(&pool, &[finished_fixture(50, Some(2), Some(1))])
            .await
            .unwrap();

        let (status, payout) = bet_state(&pool, bet_id).await;
        assert_eq!(status, "cancelled");
        assert_eq!(payout, 0.0);
        assert_eq!(total_points(&pool, "u1").await, 0.0);

        let leg_status: String =
            sqlx::query_scalar("SELECT status FROM bet_selections WHERE bet_id = ?")
                .bind(bet_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(leg_status, "cancelled");
    }

    #[tokio::test]
    async fn match_result_rows_are_upsert_only() {
        let pool = test_pool().await;
        let fixtures = [finished_fixture(60, Some(2), Some(2))];
        settle_finished_fixtures(&pool, &fixtures).await.unwrap();
        settle_finished_fixtures(&pool, &fixtures).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM match_results")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let outcome: String =
            sqlx::query_scalar("SELECT outcome FROM match_results WHERE fixture_id = 60")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(outcome, "draw");
    }
}
