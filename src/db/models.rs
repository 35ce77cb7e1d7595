//! Database row types matching migrations/0001_init.sql.
//! Used by sqlx for typed queries.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OddsCacheRow {
    pub competition: String,
    pub payload: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BetRow {
    pub id: i64,
    pub user_id: String,
    pub stake: f64,
    pub odds: f64,
    pub bet_type: String,
    pub status: String,
    pub payout: f64,
    pub week: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BetSelectionRow {
    pub id: i64,
    pub bet_id: i64,
    pub fixture_id: i64,
    pub market: String,
    pub selection: String,
    pub code: String,
    pub odds: f64,
    pub status: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProfileRow {
    pub id: String,
    pub username: String,
    pub weekly_budget: f64,
    pub total_points: f64,
    pub league_id: Option<String>,
    pub role: String,
    pub global_role: String,
    pub weekly_points: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeagueRow {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub week: i64,
    pub join_code: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduledJobRow {
    pub name: String,
    pub target: String,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
