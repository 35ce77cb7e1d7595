use sqlx::SqlitePool;

use crate::db::models::{LeagueRow, ProfileRow};
use crate::error::{AppError, Result};

pub async fn get_profile(pool: &SqlitePool, user_id: &str) -> Result<Option<ProfileRow>> {
    let row = sqlx::query_as::<_, ProfileRow>(
        "SELECT id, username, weekly_budget, total_points, league_id, role, global_role, \
         weekly_points FROM profiles WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_league(pool: &SqlitePool, league_id: &str) -> Result<Option<LeagueRow>> {
    let row = sqlx::query_as::<_, LeagueRow>(
        "SELECT id, name, kind, week, join_code FROM leagues WHERE id = ?",
    )
    .bind(league_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Detaches a user from their league: league/points/budget reset, weekly
/// history cleared, and all of the user's bet week markers zeroed. Returns
/// the prior profile state for audit.
pub async fn leave_league(pool: &SqlitePool, user_id: &str) -> Result<ProfileRow> {
    let mut tx = pool.begin().await?;

    let prior = sqlx::query_as::<_, ProfileRow>(
        "SELECT id, username, weekly_budget, total_points, league_id, role, global_role, \
         weekly_points FROM profiles WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("profile {user_id}")))?;

    sqlx::query(
        "UPDATE profiles SET league_id = NULL, total_points = 0.0, \
         weekly_budget = 1000.0, weekly_points = '{}', role = 'player' WHERE id = ?",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE bets SET week = 0 WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(prior)
}

/// Flips a league to the premium tier. Caller authorization (admin_league
/// role) is checked at the API layer.
pub async fn upgrade_league(pool: &SqlitePool, league_id: &str) -> Result<bool> {
    let updated = sqlx::query("UPDATE leagues SET kind = 'premium' WHERE id = ?")
        .bind(league_id)
        .execute(pool)
        .await?;
    Ok(updated.rows_affected() == 1)
}
