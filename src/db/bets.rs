use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::{BetRow, BetSelectionRow};
use crate::error::{AppError, Result};
use crate::types::{BetStatus, ValidatedBet};

/// A pending bet together with all of its legs, as loaded for settlement.
#[derive(Debug, Clone)]
pub struct BetWithSelections {
    pub bet: BetRow,
    pub selections: Vec<BetSelectionRow>,
}

/// Inserts a validated bet, debiting the stake from the user's weekly budget
/// in the same transaction. The guarded UPDATE is the budget check: zero rows
/// means insufficient funds, and nothing is written.
pub async fn place_bet(pool: &SqlitePool, user_id: &str, bet: &ValidatedBet) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let debited = sqlx::query(
        "UPDATE profiles SET weekly_budget = weekly_budget - ? WHERE id = ? AND weekly_budget >= ?",
    )
    .bind(bet.stake)
    .bind(user_id)
    .bind(bet.stake)
    .execute(&mut *tx)
    .await?;
    if debited.rows_affected() == 0 {
        return Err(AppError::Validation("insufficient weekly budget".to_string()));
    }

    let bet_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO bets (user_id, stake, odds, bet_type, status, payout, week, created_at)
        VALUES (?, ?, ?, ?, 'pending', 0.0, ?, ?)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(bet.stake)
    .bind(bet.odds)
    .bind(bet.bet_type.to_string())
    .bind(bet.week)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    for sel in &bet.selections {
        sqlx::query(
            r#"
            INSERT INTO bet_selections (bet_id, fixture_id, market, selection, code, odds, status)
            VALUES (?, ?, ?, ?, ?, ?, 'pending')
            "#,
        )
        .bind(bet_id)
        .bind(sel.fixture_id)
        .bind(&sel.market)
        .bind(&sel.selection)
        .bind(sel.code.encode())
        .bind(sel.odds)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(bet_id)
}

/// Cancels a bet iff it is still pending and owned by the caller, refunding
/// the stake in the same transaction. Returns false when the status guard
/// rejects the update (already settled, cancelled, or not the caller's bet).
pub async fn cancel_bet(pool: &SqlitePool, bet_id: i64, user_id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let stake: Option<f64> = sqlx::query_scalar(
        "SELECT stake FROM bets WHERE id = ? AND user_id = ? AND status = 'pending'",
    )
    .bind(bet_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(stake) = stake else {
        return Ok(false);
    };

    let cancelled = sqlx::query(
        "UPDATE bets SET status = 'cancelled' WHERE id = ? AND user_id = ? AND status = 'pending'",
    )
    .bind(bet_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    if cancelled.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query("UPDATE profiles SET weekly_budget = weekly_budget + ? WHERE id = ?")
        .bind(stake)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE bet_selections SET status = 'cancelled' WHERE bet_id = ? AND status = 'pending'")
        .bind(bet_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

/// Loads every still-pending bet that references at least one of the given
/// fixtures, with all of its selections. Re-querying on `status = 'pending'`
/// is what makes a settlement re-run a no-op for already-settled bets.
pub async fn pending_bets_for_fixtures(
    pool: &SqlitePool,
    fixture_ids: &[i64],
) -> Result<Vec<BetWithSelections>> {
    if fixture_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT DISTINCT b.id, b.user_id, b.stake, b.odds, b.bet_type, b.status, b.payout, \
         b.week, b.created_at \
         FROM bets b JOIN bet_selections s ON s.bet_id = b.id \
         WHERE b.status = 'pending' AND s.fixture_id IN (",
    );
    let mut separated = qb.separated(", ");
    for id in fixture_ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");

    let bets: Vec<BetRow> = qb.build_query_as().fetch_all(pool).await?;

    let mut out = Vec::with_capacity(bets.len());
    for bet in bets {
        let selections: Vec<BetSelectionRow> = sqlx::query_as(
            "SELECT id, bet_id, fixture_id, market, selection, code, odds, status \
             FROM bet_selections WHERE bet_id = ? ORDER BY id",
        )
        .bind(bet.id)
        .fetch_all(pool)
        .await?;
        out.push(BetWithSelections { bet, selections });
    }
    Ok(out)
}

/// Persists a settlement decision: bet status + payout plus per-leg statuses.
/// The WHERE guard keeps the pending → terminal transition one-way.
pub async fn settle_bet(
    pool: &SqlitePool,
    bet_id: i64,
    status: BetStatus,
    payout: f64,
    selection_statuses: &[(i64, BetStatus)],
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    for (selection_id, sel_status) in selection_statuses {
        sqlx::query("UPDATE bet_selections SET status = ? WHERE id = ?")
            .bind(sel_status.to_string())
            .bind(selection_id)
            .execute(&mut *tx)
            .await?;
    }

    let updated = sqlx::query(
        "UPDATE bets SET status = ?, payout = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(status.to_string())
    .bind(payout)
    .bind(bet_id)
    .execute(&mut *tx)
    .await?;

    // Legs whose fixtures never resolved (a combo lost early) inherit the
    // bet's terminal status so no selection stays pending on a settled bet.
    if updated.rows_affected() == 1 {
        sqlx::query("UPDATE bet_selections SET status = ? WHERE bet_id = ? AND status = 'pending'")
            .bind(status.to_string())
            .bind(bet_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(updated.rows_affected() == 1)
}

/// Updates leg statuses without touching the parent bet. Used when a combo
/// has winning legs resolved but other legs still waiting on fixtures.
pub async fn settle_leg_statuses(
    pool: &SqlitePool,
    selection_statuses: &[(i64, BetStatus)],
) -> Result<()> {
    for (selection_id, status) in selection_statuses {
        sqlx::query("UPDATE bet_selections SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(selection_id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Atomic point credit — a single in-database increment, never a
/// read-modify-write, so concurrent settlements cannot lose updates.
pub async fn credit_points(pool: &SqlitePool, user_id: &str, delta: f64) -> Result<()> {
    sqlx::query("UPDATE profiles SET total_points = total_points + ? WHERE id = ?")
        .bind(delta)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}
