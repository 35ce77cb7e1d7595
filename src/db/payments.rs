use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::Result;

/// Outcome of recording an IPN payment, deduplicated by transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    /// Same txn, same status — idempotent conflict, treated as success.
    AlreadyProcessed,
    /// Same txn, new status — status updated in place.
    StatusUpdated,
}

pub async fn record_payment(
    pool: &SqlitePool,
    txn_id: &str,
    status: &str,
    amount: f64,
    payer_email: Option<&str>,
    league_id: Option<&str>,
    kind: &str,
) -> Result<RecordOutcome> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT status FROM payments WHERE txn_id = ?")
            .bind(txn_id)
            .fetch_optional(pool)
            .await?;

    match existing {
        Some(prev) if prev == status => Ok(RecordOutcome::AlreadyProcessed),
        Some(_) => {
            sqlx::query("UPDATE payments SET status = ? WHERE txn_id = ?")
                .bind(status)
                .bind(txn_id)
                .execute(pool)
                .await?;
            Ok(RecordOutcome::StatusUpdated)
        }
        None => {
            sqlx::query(
                "INSERT INTO payments (txn_id, status, amount, payer_email, league_id, kind, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(txn_id)
            .bind(status)
            .bind(amount)
            .bind(payer_email)
            .bind(league_id)
            .bind(kind)
            .bind(Utc::now())
            .execute(pool)
            .await?;
            Ok(RecordOutcome::Inserted)
        }
    }
}
