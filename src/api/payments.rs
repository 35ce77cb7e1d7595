//! PayPal IPN handling.
//!
//! The provider posts `application/x-www-form-urlencoded` notifications and
//! expects plaintext replies ("OK" / "INVALID - <reason>"). Authenticity is
//! checked by echoing the raw payload back to the verification endpoint with
//! `cmd=_notify-validate` prepended.

use std::collections::HashMap;

use axum::http::StatusCode;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::payments::{record_payment, RecordOutcome};
use crate::db::profiles;
use crate::error::Result;

const ACCEPTED_STATUSES: [&str; 2] = ["Completed", "Processed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpnVerdict {
    Verified,
    Invalid,
}

/// Echo the notification back to the provider for authenticity.
pub async fn verify_ipn(
    client: &reqwest::Client,
    verify_url: &str,
    raw_body: &str,
) -> Result<IpnVerdict> {
    let echo = format!("cmd=_notify-validate&{raw_body}");
    let resp = client
        .post(verify_url)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(echo)
        .send()
        .await?;
    let text = resp.text().await?;
    if text.trim() == "VERIFIED" {
        Ok(IpnVerdict::Verified)
    } else {
        Ok(IpnVerdict::Invalid)
    }
}

pub fn parse_ipn_fields(raw_body: &str) -> HashMap<String, String> {
    serde_urlencoded::from_str(raw_body).unwrap_or_default()
}

/// Applies a verified notification: dedupe by transaction id, record the
/// payment, and run the purchase side effect. Returns the plaintext reply
/// the provider expects.
pub async fn apply_ipn(
    pool: &SqlitePool,
    fields: &HashMap<String, String>,
) -> Result<(StatusCode, String)> {
    let Some(txn_id) = non_empty(fields, "txn_id") else {
        return Ok((StatusCode::BAD_REQUEST, "INVALID - missing txn_id".to_string()));
    };
    let Some(status) = non_empty(fields, "payment_status") else {
        return Ok((StatusCode::BAD_REQUEST, "INVALID - missing payment_status".to_string()));
    };

    if !ACCEPTED_STATUSES.contains(&status) {
        info!("IPN {txn_id} with status {status} ignored");
        return Ok((StatusCode::OK, format!("OK - Ignored ({status})")));
    }

    // The custom field carries the purchase correlation: "<kind>:<target id>".
    let Some(custom) = non_empty(fields, "custom") else {
        return Ok((StatusCode::BAD_REQUEST, "INVALID - missing custom reference".to_string()));
    };
    let Some((kind, target)) = custom.split_once(':').filter(|(k, t)| !k.is_empty() && !t.is_empty())
    else {
        return Ok((StatusCode::BAD_REQUEST, "INVALID - malformed custom reference".to_string()));
    };

    let amount = fields
        .get("mc_gross")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);
    let payer_email = non_empty(fields, "payer_email");
    let league_id = (kind == "league_premium").then_some(target);

    let outcome =
        record_payment(pool, txn_id, status, amount, payer_email, league_id, kind).await?;

    match outcome {
        RecordOutcome::AlreadyProcessed => {
            return Ok((StatusCode::OK, "OK - Already processed".to_string()));
        }
        RecordOutcome::StatusUpdated => {
            return Ok((StatusCode::OK, "OK - Status updated".to_string()));
        }
        RecordOutcome::Inserted => {}
    }

    match kind {
        "league_premium" => {
            if !profiles::upgrade_league(pool, target).await? {
                warn!("IPN {txn_id}: league {target} not found for premium upgrade");
            }
        }
        "pro" => {
            sqlx::query("UPDATE profiles SET role = 'pro' WHERE id = ?")
                .bind(target)
                .execute(pool)
                .await?;
        }
        other => warn!("IPN {txn_id}: unknown purchase kind {other:?}, payment recorded only"),
    }

    info!("IPN {txn_id} recorded ({kind} -> {target}, {amount})");
    Ok((StatusCode::OK, "OK".to_string()))
}

fn non_empty<'a>(fields: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    fields.get(key).map(|s| s.as_str()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::profiles::test_fixtures::{seed_league, seed_profile};
    use crate::db::test_pool;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn raw_body_parses_to_fields() {
        let parsed = parse_ipn_fields("txn_id=TX9&payment_status=Completed&mc_gross=9.99");
        assert_eq!(parsed.get("txn_id").unwrap(), "TX9");
        assert_eq!(parsed.get("mc_gross").unwrap(), "9.99");
    }

    #[tokio::test]
    async fn completed_payment_upgrades_league() {
        let pool = test_pool().await;
        seed_league(&pool, "lg1").await;

        let (code, body) = apply_ipn(
            &pool,
            &fields(&[
                ("txn_id", "TX1"),
                ("payment_status", "Completed"),
                ("mc_gross", "9.99"),
                ("custom", "league_premium:lg1"),
            ]),
        )
        .await
        .unwrap();

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "OK");
        let kind: String = sqlx::query_scalar("SELECT kind FROM leagues WHERE id = 'lg1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(kind, "premium");
    }

    #[tokio::test]
    async fn duplicate_txn_same_status_is_already_processed() {
        let pool = test_pool().await;
        seed_league(&pool, "lg1").await;
        let ipn = fields(&[
            ("txn_id", "TX2"),
            ("payment_status", "Completed"),
            ("custom", "league_premium:lg1"),
        ]);

        apply_ipn(&pool, &ipn).await.unwrap();
        let (code, body) = apply_ipn(&pool, &ipn).await.unwrap();

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "OK - Already processed");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn missing_correlation_fields_are_invalid() {
        let pool = test_pool().await;

        let (code, body) =
            apply_ipn(&pool, &fields(&[("payment_status", "Completed")])).await.unwrap();
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("INVALID"));

        let (code, body) = apply_ipn(
            &pool,
            &fields(&[("txn_id", "TX3"), ("payment_status", "Completed")]),
        )
        .await
        .unwrap();
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(body.contains("custom"));
    }

    #[tokio::test]
    async fn non_completed_status_is_acknowledged_without_side_effects() {
        let pool = test_pool().await;
        let (code, body) = apply_ipn(
            &pool,
            &fields(&[
                ("txn_id", "TX4"),
                ("payment_status", "Refunded"),
                ("custom", "league_premium:lg1"),
            ]),
        )
        .await
        .unwrap();

        assert_eq!(code, StatusCode::OK);
        assert!(body.starts_with("OK - Ignored"));
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn pro_purchase_flags_the_profile() {
        let pool = test_pool().await;
        seed_profile(&pool, "u9", None, 0.0).await;

        apply_ipn(
            &pool,
            &fields(&[
                ("txn_id", "TX5"),
                ("payment_status", "Processed"),
                ("custom", "pro:u9"),
            ]),
        )
        .await
        .unwrap();

        let role: String = sqlx::query_scalar("SELECT role FROM profiles WHERE id = 'u9'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(role, "pro");
    }
}
