use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::auth::{authenticate_user, authorize_privileged};
use crate::api::payments::{apply_ipn, parse_ipn_fields, verify_ipn, IpnVerdict};
use crate::cache;
use crate::config::Config;
use crate::db::{bets, profiles, settings};
use crate::error::AppError;
use crate::provider::FootballApi;
use crate::settlement;
use crate::telemetry::Telemetry;
use crate::types::{validate_bet, Competition, PlaceBetRequest};

#[derive(Clone)]
pub struct ApiState {
    pub cfg: Config,
    pub pool: sqlx::SqlitePool,
    pub api: FootballApi,
    /// Client for outbound calls made on behalf of requests (IPN verify).
    pub http: reqwest::Client,
    pub telemetry: Arc<Telemetry>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats/invocations", get(invocation_stats))
        .route("/odds/:competition", get(get_odds))
        .route("/internal/cache/:competition/refresh", post(refresh_cache))
        .route("/internal/settle/:competition", post(run_settlement))
        .route("/bets", post(place_bet))
        .route("/bets/:id/cancel", post(cancel_bet))
        .route("/leagues/leave", post(leave_league))
        .route("/leagues/upgrade", post(upgrade_league))
        .route("/payments/ipn", post(paypal_ipn))
        .with_state(state)
}

fn parse_competition(s: &str) -> Result<Competition, AppError> {
    Competition::parse(s).ok_or_else(|| AppError::NotFound(format!("competition {s}")))
}

// ---------------------------------------------------------------------------
// Health & monitoring
// ---------------------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "jambol",
        "status": "ok",
        "time": Utc::now(),
    }))
}

async fn invocation_stats(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "invocations": state.telemetry.snapshot() }))
}

// ---------------------------------------------------------------------------
// Odds cache
// ---------------------------------------------------------------------------

async fn get_odds(
    State(state): State<ApiState>,
    Path(competition): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let comp = parse_competition(&competition)?;
    let row = cache::read(&state.pool, comp)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("odds cache for {comp}")))?;
    let payload: serde_json::Value = serde_json::from_str(&row.payload)?;
    Ok(Json(serde_json::json!({
        "competition": row.competition,
        "last_updated": row.last_updated,
        "payload": payload,
    })))
}

/// Privileged refresh of one competition's odds cache. Failures are reported
/// in-band with timing and key-presence diagnostics instead of a bare 500.
async fn refresh_cache(
    State(state): State<ApiState>,
    Path(competition): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    authorize_privileged(&state.cfg, &state.pool, &headers).await?;
    let comp = parse_competition(&competition)?;
    state.telemetry.record("cache_refresh");

    let started = Instant::now();
    match cache::refresh(&state.pool, &state.api, &state.cfg, comp).await {
        Ok(summary) => Ok((
            StatusCode::OK,
            Json(serde_json::json!({
                "ok": true,
                "competition": comp.to_string(),
                "fixtures": summary.fixtures,
                "settle_at": summary.settle_at,
                "job_name": summary.job_name,
                "elapsed_ms": started.elapsed().as_millis() as u64,
            })),
        )),
        Err(e) => Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "ok": false,
                "error": e.to_string(),
                "elapsed_ms": started.elapsed().as_millis() as u64,
                "api_key_present": !state.cfg.football_api_key.is_empty(),
                "internal_secret_present": !state.cfg.internal_secret.is_empty(),
            })),
        )),
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct SettleRequest {
    job_name: Option<String>,
}

async fn run_settlement(
    State(state): State<ApiState>,
    Path(competition): Path<String>,
    headers: HeaderMap,
    body: Option<Json<SettleRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    authorize_privileged(&state.cfg, &state.pool, &headers).await?;
    let comp = parse_competition(&competition)?;
    state.telemetry.record("settle");

    let job_name = body.and_then(|Json(b)| b.job_name);
    let summary = settlement::process_with_job(
        &state.pool,
        &state.api,
        &state.cfg,
        comp,
        job_name.as_deref(),
    )
    .await?;

    Ok(Json(serde_json::json!({
        "ok": true,
        "competition": comp.to_string(),
        "fixtures_finished": summary.fixtures_finished,
        "fixtures_skipped_missing_goals": summary.fixtures_skipped_missing_goals,
        "settled": summary.settled,
        "won": summary.won,
        "lost": summary.lost,
        "left_pending": summary.left_pending,
        "points_credited": summary.points_credited,
    })))
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct PlaceBetResponse {
    bet_id: i64,
    odds: f64,
    bet_type: String,
}

async fn place_bet(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<PlaceBetRequest>,
) -> Result<(StatusCode, Json<PlaceBetResponse>), AppError> {
    let user_id = authenticate_user(&state.cfg, &headers)?;
    state.telemetry.record("place_bet");

    if settings::maintenance_mode(&state.pool).await? {
        return Err(AppError::Validation(
            "betting is disabled for maintenance".to_string(),
        ));
    }

    let min_stake = settings::min_stake(&state.pool).await?;
    let max_selections = settings::max_combo_selections(&state.pool).await?;
    let bet = validate_bet(&req, min_stake, max_selections).map_err(AppError::Validation)?;

    // Cutoff gate: every fixture on the slip must still be open. Developer
    // mode lifts the gate so admins can exercise placement against past
    // fixtures.
    if !settings::developer_mode(&state.pool).await? {
        let cutoff_minutes = settings::cutoff_minutes(&state.pool).await?;
        let now = Utc::now();
        for sel in &bet.selections {
            let kickoff = cache::kickoff_for_fixture(&state.pool, sel.fixture_id)
                .await?
                .ok_or_else(|| {
                    AppError::Validation(format!(
                        "fixture {} is not available for betting",
                        sel.fixture_id
                    ))
                })?;
            if now >= kickoff - chrono::Duration::minutes(cutoff_minutes) {
                return Err(AppError::Validation(format!(
                    "betting closed for fixture {}",
                    sel.fixture_id
                )));
            }
        }
    }

    let bet_id = bets::place_bet(&state.pool, &user_id, &bet).await?;
    info!(
        "Bet {bet_id} placed by {user_id}: {} @ {:.2}",
        bet.bet_type, bet.odds
    );

    Ok((
        StatusCode::CREATED,
        Json(PlaceBetResponse {
            bet_id,
            odds: bet.odds,
            bet_type: bet.bet_type.to_string(),
        }),
    ))
}

async fn cancel_bet(
    State(state): State<ApiState>,
    Path(bet_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = authenticate_user(&state.cfg, &headers)?;
    let cancelled = bets::cancel_bet(&state.pool, bet_id, &user_id).await?;
    if !cancelled {
        return Err(AppError::Validation("bet is not cancellable".to_string()));
    }
    Ok(Json(serde_json::json!({
        "ok": true,
        "bet_id": bet_id,
        "status": "cancelled",
    })))
}

// ---------------------------------------------------------------------------
// Leagues
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LeaveLeagueRequest {
    user_id: String,
}

async fn leave_league(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<LeaveLeagueRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    // Privileged callers may detach anyone; a user may only detach themself.
    if authorize_privileged(&state.cfg, &state.pool, &headers)
        .await
        .is_err()
    {
        let caller = authenticate_user(&state.cfg, &headers)?;
        if caller != req.user_id {
            return Err(AppError::Unauthorized);
        }
    }

    let prior = profiles::leave_league(&state.pool, &req.user_id).await?;
    info!("User {} left league {:?}", req.user_id, prior.league_id);
    Ok(Json(serde_json::json!({
        "ok": true,
        "prior": {
            "league_id": prior.league_id,
            "total_points": prior.total_points,
            "weekly_budget": prior.weekly_budget,
            "role": prior.role,
        },
    })))
}

async fn upgrade_league(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = authenticate_user(&state.cfg, &headers)?;
    let profile = profiles::get_profile(&state.pool, &user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if profile.role != "admin_league" {
        return Err(AppError::Unauthorized);
    }
    let league_id = profile
        .league_id
        .ok_or_else(|| AppError::Validation("user has no league".to_string()))?;

    if !profiles::upgrade_league(&state.pool, &league_id).await? {
        return Err(AppError::NotFound(format!("league {league_id}")));
    }

    // Zero-amount audit record; the fixed txn id makes a repeated upgrade a
    // dedupe hit rather than a second row.
    crate::db::payments::record_payment(
        &state.pool,
        &format!("upgrade-{league_id}"),
        "Completed",
        0.0,
        None,
        Some(&league_id),
        "league_premium",
    )
    .await?;

    info!("League {league_id} upgraded to premium by {user_id}");
    Ok(Json(serde_json::json!({
        "ok": true,
        "league_id": league_id,
        "kind": "premium",
    })))
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

async fn paypal_ipn(
    State(state): State<ApiState>,
    body: String,
) -> Result<(StatusCode, String), AppError> {
    state.telemetry.record("paypal_ipn");

    match verify_ipn(&state.http, &state.cfg.paypal_verify_url, &body).await {
        Ok(IpnVerdict::Verified) => {}
        Ok(IpnVerdict::Invalid) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                "INVALID - verification failed".to_string(),
            ));
        }
        Err(e) => {
            return Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("INVALID - verification unavailable: {e}"),
            ));
        }
    }

    let fields = parse_ipn_fields(&body);
    apply_ipn(&state.pool, &fields).await
}
