use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::config::{Config, ODDS_REFRESH_INTERVAL_SECS, SETTLEMENT_DELAY_HOURS};
use crate::db::models::OddsCacheRow;
use crate::db::settings;
use crate::error::Result;
use crate::provider::{FootballApi, ProviderFixture};
use crate::scheduler;
use crate::types::Competition;

#[derive(Debug, Clone)]
pub struct RefreshSummary {
    pub fixtures: usize,
    pub settle_at: Option<DateTime<Utc>>,
    pub job_name: Option<String>,
}

/// Fetches upcoming fixtures and their odds for one competition, overwrites
/// that competition's cache row wholesale, and schedules the one-shot
/// settlement run for 5 hours after the last kickoff.
///
/// Any provider failure propagates before the upsert, leaving the previous
/// row intact for stale reads.
pub async fn refresh(
    pool: &SqlitePool,
    api: &FootballApi,
    cfg: &Config,
    comp: Competition,
) -> Result<RefreshSummary> {
    let comp_cfg = cfg.competition(comp);
    let fixtures = api
        .upcoming_fixtures(comp_cfg.league_id, comp_cfg.season, comp_cfg.next_count)
        .await?;

    let mut entries = Vec::with_capacity(fixtures.len());
    for fx in &fixtures {
        let bookmakers = match api.fixture_odds(fx.fixture.id).await? {
            Some(odds) => odds.bookmakers,
            None => serde_json::Value::Array(Vec::new()),
        };
        entries.push(payload_entry(fx, bookmakers));
    }

    let payload = serde_json::to_string(&entries)?;
    sqlx::query(
        r#"
        INSERT INTO odds_cache (competition, payload, last_updated)
        VALUES (?, ?, ?)
        ON CONFLICT(competition) DO UPDATE SET
            payload = excluded.payload,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(comp.to_string())
    .bind(&payload)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    // Settlement fires a fixed offset after the latest fetched kickoff.
    let settle_at = fixtures
        .iter()
        .map(|f| f.fixture.date)
        .max()
        .map(|last| last + ChronoDuration::hours(SETTLEMENT_DELAY_HOURS));

    let job_name = match settle_at {
        Some(at) => {
            let name = scheduler::settlement_job_name(comp, at);
            scheduler::schedule_one_shot(pool, &name, comp, at).await?;
            info!("Scheduled {name} at {at} for {comp}");
            Some(name)
        }
        None => None,
    };

    info!("Cache refreshed for {comp}: {} fixtures", entries.len());
    Ok(RefreshSummary { fixtures: entries.len(), settle_at, job_name })
}

/// Normalized cache payload entry: `{fixture, teams, league, bookmakers}`.
fn payload_entry(fx: &ProviderFixture, bookmakers: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "fixture": { "id": fx.fixture.id, "date": fx.fixture.date },
        "teams": {
            "home": { "id": fx.teams.home.id, "name": fx.teams.home.name },
            "away": { "id": fx.teams.away.id, "name": fx.teams.away.name },
        },
        "league": { "id": fx.league.id, "name": fx.league.name, "season": fx.league.season },
        "bookmakers": bookmakers,
    })
}

pub async fn read(pool: &SqlitePool, comp: Competition) -> Result<Option<OddsCacheRow>> {
    let row = sqlx::query_as::<_, OddsCacheRow>(
        "SELECT competition, payload, last_updated FROM odds_cache WHERE competition = ?",
    )
    .bind(comp.to_string())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Kickoff lookup for the cutoff check: scan the cached payloads first, fall
/// back to the kickoff recorded in match_results.
pub async fn kickoff_for_fixture(
    pool: &SqlitePool,
    fixture_id: i64,
) -> Result<Option<DateTime<Utc>>> {
    let rows = sqlx::query_as::<_, OddsCacheRow>(
        "SELECT competition, payload, last_updated FROM odds_cache",
    )
    .fetch_all(pool)
    .await?;

    for row in rows {
        let entries: Vec<serde_json::Value> = serde_json::from_str(&row.payload)?;
        for entry in &entries {
            let id = entry.pointer("/fixture/id").and_then(|v| v.as_i64());
            if id == Some(fixture_id) {
                let date = entry
                    .pointer("/fixture/date")
                    .and_then(|v| v.as_str())
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc));
                if date.is_some() {
                    return Ok(date);
                }
            }
        }
    }

    let fallback: Option<Option<DateTime<Utc>>> =
        sqlx::query_scalar("SELECT kickoff FROM match_results WHERE fixture_id = ?")
            .bind(fixture_id)
            .fetch_optional(pool)
            .await?;
    Ok(fallback.flatten())
}

/// Background task that keeps every enabled competition's cache warm.
pub struct OddsRefresher {
    cfg: Config,
    pool: SqlitePool,
    api: FootballApi,
}

impl OddsRefresher {
    pub fn new(cfg: Config, pool: SqlitePool, api: FootballApi) -> Self {
        Self { cfg, pool, api }
    }

    pub async fn run(self) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(ODDS_REFRESH_INTERVAL_SECS));

        loop {
            interval.tick().await;
            for comp in Competition::ALL {
                match self.competition_enabled(comp).await {
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(e) => {
                        error!("Settings read failed for {comp}: {e}");
                        continue;
                    }
                }
                if let Err(e) = refresh(&self.pool, &self.api, &self.cfg, comp).await {
                    // Stale cache row stays in place; next tick retries.
                    error!("Cache refresh failed for {comp}: {e}");
                }
            }
        }
    }

    async fn competition_enabled(&self, comp: Competition) -> Result<bool> {
        match comp {
            Competition::LaLiga => Ok(true),
            Competition::CopaRey => settings::enable_coparey(&self.pool).await,
            Competition::Selecciones => settings::enable_selecciones(&self.pool).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompetitionConfig;
    use crate::db::test_pool;
    use crate::error::AppError;
    use chrono::TimeZone;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const FIXTURES_BODY: &str = r#"{
        "response": [{
            "fixture": {"id": 9, "date": "2026-03-07T20:00:00Z"},
            "teams": {"home": {"id": 1, "name": "A"}, "away": {"id": 2, "name": "B"}},
            "league": {"id": 140, "name": "La Liga", "season": 2025}
        }]
    }"#;

    /// Minimal one-route-per-path HTTP stub: /fixtures always succeeds,
    /// /odds answers with whatever status/body the test wants.
    async fn stub_provider(odds_status: u16, odds_body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let n = sock.read(&mut buf).await.unwrap_or(0);
                    let req = String::from_utf8_lossy(&buf[..n]);
                    let (status, body) = if req.starts_with("GET /fixtures") {
                        ("200 OK", FIXTURES_BODY)
                    } else {
                        match odds_status {
                            200 => ("200 OK", odds_body),
                            _ => ("500 Internal Server Error", odds_body),
                        }
                    };
                    let resp = format!(
                        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
                         content-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn stub_config(base_url: String) -> Config {
        let comp = CompetitionConfig { league_id: 140, season: 2025, next_count: 10 };
        Config {
            football_api_url: base_url,
            football_api_key: "k".to_string(),
            paypal_verify_url: "http://localhost".to_string(),
            internal_secret: "s".to_string(),
            service_role_key: "s".to_string(),
            jwt_secret: "s".to_string(),
            log_level: "info".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            laliga: comp,
            coparey: comp,
            selecciones: comp,
            cors_origins: vec!["*".to_string()],
        }
    }

    async fn seed_cache(pool: &SqlitePool, comp: Competition, payload: &str) {
        sqlx::query(
            "INSERT INTO odds_cache (competition, payload, last_updated) VALUES (?, ?, ?) \
             ON CONFLICT(competition) DO UPDATE SET payload = excluded.payload, \
             last_updated = excluded.last_updated",
        )
        .bind(comp.to_string())
        .bind(payload)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn cache_row_is_overwritten_wholesale() {
        let pool = test_pool().await;
        seed_cache(&pool, Competition::LaLiga, "[{\"fixture\":{\"id\":1}}]").await;
        seed_cache(&pool, Competition::LaLiga, "[{\"fixture\":{\"id\":2}}]").await;

        let row = read(&pool, Competition::LaLiga).await.unwrap().unwrap();
        assert!(row.payload.contains("\"id\":2"));
        assert!(!row.payload.contains("\"id\":1"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM odds_cache")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn kickoff_lookup_reads_cache_then_match_results() {
        let pool = test_pool().await;
        let kickoff = Utc.with_ymd_and_hms(2026, 3, 7, 20, 0, 0).unwrap();
        let payload = serde_json::json!([{
            "fixture": { "id": 42, "date": kickoff },
            "teams": {}, "league": {}, "bookmakers": []
        }])
        .to_string();
        seed_cache(&pool, Competition::LaLiga, &payload).await;

        assert_eq!(kickoff_for_fixture(&pool, 42).await.unwrap(), Some(kickoff));

        // Not in any payload: falls back to match_results.
        let old_kickoff = Utc.with_ymd_and_hms(2026, 2, 1, 18, 0, 0).unwrap();
        sqlx::query(
            "INSERT INTO match_results (fixture_id, home_team, away_team, home_goals, away_goals, \
             outcome, kickoff, finished_at) VALUES (7, 'A', 'B', 1, 0, 'home', ?, ?)",
        )
        .bind(old_kickoff)
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        assert_eq!(kickoff_for_fixture(&pool, 7).await.unwrap(), Some(old_kickoff));
        assert_eq!(kickoff_for_fixture(&pool, 999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn odds_endpoint_failure_leaves_previous_cache_row_untouched() {
        let pool = test_pool().await;
        let old_payload = r#"[{"fixture":{"id":9},"bookmakers":[{"name":"Bet365"}]}]"#;
        seed_cache(&pool, Competition::LaLiga, old_payload).await;

        let base_url = stub_provider(500, "boom").await;
        let cfg = stub_config(base_url);
        let api = FootballApi::new(&cfg).unwrap();

        let err = refresh(&pool, &api, &cfg, Competition::LaLiga).await.unwrap_err();
        assert!(matches!(err, AppError::Provider { status: 500, .. }));

        let row = read(&pool, Competition::LaLiga).await.unwrap().unwrap();
        assert_eq!(row.payload, old_payload);

        // Nothing was scheduled either: the refresh aborted before any write.
        let jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(jobs, 0);
    }

    #[tokio::test]
    async fn empty_odds_envelope_refreshes_with_empty_bookmakers() {
        let pool = test_pool().await;
        let base_url = stub_provider(200, r#"{"response": []}"#).await;
        let cfg = stub_config(base_url);
        let api = FootballApi::new(&cfg).unwrap();

        let summary = refresh(&pool, &api, &cfg, Competition::LaLiga).await.unwrap();
        assert_eq!(summary.fixtures, 1);

        let row = read(&pool, Competition::LaLiga).await.unwrap().unwrap();
        let entries: Vec<serde_json::Value> = serde_json::from_str(&row.payload).unwrap();
        assert_eq!(entries[0].pointer("/fixture/id").and_then(|v| v.as_i64()), Some(9));
        assert_eq!(entries[0]["bookmakers"], serde_json::json!([]));
    }
}
