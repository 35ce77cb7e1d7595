use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::{Config, FINISHED_FIXTURES_LOOKBACK};
use crate::error::{AppError, Result};

/// Envelope every provider endpoint wraps its payload in.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: Vec<T>,
}

// ---------------------------------------------------------------------------
// Provider payload types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderFixture {
    pub fixture: FixtureInfo,
    pub teams: FixtureTeams,
    pub league: FixtureLeague,
    #[serde(default)]
    pub goals: FixtureGoals,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureInfo {
    pub id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub status: FixtureStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureStatus {
    #[serde(default)]
    pub short: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureTeams {
    pub home: TeamInfo,
    pub away: TeamInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamInfo {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureLeague {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub season: i64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FixtureGoals {
    pub home: Option<i64>,
    pub away: Option<i64>,
}

/// Bookmaker odds block for one fixture, kept verbatim — the cache payload
/// stores the provider's nested bookmaker/market/selection structure as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderOdds {
    pub fixture: OddsFixtureRef,
    #[serde(default)]
    pub bookmakers: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OddsFixtureRef {
    pub id: i64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Thin client for the third-party football API.
///
/// No retry/backoff: a failed fetch propagates and the previous cache row
/// stays in place for stale reads.
#[derive(Clone)]
pub struct FootballApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FootballApi {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.football_api_url.clone(),
            api_key: cfg.football_api_key.clone(),
        })
    }

    /// Next `next` upcoming fixtures for a league/season.
    pub async fn upcoming_fixtures(
        &self,
        league_id: u32,
        season: u32,
        next: u32,
    ) -> Result<Vec<ProviderFixture>> {
        let url = format!(
            "{}/fixtures?league={}&season={}&next={}",
            self.base_url, league_id, season, next
        );
        let env: Envelope<ProviderFixture> = self.get_json(&url).await?;
        info!("Fetched {} upcoming fixtures for league {league_id}", env.response.len());
        Ok(env.response)
    }

    /// Last finished fixtures for a league/season, newest first.
    pub async fn finished_fixtures(
        &self,
        league_id: u32,
        season: u32,
    ) -> Result<Vec<ProviderFixture>> {
        let url = format!(
            "{}/fixtures?league={}&season={}&last={}&status=FT",
            self.base_url, league_id, season, FINISHED_FIXTURES_LOOKBACK
        );
        let env: Envelope<ProviderFixture> = self.get_json(&url).await?;
        info!("Fetched {} finished fixtures for league {league_id}", env.response.len());
        Ok(env.response)
    }

    /// Bookmaker odds for a single fixture. An empty envelope is not an
    /// error — the provider simply hasn't published odds yet, and the fixture
    /// goes into the payload with an empty bookmaker list. An error status,
    /// by contrast, propagates so callers abort before touching the cache.
    pub async fn fixture_odds(&self, fixture_id: i64) -> Result<Option<ProviderOdds>> {
        let url = format!("{}/odds?fixture={}", self.base_url, fixture_id);
        let env: Envelope<ProviderOdds> = self.get_json(&url).await?;
        if env.response.is_empty() {
            warn!("No odds published yet for fixture {fixture_id}");
        }
        Ok(env.response.into_iter().next())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .header("x-apisports-key", &self.api_key)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AppError::Provider { status: status.as_u16(), body });
        }
        Ok(serde_json::from_str(&body)?)
    }
}
