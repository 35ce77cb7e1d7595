use crate::error::{AppError, Result};
use crate::types::Competition;

pub const FOOTBALL_API_URL: &str = "https://v3.football.api-sports.io";
pub const PAYPAL_VERIFY_URL: &str = "https://ipnpb.paypal.com/cgi-bin/webscr";

/// Hours to wait after the last fetched kickoff before settling the matchday.
pub const SETTLEMENT_DELAY_HOURS: i64 = 5;

/// How many finished fixtures the settlement processor looks back over.
pub const FINISHED_FIXTURES_LOOKBACK: u32 = 50;

/// Job runner poll interval (seconds).
pub const JOB_POLL_INTERVAL_SECS: u64 = 30;

/// Odds cache refresh interval (seconds) for the background refresher.
pub const ODDS_REFRESH_INTERVAL_SECS: u64 = 3600;

/// Defaults applied when the corresponding settings row is absent.
pub mod setting_defaults {
    pub const CUTOFF_MINUTES: i64 = 10;
    pub const MIN_STAKE: f64 = 1.0;
    pub const MAX_COMBO_SELECTIONS: usize = 5;
    pub const MAINTENANCE_MODE: bool = false;
    pub const DEVELOPER_MODE: bool = false;
    pub const ENABLE_COPAREY: bool = true;
    pub const ENABLE_SELECCIONES: bool = true;
}

/// Per-competition provider parameters.
#[derive(Debug, Clone, Copy)]
pub struct CompetitionConfig {
    pub league_id: u32,
    pub season: u32,
    /// How many upcoming fixtures a cache refresh pulls.
    pub next_count: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub football_api_url: String,
    pub football_api_key: String,
    pub paypal_verify_url: String,
    /// Shared secret for internal function-to-function calls (X_INTERNAL_SECRET).
    pub internal_secret: String,
    /// Service-level bearer credential (SERVICE_ROLE_KEY).
    pub service_role_key: String,
    /// HS256 secret for user JWTs (JWT_SECRET).
    pub jwt_secret: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub laliga: CompetitionConfig,
    pub coparey: CompetitionConfig,
    pub selecciones: CompetitionConfig,
    /// Allowed CORS origins; "*" means any.
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let season = std::env::var("SEASON")
            .unwrap_or_else(|_| "2025".to_string())
            .parse::<u32>()
            .map_err(|_| AppError::Config("SEASON must be a year".to_string()))?;

        Ok(Self {
            football_api_url: std::env::var("FOOTBALL_API_URL")
                .unwrap_or_else(|_| FOOTBALL_API_URL.to_string()),
            football_api_key: require_env("FOOTBALL_API_KEY")?,
            paypal_verify_url: std::env::var("PAYPAL_VERIFY_URL")
                .unwrap_or_else(|_| PAYPAL_VERIFY_URL.to_string()),
            internal_secret: require_env("X_INTERNAL_SECRET")?,
            service_role_key: require_env("SERVICE_ROLE_KEY")?,
            jwt_secret: require_env("JWT_SECRET")?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "jambol.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            laliga: CompetitionConfig {
                league_id: env_u32("LALIGA_LEAGUE_ID", 140),
                season,
                next_count: env_u32("LALIGA_NEXT_COUNT", 10),
            },
            coparey: CompetitionConfig {
                league_id: env_u32("COPAREY_LEAGUE_ID", 143),
                season,
                next_count: env_u32("COPAREY_NEXT_COUNT", 8),
            },
            selecciones: CompetitionConfig {
                league_id: env_u32("SELECCIONES_LEAGUE_ID", 5),
                season,
                next_count: env_u32("SELECCIONES_NEXT_COUNT", 10),
            },
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    pub fn competition(&self, comp: Competition) -> CompetitionConfig {
        match comp {
            Competition::LaLiga => self.laliga,
            Competition::CopaRey => self.coparey,
            Competition::Selecciones => self.selecciones,
        }
    }
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Config(format!("missing required env var {name}"))),
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}
