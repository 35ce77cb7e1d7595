//! Key/value feature flags, read with hardcoded defaults when absent.

use sqlx::SqlitePool;

use crate::config::setting_defaults;
use crate::error::Result;

pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

async fn get_bool(pool: &SqlitePool, key: &str, default: bool) -> Result<bool> {
    Ok(get(pool, key)
        .await?
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default))
}

pub async fn cutoff_minutes(pool: &SqlitePool) -> Result<i64> {
    Ok(get(pool, "cutoff_minutes")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(setting_defaults::CUTOFF_MINUTES))
}

pub async fn min_stake(pool: &SqlitePool) -> Result<f64> {
    Ok(get(pool, "min_stake")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(setting_defaults::MIN_STAKE))
}

pub async fn max_combo_selections(pool: &SqlitePool) -> Result<usize> {
    Ok(get(pool, "max_combo_selections")
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(setting_defaults::MAX_COMBO_SELECTIONS))
}

pub async fn maintenance_mode(pool: &SqlitePool) -> Result<bool> {
    get_bool(pool, "maintenance_mode", setting_defaults::MAINTENANCE_MODE).await
}

pub async fn developer_mode(pool: &SqlitePool) -> Result<bool> {
    get_bool(pool, "developer_mode", setting_defaults::DEVELOPER_MODE).await
}

pub async fn enable_coparey(pool: &SqlitePool) -> Result<bool> {
    get_bool(pool, "enable_coparey", setting_defaults::ENABLE_COPAREY).await
}

pub async fn enable_selecciones(pool: &SqlitePool) -> Result<bool> {
    get_bool(pool, "enable_selecciones", setting_defaults::ENABLE_SELECCIONES).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn absent_keys_fall_back_to_defaults() {
        let pool = test_pool().await;
        assert_eq!(cutoff_minutes(&pool).await.unwrap(), 10);
        assert_eq!(min_stake(&pool).await.unwrap(), 1.0);
        assert!(!maintenance_mode(&pool).await.unwrap());
        assert!(enable_coparey(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn stored_values_override_defaults() {
        let pool = test_pool().await;
        set(&pool, "cutoff_minutes", "30").await.unwrap();
        set(&pool, "maintenance_mode", "true").await.unwrap();
        assert_eq!(cutoff_minutes(&pool).await.unwrap(), 30);
        assert!(maintenance_mode(&pool).await.unwrap());
    }
}
