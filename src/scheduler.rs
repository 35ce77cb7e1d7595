//! Durable one-shot job queue.
//!
//! Settlement runs are scheduled as named rows in `scheduled_jobs` and picked
//! up by the `JobRunner` background task. Completion is only recorded after a
//! successful run, so a failed settlement is retried on the next tick
//! (at-least-once delivery).

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::config::{Config, JOB_POLL_INTERVAL_SECS};
use crate::db::models::ScheduledJobRow;
use crate::error::Result;
use crate::provider::FootballApi;
use crate::settlement;
use crate::types::Competition;

/// Deterministic job name derived from the target timestamp, so re-running a
/// cache refresh with the same last fixture reschedules the same job instead
/// of piling up duplicates.
pub fn settlement_job_name(comp: Competition, run_at: DateTime<Utc>) -> String {
    format!("settle-{comp}-{}", run_at.timestamp())
}

/// Upserts a one-shot job. Same name → run time and target are replaced, and
/// any prior completion marker is cleared.
pub async fn schedule_one_shot(
    pool: &SqlitePool,
    name: &str,
    target: Competition,
    run_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO scheduled_jobs (name, target, run_at, created_at, completed_at)
        VALUES (?, ?, ?, ?, NULL)
        ON CONFLICT(name) DO UPDATE SET
            target = excluded.target,
            run_at = excluded.run_at,
            completed_at = NULL
        "#,
    )
    .bind(name)
    .bind(target.to_string())
    .bind(run_at)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Marks a job complete. Used both by the runner and by settlement calls that
/// arrive over HTTP carrying a `job_name`.
pub async fn mark_completed(pool: &SqlitePool, name: &str) -> Result<bool> {
    let updated = sqlx::query(
        "UPDATE scheduled_jobs SET completed_at = ? WHERE name = ? AND completed_at IS NULL",
    )
    .bind(Utc::now())
    .bind(name)
    .execute(pool)
    .await?;
    Ok(updated.rows_affected() == 1)
}

pub async fn due_jobs(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<ScheduledJobRow>> {
    let rows = sqlx::query_as::<_, ScheduledJobRow>(
        "SELECT name, target, run_at, created_at, completed_at FROM scheduled_jobs \
         WHERE completed_at IS NULL AND run_at <= ? ORDER BY run_at",
    )
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Background task that drains due jobs.
pub struct JobRunner {
    cfg: Config,
    pool: SqlitePool,
    api: FootballApi,
}

impl JobRunner {
    pub fn new(cfg: Config, pool: SqlitePool, api: FootballApi) -> Self {
        Self { cfg, pool, api }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(JOB_POLL_INTERVAL_SECS));
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            if let Err(e) = self.run_due_jobs().await {
                error!("Job runner error: {e}");
            }
        }
    }

    async fn run_due_jobs(&self) -> Result<()> {
        let jobs = due_jobs(&self.pool, Utc::now()).await?;
        for job in jobs {
            let Some(comp) = Competition::parse(&job.target) else {
                error!("Job {} has unknown target {:?}, completing to drop it", job.name, job.target);
                mark_completed(&self.pool, &job.name).await?;
                continue;
            };

            info!("Running scheduled job {} (target {comp})", job.name);
            match settlement::process_competition(&self.pool, &self.api, &self.cfg, comp).await {
                Ok(summary) => {
                    mark_completed(&self.pool, &job.name).await?;
                    info!(
                        "Job {} done: {} settled, {} won, {} lost",
                        job.name, summary.settled, summary.won, summary.lost
                    );
                }
                Err(e) => {
                    // Leave the job incomplete so the next tick retries it.
                    error!("Job {} failed, will retry: {e}", job.name);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use chrono::TimeZone;

    #[test]
    fn job_name_is_deterministic_for_a_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 3, 8, 1, 0, 0).unwrap();
        let a = settlement_job_name(Competition::LaLiga, at);
        let b = settlement_job_name(Competition::LaLiga, at);
        assert_eq!(a, b);
        assert_eq!(a, format!("settle-laliga-{}", at.timestamp()));
        assert_ne!(a, settlement_job_name(Competition::CopaRey, at));
    }

    #[tokio::test]
    async fn rescheduling_same_name_replaces_rather_than_duplicates() {
        let pool = test_pool().await;
        let first = Utc.with_ymd_and_hms(2026, 3, 8, 1, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 3, 8, 4, 0, 0).unwrap();

        schedule_one_shot(&pool, "settle-laliga-x", Competition::LaLiga, first)
            .await
            .unwrap();
        schedule_one_shot(&pool, "settle-laliga-x", Competition::LaLiga, later)
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let jobs = due_jobs(&pool, later).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].run_at, later);
    }

    #[tokio::test]
    async fn due_jobs_excludes_future_and_completed() {
        let pool = test_pool().await;
        let past = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

        schedule_one_shot(&pool, "due", Competition::LaLiga, past).await.unwrap();
        schedule_one_shot(&pool, "not-yet", Competition::LaLiga, future).await.unwrap();
        schedule_one_shot(&pool, "done", Competition::CopaRey, past).await.unwrap();
        assert!(mark_completed(&pool, "done").await.unwrap());

        let jobs = due_jobs(&pool, now).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "due");
    }
}
