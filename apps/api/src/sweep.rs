//! Retention sweep — hard-deletes soft-deleted resumes once their retention
//! window has passed, blob first, record second.
//!
//! One item's failure never stops the rest of the run. The blob store's
//! delete is idempotent, so a blob that disappeared earlier is not a failure;
//! only genuine store faults count. The record delete runs regardless of the
//! blob outcome — a stranded blob is recoverable noise, a stranded row keeps
//! resurfacing in every run.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::models::resume::SweepCandidate;
use crate::storage::BlobStore;

/// Soft-deleted resumes are kept this long before hard deletion.
pub const RETENTION_DAYS: i64 = 30;
/// One sweep per day; the first tick fires at startup.
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-run counters. `deleted + record_failures == examined`; blob failures
/// are tracked separately because they do not block the record delete.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub deleted: usize,
    pub record_failures: usize,
    pub blob_failures: usize,
}

/// Everything soft-deleted at or before this instant is eligible.
pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - ChronoDuration::days(RETENTION_DAYS)
}

/// Runs one sweep over all eligible resumes.
pub async fn run_retention_sweep(
    db: &PgPool,
    blobs: &dyn BlobStore,
) -> Result<SweepSummary, sqlx::Error> {
    let cutoff = retention_cutoff(Utc::now());
    info!("Starting cleanup run (cutoff {cutoff})");

    let candidates: Vec<SweepCandidate> = sqlx::query_as(
        "SELECT id, name, storage_key FROM resumes WHERE is_active = FALSE AND deleted_at IS NOT NULL AND deleted_at <= $1",
    )
    .bind(cutoff)
    .fetch_all(db)
    .await?;

    if candidates.is_empty() {
        info!("No resumes eligible for hard delete.");
        return Ok(SweepSummary::default());
    }

    info!("Found {} resumes eligible for hard delete.", candidates.len());
    let mut summary = SweepSummary {
        examined: candidates.len(),
        ..SweepSummary::default()
    };

    for resume in &candidates {
        let mut blob_deleted = true;
        if let Err(e) = blobs.delete(&resume.storage_key).await {
            blob_deleted = false;
            summary.blob_failures += 1;
            error!(
                "Failed to delete blob for resume {} ({}): {e}",
                resume.id, resume.name
            );
        }

        match sqlx::query("DELETE FROM resumes WHERE id = $1")
            .bind(resume.id)
            .execute(db)
            .await
        {
            Ok(_) => {
                summary.deleted += 1;
                info!(
                    "Permanently deleted resume {} ({}). Blob deleted: {blob_deleted}.",
                    resume.id, resume.name
                );
            }
            Err(e) => {
                summary.record_failures += 1;
                error!(
                    "Failed to delete resume record {} ({}): {e}",
                    resume.id, resume.name
                );
            }
        }
    }

    info!(
        "Cleanup run complete. Permanently deleted {} resumes. Record failures: {}. Blob failures: {}.",
        summary.deleted, summary.record_failures, summary.blob_failures
    );
    Ok(summary)
}

/// Spawns the daily sweep loop.
pub fn spawn(db: PgPool, blobs: Arc<dyn BlobStore>) -> JoinHandle<()> {
    info!("Scheduled daily resume retention sweep.");
    tokio::spawn(async move {
        let mut ticker = interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = run_retention_sweep(&db, blobs.as_ref()).await {
                error!("Error during cleanup run: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_retention_cutoff_is_thirty_days_back() {
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(retention_cutoff(now), expected);
    }

    #[test]
    fn test_summary_default_is_zeroed() {
        assert_eq!(
            SweepSummary::default(),
            SweepSummary {
                examined: 0,
                deleted: 0,
                record_failures: 0,
                blob_failures: 0
            }
        );
    }
}
