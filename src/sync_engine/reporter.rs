//! 실행 결과 집계 및 요약 출력
//!
//! The last stdout line of every run is `total deleted: <N>`; an external
//! orchestrator parses it to decide whether to schedule another run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::listing::PartitionResult;
use crate::sync_engine::scheduler::PartitionRun;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedPartition {
    pub partition_key: String,
    pub error: String,
    /// Listings ended and reconciled before the failure.
    pub deleted_count: u64,
    pub rows_affected: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub total_deleted: u64,
    pub total_rows_affected: u64,
    pub partitions: Vec<PartitionResult>,
    pub rate_limited_partitions: Vec<String>,
    pub failed_partitions: Vec<FailedPartition>,
    pub cancelled_partitions: Vec<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_millis<S: serde::Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(elapsed.as_millis())
}

impl RunSummary {
    /// Summary of a run that never reached the partition stage.
    pub fn empty(run_id: Uuid, started_at: DateTime<Utc>, elapsed: Duration) -> Self {
        Self::from_runs(run_id, started_at, elapsed, Vec::new())
    }

    pub fn from_runs(run_id: Uuid, started_at: DateTime<Utc>, elapsed: Duration, runs: Vec<PartitionRun>) -> Self {
        let mut partitions = Vec::new();
        let mut failed_partitions = Vec::new();

        for run in runs {
            match run {
                PartitionRun::Completed(result) => partitions.push(result),
                PartitionRun::Failed { partial, error } => failed_partitions.push(FailedPartition {
                    partition_key: partial.partition_key,
                    error: error.to_string(),
                    deleted_count: partial.deleted_count,
                    rows_affected: partial.rows_affected,
                }),
            }
        }

        let mut rate_limited_partitions: Vec<String> = partitions
            .iter()
            .filter(|p| p.was_rate_limited)
            .map(|p| p.partition_key.clone())
            .collect();
        rate_limited_partitions.sort();

        let mut cancelled_partitions: Vec<String> = partitions
            .iter()
            .filter(|p| p.was_cancelled)
            .map(|p| p.partition_key.clone())
            .collect();
        cancelled_partitions.sort();

        Self {
            run_id,
            started_at,
            elapsed,
            total_deleted: partitions.iter().map(|p| p.deleted_count).sum::<u64>()
                + failed_partitions.iter().map(|f| f.deleted_count).sum::<u64>(),
            total_rows_affected: partitions.iter().map(|p| p.rows_affected).sum::<u64>()
                + failed_partitions.iter().map(|f| f.rows_affected).sum::<u64>(),
            partitions,
            rate_limited_partitions,
            failed_partitions,
            cancelled_partitions,
        }
    }

    pub fn summary_line(&self) -> String {
        format!("total deleted: {}", self.total_deleted)
    }

    /// `None` when no partition was cut short.
    pub fn rate_limited_line(&self) -> Option<String> {
        if self.rate_limited_partitions.is_empty() {
            None
        } else {
            Some(format!("rate limited partitions: {}", self.rate_limited_partitions.join(", ")))
        }
    }

    pub fn is_clean(&self) -> bool {
        self.rate_limited_partitions.is_empty()
            && self.failed_partitions.is_empty()
            && self.cancelled_partitions.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Per-partition lines followed by the summary line, which is always last.
    pub fn report_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .partitions
            .iter()
            .map(|p| {
                format!(
                    "partition {}: deleted {}{}{}",
                    p.partition_key,
                    p.deleted_count,
                    if p.was_rate_limited { " (rate limited)" } else { "" },
                    if p.was_cancelled { " (cancelled)" } else { "" },
                )
            })
            .collect();
        lines.extend(
            self.failed_partitions
                .iter()
                .map(|f| format!("partition {}: deleted {} then failed ({})", f.partition_key, f.deleted_count, f.error)),
        );
        lines.extend(self.rate_limited_line());
        lines.push(self.summary_line());
        lines
    }

    /// Writes the report lines to `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        for line in self.report_lines() {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }

    /// Logs the outcome and writes the report to `out` (stdout in the binary).
    pub fn emit<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        if let Some(line) = self.rate_limited_line() {
            warn!("⚠️ {}", line);
        }
        for failed in &self.failed_partitions {
            warn!("❌ {}: {}", failed.partition_key, failed.error);
        }
        info!(
            run_id = %self.run_id,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "🧾 {} ({} local row(s))",
            self.summary_line(),
            self.total_rows_affected
        );

        self.write_to(out)
    }
}
