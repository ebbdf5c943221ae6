//! Optimizer observations and persisted per-link stream state.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::Row;

use crate::link::Link;
use crate::optimizer::{DecisionReason, OptimizerDecision, PairState};

use super::db::SqliteStore;
use super::transfers::link_from_row;

/// Mean and population standard deviation.
fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

impl SqliteStore {
    pub(super) async fn load_active_pairs(&self, since: i64) -> Result<Vec<Link>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT source_se, dest_se FROM transfers
            WHERE state IN ('submitted', 'active')
               OR (finished_at IS NOT NULL AND finished_at >= ?1)
            ORDER BY source_se, dest_se
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(link_from_row).collect())
    }

    pub(super) async fn load_pair_state(
        &self,
        link: &Link,
        now: i64,
        window: i64,
    ) -> Result<PairState> {
        let window = window.max(1);
        let mut state = PairState {
            timestamp: now,
            streams: 1,
            ..PairState::default()
        };

        let counts = sqlx::query(
            r#"
            SELECT COALESCE(SUM(CASE WHEN state = 'active' THEN 1 ELSE 0 END), 0) AS active,
                   COALESCE(SUM(CASE WHEN state = 'submitted' THEN 1 ELSE 0 END), 0) AS submitted
            FROM transfers
            WHERE source_se = ?1 AND dest_se = ?2
            "#,
        )
        .bind(link.source.as_str())
        .bind(link.destination.as_str())
        .fetch_one(&self.pool)
        .await?;
        state.active = counts.get::<i64, _>("active").max(0) as u64;
        state.queue_size = counts.get::<i64, _>("submitted").max(0) as u64;

        // Requests failed before they ever ran (started_at NULL) say nothing
        // about the link and are left out.
        let rows = sqlx::query(
            r#"
            SELECT state, file_size, started_at, finished_at, retries
            FROM transfers
            WHERE source_se = ?1 AND dest_se = ?2
              AND state IN ('finished', 'failed')
              AND started_at IS NOT NULL
              AND finished_at >= ?3 AND finished_at <= ?4
            "#,
        )
        .bind(link.source.as_str())
        .bind(link.destination.as_str())
        .bind(now - window)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut sizes = Vec::new();
        let mut durations = Vec::new();
        let mut failed = 0u64;
        let mut bytes = 0i64;
        for row in &rows {
            state.retry_count += row.get::<i64, _>("retries").max(0) as u64;
            let done: String = row.get("state");
            if done == "finished" {
                let size: i64 = row.get("file_size");
                let started: i64 = row.get("started_at");
                let finished: i64 = row.get("finished_at");
                bytes += size.max(0);
                sizes.push(size as f64);
                durations.push((finished - started).max(0) as f64);
            } else {
                failed += 1;
            }
        }
        let succeeded = sizes.len() as u64;
        state.completions = succeeded + failed;
        if state.completions > 0 {
            state.success_rate = succeeded as f64 / state.completions as f64;
        }
        state.throughput = bytes as f64 / window as f64;
        state.avg_duration = mean_stddev(&durations).0;
        (state.filesize_avg, state.filesize_stddev) = mean_stddev(&sizes);

        let optimizer = sqlx::query(
            r#"
            SELECT streams, ema, decided_at, stable FROM optimizer
            WHERE source_se = ?1 AND dest_se = ?2
            "#,
        )
        .bind(link.source.as_str())
        .bind(link.destination.as_str())
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = optimizer {
            state.streams = row.get::<i64, _>("streams").clamp(1, u32::MAX as i64) as u32;
            state.ema = row.get("ema");
            state.last_decision_at = Some(row.get("decided_at"));
            state.stable = row.get::<i64, _>("stable") != 0;
        }
        Ok(state)
    }

    /// A steady decision keeps the stored `decided_at`, so the hold it
    /// extends still expires `steady_interval_secs` after it began.
    pub(super) async fn save_decision(&self, decision: &OptimizerDecision) -> Result<()> {
        let steady = decision.reason == DecisionReason::Steady;
        sqlx::query(
            r#"
            INSERT INTO optimizer (source_se, dest_se, streams, ema, decided_at, stable)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (source_se, dest_se) DO UPDATE SET
                streams = excluded.streams,
                ema = excluded.ema,
                decided_at = CASE WHEN ?7 THEN optimizer.decided_at ELSE excluded.decided_at END,
                stable = CASE WHEN ?7 THEN optimizer.stable ELSE excluded.stable END
            "#,
        )
        .bind(decision.link.source.as_str())
        .bind(decision.link.destination.as_str())
        .bind(decision.streams as i64)
        .bind(decision.ema)
        .bind(decision.timestamp)
        .bind(decision.reason.is_hold() as i64)
        .bind(steady as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn load_stream_counts(&self) -> Result<HashMap<Link, u32>> {
        let rows = sqlx::query(r#"SELECT source_se, dest_se, streams FROM optimizer"#)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    link_from_row(row),
                    row.get::<i64, _>("streams").clamp(1, u32::MAX as i64) as u32,
                )
            })
            .collect())
    }
}
