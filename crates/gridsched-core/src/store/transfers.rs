//! Transfer rows: submission, queue reads, admission, completion.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::link::{Endpoint, Link};

use super::db::{unix_timestamp, SqliteStore};
use super::types::{
    LinkSummary, NewTransfer, QueueActivity, TransferId, TransferOutcome, TransferRequest,
    TransferState,
};

pub(super) fn link_from_row(row: &SqliteRow) -> Link {
    Link::new(
        Endpoint::new(row.get::<String, _>("source_se")),
        Endpoint::new(row.get::<String, _>("dest_se")),
    )
}

fn request_from_row(row: &SqliteRow) -> TransferRequest {
    TransferRequest {
        id: row.get("id"),
        job_id: row.get("job_id"),
        vo: row.get("vo"),
        activity: row.get("activity"),
        link: link_from_row(row),
        source_url: row.get("source_url"),
        dest_url: row.get("dest_url"),
        file_size: row.get("file_size"),
        priority: row.get::<i64, _>("priority") as i32,
        submitted_at: row.get("submitted_at"),
    }
}

impl SqliteStore {
    /// Queue a new transfer. The link is derived from the two URLs.
    pub async fn submit(&self, transfer: &NewTransfer) -> Result<TransferId> {
        let link = Link::from_urls(&transfer.source_url, &transfer.dest_url)?;
        let now = unix_timestamp();
        let id = sqlx::query(
            r#"
            INSERT INTO transfers (
                job_id, vo, activity, source_se, dest_se, source_url, dest_url,
                file_size, priority, state, submitted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&transfer.job_id)
        .bind(&transfer.vo)
        .bind(&transfer.activity)
        .bind(link.source.as_str())
        .bind(link.destination.as_str())
        .bind(&transfer.source_url)
        .bind(&transfer.dest_url)
        .bind(transfer.file_size)
        .bind(transfer.priority as i64)
        .bind(TransferState::Submitted.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub(super) async fn load_queued_links(&self) -> Result<Vec<Link>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT source_se, dest_se FROM transfers
            WHERE state = 'submitted'
            ORDER BY source_se, dest_se
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(link_from_row).collect())
    }

    pub(super) async fn load_queued_requests(
        &self,
        links: &[Link],
        per_link: usize,
    ) -> Result<Vec<TransferRequest>> {
        let limit = i64::try_from(per_link).unwrap_or(i64::MAX);
        let mut out = Vec::new();
        for link in links {
            let rows = sqlx::query(
                r#"
                SELECT id, job_id, vo, activity, source_se, dest_se, source_url,
                       dest_url, file_size, priority, submitted_at
                FROM transfers
                WHERE state = 'submitted' AND source_se = ?1 AND dest_se = ?2
                ORDER BY priority DESC, submitted_at ASC, id ASC
                LIMIT ?3
                "#,
            )
            .bind(link.source.as_str())
            .bind(link.destination.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            out.extend(rows.iter().map(request_from_row));
        }
        Ok(out)
    }

    pub(super) async fn load_queue_activity(&self, links: &[Link]) -> Result<Vec<QueueActivity>> {
        let mut out = Vec::new();
        for link in links {
            let rows = sqlx::query(
                r#"
                SELECT vo, activity,
                       SUM(CASE WHEN state = 'active' THEN 1 ELSE 0 END) AS active,
                       SUM(CASE WHEN state = 'submitted' THEN 1 ELSE 0 END) AS submitted
                FROM transfers
                WHERE source_se = ?1 AND dest_se = ?2
                  AND state IN ('active', 'submitted')
                GROUP BY vo, activity
                ORDER BY vo, activity
                "#,
            )
            .bind(link.source.as_str())
            .bind(link.destination.as_str())
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                out.push(QueueActivity {
                    link: link.clone(),
                    vo: row.get("vo"),
                    activity: row.get("activity"),
                    active: row.get::<i64, _>("active").max(0) as u64,
                    submitted: row.get::<i64, _>("submitted").max(0) as u64,
                });
            }
        }
        Ok(out)
    }

    /// Compare-and-update per id so two nodes can never both admit a request.
    pub(super) async fn admit_transfers(
        &self,
        ids: &[TransferId],
        node: &str,
    ) -> Result<Vec<TransferId>> {
        let now = unix_timestamp();
        let mut admitted = Vec::with_capacity(ids.len());
        let mut tx = self.pool.begin().await?;
        for &id in ids {
            let r = sqlx::query(
                r#"
                UPDATE transfers
                SET state = 'active',
                    node = ?1,
                    started_at = ?2
                WHERE id = ?3 AND state = 'submitted'
                "#,
            )
            .bind(node)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            if r.rows_affected() == 1 {
                admitted.push(id);
            }
        }
        tx.commit().await?;
        Ok(admitted)
    }

    pub(super) async fn count_active(&self, node: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM transfers WHERE state = 'active' AND node = ?1"#,
        )
        .bind(node)
        .fetch_one(&self.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    pub(super) async fn fail_transfers(&self, ids: &[TransferId], reason: &str) -> Result<u64> {
        let now = unix_timestamp();
        let mut failed = 0;
        let mut tx = self.pool.begin().await?;
        for &id in ids {
            let r = sqlx::query(
                r#"
                UPDATE transfers
                SET state = 'failed',
                    reason = ?1,
                    finished_at = ?2
                WHERE id = ?3 AND state = 'submitted'
                "#,
            )
            .bind(reason)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            failed += r.rows_affected();
        }
        tx.commit().await?;
        Ok(failed)
    }

    /// Record the completion of an active transfer. Returns false when the
    /// transfer was not active (unknown id, already finished, or requeued).
    pub async fn record_outcome(&self, id: TransferId, outcome: &TransferOutcome) -> Result<bool> {
        let now = unix_timestamp();
        let state = if outcome.success {
            TransferState::Finished
        } else {
            TransferState::Failed
        };
        let reason = if outcome.success {
            None
        } else {
            outcome.reason.as_deref()
        };
        let r = sqlx::query(
            r#"
            UPDATE transfers
            SET state = ?1,
                reason = ?2,
                retries = ?3,
                finished_at = ?4
            WHERE id = ?5 AND state = 'active'
            "#,
        )
        .bind(state.as_str())
        .bind(reason)
        .bind(outcome.retries as i64)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// State and failure reason of one transfer.
    pub async fn transfer_state(
        &self,
        id: TransferId,
    ) -> Result<Option<(TransferState, Option<String>)>> {
        let row = sqlx::query(r#"SELECT state, reason FROM transfers WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|row| {
            let state: String = row.get("state");
            TransferState::parse(&state).map(|s| (s, row.get("reason")))
        }))
    }

    /// Draining nodes stop beating but keep their running transfers, so they
    /// are never treated as dead here.
    pub(super) async fn requeue_orphaned(&self, now: i64, grace: i64) -> Result<u64> {
        let r = sqlx::query(
            r#"
            UPDATE transfers
            SET state = 'submitted',
                node = NULL,
                started_at = NULL
            WHERE state = 'active'
              AND (node IS NULL
                   OR node NOT IN (SELECT node FROM heartbeats
                                   WHERE beat_at >= ?1 OR drain = 1))
            "#,
        )
        .bind(now - grace)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Queued/active counts, stream count and EMA for every link with work.
    pub async fn link_summaries(&self) -> Result<Vec<LinkSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT t.source_se, t.dest_se,
                   SUM(CASE WHEN t.state = 'submitted' THEN 1 ELSE 0 END) AS submitted,
                   SUM(CASE WHEN t.state = 'active' THEN 1 ELSE 0 END) AS active,
                   COALESCE(o.streams, 1) AS streams,
                   COALESCE(o.ema, 0.0) AS ema
            FROM transfers t
            LEFT JOIN optimizer o
              ON o.source_se = t.source_se AND o.dest_se = t.dest_se
            WHERE t.state IN ('submitted', 'active')
            GROUP BY t.source_se, t.dest_se
            ORDER BY t.source_se, t.dest_se
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| LinkSummary {
                link: link_from_row(row),
                submitted: row.get::<i64, _>("submitted").max(0) as u64,
                active: row.get::<i64, _>("active").max(0) as u64,
                streams: row.get::<i64, _>("streams").clamp(1, u32::MAX as i64) as u32,
                ema: row.get("ema"),
            })
            .collect())
    }
}
