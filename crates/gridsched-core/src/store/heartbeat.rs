//! Node heartbeats, drain flags and critical-loop passes.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::Row;

use crate::heartbeat::CriticalLoop;

use super::db::SqliteStore;
use super::types::{HeartbeatRecord, Membership};

impl SqliteStore {
    pub(super) async fn beat(
        &self,
        node: &str,
        now: i64,
        grace: i64,
    ) -> Result<Option<Membership>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO heartbeats (node, beat_at, drain)
            VALUES (?1, ?2, 0)
            ON CONFLICT (node) DO UPDATE SET beat_at = excluded.beat_at
            "#,
        )
        .bind(node)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let rows = sqlx::query(
            r#"
            SELECT node FROM heartbeats
            WHERE beat_at >= ?1 AND drain = 0
            ORDER BY node ASC
            "#,
        )
        .bind(now - grace)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let live: Vec<String> = rows.iter().map(|row| row.get("node")).collect();
        Ok(live
            .iter()
            .position(|n| n == node)
            .map(|index| Membership {
                index,
                count: live.len(),
            }))
    }

    pub(super) async fn load_drain(&self, node: &str) -> Result<bool> {
        let row = sqlx::query(r#"SELECT drain FROM heartbeats WHERE node = ?1"#)
            .bind(node)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some_and(|row| row.get::<i64, _>("drain") != 0))
    }

    /// Set the drain flag for `node`. Creates the heartbeat row (with a zero
    /// beat) if the node never beat.
    pub async fn set_drain_flag(&self, node: &str, drain: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO heartbeats (node, beat_at, drain)
            VALUES (?1, 0, ?2)
            ON CONFLICT (node) DO UPDATE SET drain = excluded.drain
            "#,
        )
        .bind(node)
        .bind(drain as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn save_pass(&self, node: &str, which: CriticalLoop, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loop_passes (node, loop_name, passed_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (node, loop_name) DO UPDATE SET passed_at = excluded.passed_at
            "#,
        )
        .bind(node)
        .bind(which.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn load_passes(&self, node: &str) -> Result<HashMap<CriticalLoop, i64>> {
        let rows = sqlx::query(r#"SELECT loop_name, passed_at FROM loop_passes WHERE node = ?1"#)
            .bind(node)
            .fetch_all(&self.pool)
            .await?;
        let mut out = HashMap::new();
        for row in rows {
            let name: String = row.get("loop_name");
            match CriticalLoop::parse(&name) {
                Some(which) => {
                    out.insert(which, row.get("passed_at"));
                }
                None => tracing::warn!(node, loop_name = %name, "unknown loop in loop_passes"),
            }
        }
        Ok(out)
    }

    /// All heartbeat rows, ordered by node id.
    pub async fn heartbeats(&self) -> Result<Vec<HeartbeatRecord>> {
        let rows = sqlx::query(r#"SELECT node, beat_at, drain FROM heartbeats ORDER BY node"#)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| HeartbeatRecord {
                node: row.get("node"),
                beat_at: row.get("beat_at"),
                drain: row.get::<i64, _>("drain") != 0,
            })
            .collect())
    }
}
