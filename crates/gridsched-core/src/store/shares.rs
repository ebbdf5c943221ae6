//! Share weights, link maxima and endpoint limits.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};
use sqlx::Row;

use crate::allocator::EndpointLimit;
use crate::link::{Endpoint, Link};

use super::db::SqliteStore;
use super::transfers::link_from_row;

impl SqliteStore {
    /// Set the weight of `vo` on `link`. Use the organization `public` for the
    /// catch-all share.
    pub async fn set_share(&self, link: &Link, vo: &str, weight: f64) -> Result<()> {
        if !(weight >= 0.0 && weight.is_finite()) {
            bail!("share weight must be a non-negative number, got {weight}");
        }
        sqlx::query(
            r#"
            INSERT INTO share_config (source_se, dest_se, vo, weight)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (source_se, dest_se, vo) DO UPDATE SET weight = excluded.weight
            "#,
        )
        .bind(link.source.as_str())
        .bind(link.destination.as_str())
        .bind(vo)
        .bind(weight)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_activity_share(&self, vo: &str, activity: &str, weight: f64) -> Result<()> {
        if !(weight >= 0.0 && weight.is_finite()) {
            bail!("activity weight must be a non-negative number, got {weight}");
        }
        sqlx::query(
            r#"
            INSERT INTO activity_shares (vo, activity, weight)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (vo, activity) DO UPDATE SET weight = excluded.weight
            "#,
        )
        .bind(vo)
        .bind(activity)
        .bind(weight)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Configure the maximum of concurrent transfers on `link`.
    pub async fn set_link_max(&self, link: &Link, max_active: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO link_config (source_se, dest_se, max_active)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (source_se, dest_se) DO UPDATE SET max_active = excluded.max_active
            "#,
        )
        .bind(link.source.as_str())
        .bind(link.destination.as_str())
        .bind(max_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_endpoint_limit(&self, endpoint: &Endpoint, limit: EndpointLimit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO endpoint_limits (endpoint, egress, ingress)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (endpoint) DO UPDATE SET
                egress = excluded.egress,
                ingress = excluded.ingress
            "#,
        )
        .bind(endpoint.as_str())
        .bind(limit.egress)
        .bind(limit.ingress)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(super) async fn load_link_configs(&self) -> Result<BTreeMap<Link, i64>> {
        let rows = sqlx::query(r#"SELECT source_se, dest_se, max_active FROM link_config"#)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (link_from_row(row), row.get::<i64, _>("max_active")))
            .collect())
    }

    pub(super) async fn load_endpoint_limits(&self) -> Result<HashMap<Endpoint, EndpointLimit>> {
        let rows = sqlx::query(r#"SELECT endpoint, egress, ingress FROM endpoint_limits"#)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    Endpoint::new(row.get::<String, _>("endpoint")),
                    EndpointLimit {
                        egress: row.get("egress"),
                        ingress: row.get("ingress"),
                    },
                )
            })
            .collect())
    }

    pub(super) async fn load_share_weights(&self, link: &Link) -> Result<HashMap<String, f64>> {
        let rows = sqlx::query(
            r#"
            SELECT vo, weight FROM share_config
            WHERE source_se = ?1 AND dest_se = ?2
            "#,
        )
        .bind(link.source.as_str())
        .bind(link.destination.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("vo"), row.get::<f64, _>("weight")))
            .collect())
    }

    pub(super) async fn load_activity_weights(
        &self,
    ) -> Result<HashMap<String, HashMap<String, f64>>> {
        let rows = sqlx::query(r#"SELECT vo, activity, weight FROM activity_shares"#)
            .fetch_all(&self.pool)
            .await?;
        let mut out: HashMap<String, HashMap<String, f64>> = HashMap::new();
        for row in rows {
            out.entry(row.get("vo"))
                .or_default()
                .insert(row.get("activity"), row.get("weight"));
        }
        Ok(out)
    }
}
