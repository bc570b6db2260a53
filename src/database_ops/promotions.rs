use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;

use crate::banner::model::PromotionRecord;
use crate::database_ops::db::Db;

/// Where promotion rows come from. Any error here ends the run.
#[async_trait]
pub trait PromotionSource: Send + Sync {
    async fn fetch_promotions(&self) -> Result<Vec<PromotionRecord>>;
}

/// Runs the configured promotion query against Postgres.
///
/// The query must yield `product_id` (text or bigint) and the nullable date
/// columns `sale_start_date`, `sale_end_date`, `pi_start_date`, `pi_end_date`.
pub struct PromotionReader {
    db: Db,
    query: String,
}

impl PromotionReader {
    pub fn new(db: Db, query: impl Into<String>) -> Self {
        Self {
            db,
            query: query.into(),
        }
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl PromotionSource for PromotionReader {
    async fn fetch_promotions(&self) -> Result<Vec<PromotionRecord>> {
        let rows = sqlx::query(&self.query)
            .persistent(false)
            .fetch_all(&self.db.pool)
            .await
            .context("promotion query failed")?;
        debug!(raw_rows = rows.len(), "fetched promotion rows");

        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &PgRow) -> Result<PromotionRecord> {
    let product_id = match row.try_get::<Option<String>, _>("product_id") {
        Ok(id) => id,
        Err(_) => row
            .try_get::<Option<i64>, _>("product_id")
            .context("product_id must be a text or bigint column")?
            .map(|n| n.to_string()),
    };

    Ok(PromotionRecord {
        product_id: product_id.unwrap_or_default(),
        sale_start: date_column(row, "sale_start_date")?,
        sale_end: date_column(row, "sale_end_date")?,
        pi_start: date_column(row, "pi_start_date")?,
        pi_end: date_column(row, "pi_end_date")?,
    })
}

fn date_column(row: &PgRow, column: &str) -> Result<Option<NaiveDate>> {
    row.try_get::<Option<NaiveDate>, _>(column)
        .with_context(|| format!("{column} must be a nullable date column"))
}
