//! One reconciliation pass: read promotions, resolve banner dates, reconcile each product.
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::banner::model::merge_by_product;
use crate::banner::reconcile::{MetafieldStore, Reconciler, RunSummary};
use crate::banner::resolver::resolve;
use crate::config::Config;
use crate::database_ops::promotions::PromotionSource;
use crate::database_ops::shopify::product_gid;

/// Run the pass to completion. Only a source read failure (or a store missing
/// in apply mode) is an error; per-field remote failures are logged and counted.
pub async fn run(
    config: &Config,
    source: &dyn PromotionSource,
    store: Option<&dyn MetafieldStore>,
) -> Result<RunSummary> {
    let reconciler = Reconciler::new(config.mode, store, config.pacing)?;

    let rows = source
        .fetch_promotions()
        .await
        .context("failed to read promotions from the database")?;
    let raw_rows = rows.len();
    let records = merge_by_product(rows, product_gid);
    info!(raw_rows, products = records.len(), mode = %config.mode, "promotions loaded");

    let mut summary = RunSummary::default();
    if records.is_empty() {
        info!("no promotions returned; nothing to reconcile");
        return Ok(summary);
    }

    for record in &records {
        let fields = resolve(record, &config.offsets);
        info!(
            product_id = %record.product_id,
            source = ?record,
            resolved = ?fields,
            "resolved banner dates"
        );
        let reports = reconciler
            .reconcile_product(&record.product_id, &fields)
            .await;
        summary.record_product(&reports);
        reconciler.pace().await;
    }

    if summary.failed > 0 {
        warn!(failed = summary.failed, "some metafield calls failed; see errors above");
    }
    info!(
        mode = %reconciler.mode(),
        products = summary.products,
        planned_sets = summary.planned_sets,
        planned_clears = summary.planned_clears,
        reported = summary.reported,
        written = summary.written,
        deleted = summary.deleted,
        already_absent = summary.already_absent,
        failed = summary.failed,
        "run complete"
    );
    Ok(summary)
}
