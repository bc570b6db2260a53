//! Per-product write-or-delete decisions and their execution.
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{error, info};

use super::model::{BannerField, BannerFieldSet};
use crate::config::ExecutionMode;

/// Remote side of reconciliation: date metafields on a product.
///
/// Writes are idempotent. Deletes go through ids, so callers look up which
/// fields exist first.
#[async_trait]
pub trait MetafieldStore: Send + Sync {
    /// Create or overwrite the date metafield `key` on `product_id`.
    async fn set_date(&self, product_id: &str, key: &str, value: NaiveDate) -> Result<()>;

    /// Ids of the metafields among `keys` that currently exist, keyed by metafield key.
    async fn existing_metafield_ids(
        &self,
        product_id: &str,
        keys: &[&str],
    ) -> Result<HashMap<String, String>>;

    async fn delete_metafield(&self, metafield_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAction {
    Set(NaiveDate),
    Clear,
}

impl fmt::Display for FieldAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldAction::Set(date) => write!(f, "set {date}"),
            FieldAction::Clear => f.write_str("clear"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOutcome {
    /// Logged only (read-only or simulate mode).
    Reported,
    Written,
    Deleted,
    /// Clear requested but the remote field did not exist.
    AlreadyAbsent,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldReport {
    pub field: BannerField,
    pub action: FieldAction,
    pub outcome: FieldOutcome,
}

/// Set every present field, clear every absent one, in [`BannerField::ALL`] order.
pub fn plan(fields: &BannerFieldSet) -> [(BannerField, FieldAction); 4] {
    BannerField::ALL.map(|field| {
        let action = match fields.get(field) {
            Some(date) => FieldAction::Set(date),
            None => FieldAction::Clear,
        };
        (field, action)
    })
}

/// Counts for the end-of-run log line. Failures are only counted here; their
/// details go to the log as they happen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub products: usize,
    pub planned_sets: usize,
    pub planned_clears: usize,
    pub reported: usize,
    pub written: usize,
    pub deleted: usize,
    pub already_absent: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn record_product(&mut self, reports: &[FieldReport]) {
        self.products += 1;
        for report in reports {
            match report.action {
                FieldAction::Set(_) => self.planned_sets += 1,
                FieldAction::Clear => self.planned_clears += 1,
            }
            match report.outcome {
                FieldOutcome::Reported => self.reported += 1,
                FieldOutcome::Written => self.written += 1,
                FieldOutcome::Deleted => self.deleted += 1,
                FieldOutcome::AlreadyAbsent => self.already_absent += 1,
                FieldOutcome::Failed => self.failed += 1,
            }
        }
    }
}

pub struct Reconciler<'a> {
    mode: ExecutionMode,
    store: Option<&'a dyn MetafieldStore>,
    pacing: Duration,
}

impl<'a> Reconciler<'a> {
    /// `store` may be `None` unless the mode is [`ExecutionMode::Apply`].
    pub fn new(
        mode: ExecutionMode,
        store: Option<&'a dyn MetafieldStore>,
        pacing: Duration,
    ) -> Result<Self> {
        if mode == ExecutionMode::Apply && store.is_none() {
            return Err(anyhow!("apply mode needs a metafield store"));
        }
        Ok(Self {
            mode,
            store,
            pacing,
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Decide and carry out the four field actions for one product. Remote
    /// failures are logged and reported per field; they never abort.
    pub async fn reconcile_product(
        &self,
        product_id: &str,
        fields: &BannerFieldSet,
    ) -> Vec<FieldReport> {
        let planned = plan(fields);
        match (self.mode, self.store) {
            (ExecutionMode::Apply, Some(store)) => self.apply(store, product_id, &planned).await,
            _ => planned
                .iter()
                .map(|&(field, action)| self.report_only(product_id, field, action))
                .collect(),
        }
    }

    fn report_only(
        &self,
        product_id: &str,
        field: BannerField,
        action: FieldAction,
    ) -> FieldReport {
        match self.mode {
            ExecutionMode::Simulate => info!(
                product_id,
                field = field.key(),
                action = %action,
                "dry run: remote call skipped"
            ),
            _ => info!(
                product_id,
                field = field.key(),
                action = %action,
                "db only: intended action"
            ),
        }
        FieldReport {
            field,
            action,
            outcome: FieldOutcome::Reported,
        }
    }

    async fn apply(
        &self,
        store: &dyn MetafieldStore,
        product_id: &str,
        planned: &[(BannerField, FieldAction)],
    ) -> Vec<FieldReport> {
        let clear_keys: Vec<&str> = planned
            .iter()
            .filter(|(_, action)| *action == FieldAction::Clear)
            .map(|(field, _)| field.key())
            .collect();

        // One lookup per product decides which clears need a delete call.
        let existing = if clear_keys.is_empty() {
            Ok(HashMap::new())
        } else {
            store.existing_metafield_ids(product_id, &clear_keys).await
        };
        if let Err(e) = &existing {
            error!(
                product_id,
                fields = ?clear_keys,
                "metafield lookup failed; clears for this product are skipped: {e:#}"
            );
        }

        let mut reports = Vec::with_capacity(planned.len());
        for &(field, action) in planned {
            let outcome = match action {
                FieldAction::Set(date) => {
                    match store.set_date(product_id, field.key(), date).await {
                        Ok(()) => {
                            info!(
                                product_id,
                                field = field.key(),
                                value = %date,
                                "metafield written"
                            );
                            FieldOutcome::Written
                        }
                        Err(e) => {
                            error!(
                                product_id,
                                field = field.key(),
                                action = "set",
                                value = %date,
                                "metafield write failed: {e:#}"
                            );
                            FieldOutcome::Failed
                        }
                    }
                }
                FieldAction::Clear => match &existing {
                    Err(_) => {
                        error!(
                            product_id,
                            field = field.key(),
                            action = "clear",
                            "metafield clear skipped: lookup failed"
                        );
                        FieldOutcome::Failed
                    }
                    Ok(ids) => match ids.get(field.key()) {
                        None => {
                            info!(product_id, field = field.key(), "metafield already absent");
                            FieldOutcome::AlreadyAbsent
                        }
                        Some(metafield_id) => match store.delete_metafield(metafield_id).await {
                            Ok(()) => {
                                info!(product_id, field = field.key(), "metafield deleted");
                                FieldOutcome::Deleted
                            }
                            Err(e) => {
                                error!(
                                    product_id,
                                    field = field.key(),
                                    action = "clear",
                                    metafield_id = %metafield_id,
                                    "metafield delete failed: {e:#}"
                                );
                                FieldOutcome::Failed
                            }
                        },
                    },
                },
            };
            reports.push(FieldReport {
                field,
                action,
                outcome,
            });
        }
        reports
    }

    /// Pause between products so live runs stay under the API rate limit.
    pub async fn pace(&self) {
        if self.mode == ExecutionMode::Apply && !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{metafield_id, Call, RecordingStore};
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sale_only() -> BannerFieldSet {
        BannerFieldSet {
            sale_start: Some(d("2025-05-29")),
            sale_end: Some(d("2025-06-15")),
            pi_start: None,
            pi_end: None,
        }
    }

    fn outcomes(reports: &[FieldReport]) -> Vec<FieldOutcome> {
        reports.iter().map(|r| r.outcome).collect()
    }

    #[test]
    fn plan_sets_present_and_clears_absent_fields() {
        let planned = plan(&sale_only());
        assert_eq!(
            planned,
            [
                (BannerField::SaleStart, FieldAction::Set(d("2025-05-29"))),
                (BannerField::SaleEnd, FieldAction::Set(d("2025-06-15"))),
                (BannerField::PiStart, FieldAction::Clear),
                (BannerField::PiEnd, FieldAction::Clear),
            ]
        );
    }

    #[test]
    fn plan_for_empty_set_is_four_clears() {
        let planned = plan(&BannerFieldSet::default());
        assert!(planned.iter().all(|(_, a)| *a == FieldAction::Clear));
    }

    #[test]
    fn apply_mode_requires_store() {
        assert!(Reconciler::new(ExecutionMode::Apply, None, Duration::ZERO).is_err());
        assert!(Reconciler::new(ExecutionMode::ReadOnly, None, Duration::ZERO).is_ok());
        assert!(Reconciler::new(ExecutionMode::Simulate, None, Duration::ZERO).is_ok());
    }

    #[tokio::test]
    async fn read_only_and_simulate_never_touch_the_store() {
        for mode in [ExecutionMode::ReadOnly, ExecutionMode::Simulate] {
            let store = RecordingStore::default();
            let reconciler = Reconciler::new(mode, Some(&store), Duration::ZERO).unwrap();
            let reports = reconciler
                .reconcile_product("gid://shopify/Product/1", &sale_only())
                .await;

            assert_eq!(reports.len(), 4);
            assert!(reports.iter().all(|r| r.outcome == FieldOutcome::Reported));
            assert_eq!(reports[0].action, FieldAction::Set(d("2025-05-29")));
            assert_eq!(reports[3].action, FieldAction::Clear);
            assert!(store.calls().is_empty(), "{mode} issued remote calls");
        }
    }

    #[tokio::test]
    async fn apply_writes_present_fields_and_deletes_existing_absent_ones() {
        let pid = "gid://shopify/Product/1";
        let store =
            RecordingStore::with_existing(&[(pid, "promo_pi_start_date", d("2025-01-01"))]);
        let reconciler =
            Reconciler::new(ExecutionMode::Apply, Some(&store), Duration::ZERO).unwrap();

        let reports = reconciler.reconcile_product(pid, &sale_only()).await;
        assert_eq!(
            outcomes(&reports),
            [
                FieldOutcome::Written,
                FieldOutcome::Written,
                FieldOutcome::Deleted,
                FieldOutcome::AlreadyAbsent,
            ]
        );
        assert_eq!(
            store.calls(),
            vec![
                Call::Lookup(
                    pid.into(),
                    vec!["promo_pi_start_date".into(), "promo_pi_end_date".into()]
                ),
                Call::Set(pid.into(), "promo_sale_start_date".into(), d("2025-05-29")),
                Call::Set(pid.into(), "promo_sale_end_date".into(), d("2025-06-15")),
                Call::Delete(format!("{pid}/promo_pi_start_date")),
            ]
        );
    }

    #[tokio::test]
    async fn absent_sale_start_is_never_written() {
        let pid = "gid://shopify/Product/9";
        let store = RecordingStore::default();
        let reconciler =
            Reconciler::new(ExecutionMode::Apply, Some(&store), Duration::ZERO).unwrap();
        let fields = BannerFieldSet {
            pi_start: Some(d("2025-06-29")),
            pi_end: Some(d("2025-07-06")),
            ..BannerFieldSet::default()
        };

        reconciler.reconcile_product(pid, &fields).await;
        assert!(!store
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Set(_, key, _) if key == "promo_sale_start_date")));
    }

    #[tokio::test]
    async fn all_absent_with_nothing_remote_is_four_no_op_clears() {
        let store = RecordingStore::default();
        let reconciler =
            Reconciler::new(ExecutionMode::Apply, Some(&store), Duration::ZERO).unwrap();

        let reports = reconciler
            .reconcile_product("gid://shopify/Product/3", &BannerFieldSet::default())
            .await;
        assert!(reports.iter().all(|r| r.action == FieldAction::Clear));
        assert!(reports.iter().all(|r| r.outcome == FieldOutcome::AlreadyAbsent));
        assert_eq!(store.calls().len(), 1, "only the lookup should be issued");
    }

    #[tokio::test]
    async fn failed_write_does_not_stop_other_fields() {
        let pid = "gid://shopify/Product/4";
        let store = RecordingStore {
            fail_set_ids: vec![metafield_id(pid, "promo_sale_start_date")],
            ..RecordingStore::default()
        };
        let reconciler =
            Reconciler::new(ExecutionMode::Apply, Some(&store), Duration::ZERO).unwrap();

        let reports = reconciler.reconcile_product(pid, &sale_only()).await;
        assert_eq!(
            outcomes(&reports),
            [
                FieldOutcome::Failed,
                FieldOutcome::Written,
                FieldOutcome::AlreadyAbsent,
                FieldOutcome::AlreadyAbsent,
            ]
        );
    }

    #[tokio::test]
    async fn failed_delete_does_not_stop_other_fields() {
        let pid = "gid://shopify/Product/6";
        let store = RecordingStore {
            fail_delete_ids: vec![metafield_id(pid, "promo_pi_start_date")],
            ..RecordingStore::with_existing(&[
                (pid, "promo_pi_start_date", d("2025-01-01")),
                (pid, "promo_pi_end_date", d("2025-01-09")),
            ])
        };
        let reconciler =
            Reconciler::new(ExecutionMode::Apply, Some(&store), Duration::ZERO).unwrap();

        let reports = reconciler.reconcile_product(pid, &sale_only()).await;
        assert_eq!(
            outcomes(&reports),
            [
                FieldOutcome::Written,
                FieldOutcome::Written,
                FieldOutcome::Failed,
                FieldOutcome::Deleted,
            ]
        );
        let existing = store.existing.lock().unwrap();
        assert!(existing.contains_key(&(pid.to_string(), "promo_pi_start_date".to_string())));
        assert!(!existing.contains_key(&(pid.to_string(), "promo_pi_end_date".to_string())));
    }

    #[tokio::test]
    async fn failed_lookup_fails_only_the_clears() {
        let store = RecordingStore {
            fail_lookup: true,
            ..RecordingStore::default()
        };
        let reconciler =
            Reconciler::new(ExecutionMode::Apply, Some(&store), Duration::ZERO).unwrap();

        let reports = reconciler
            .reconcile_product("gid://shopify/Product/5", &sale_only())
            .await;
        assert_eq!(
            outcomes(&reports),
            [
                FieldOutcome::Written,
                FieldOutcome::Written,
                FieldOutcome::Failed,
                FieldOutcome::Failed,
            ]
        );
        assert!(!store.calls().iter().any(|c| matches!(c, Call::Delete(_))));
    }

    #[test]
    fn summary_counts_actions_and_outcomes() {
        let mut summary = RunSummary::default();
        summary.record_product(&[
            FieldReport {
                field: BannerField::SaleStart,
                action: FieldAction::Set(d("2025-05-29")),
                outcome: FieldOutcome::Written,
            },
            FieldReport {
                field: BannerField::SaleEnd,
                action: FieldAction::Set(d("2025-06-15")),
                outcome: FieldOutcome::Failed,
            },
            FieldReport {
                field: BannerField::PiStart,
                action: FieldAction::Clear,
                outcome: FieldOutcome::Deleted,
            },
            FieldReport {
                field: BannerField::PiEnd,
                action: FieldAction::Clear,
                outcome: FieldOutcome::AlreadyAbsent,
            },
        ]);
        assert_eq!(
            summary,
            RunSummary {
                products: 1,
                planned_sets: 2,
                planned_clears: 2,
                reported: 0,
                written: 1,
                deleted: 1,
                already_absent: 1,
                failed: 1,
            }
        );
    }
}
