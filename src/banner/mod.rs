//! Banner date derivation and reconciliation against the shop.
pub mod model;
pub mod reconcile;
pub mod resolver;

pub use model::{BannerField, BannerFieldSet, PromotionRecord};
pub use reconcile::{FieldAction, FieldOutcome, FieldReport, MetafieldStore, Reconciler, RunSummary};
pub use resolver::resolve;
