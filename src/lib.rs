//! Syncs promotional sale and price-increase dates from the retail database
//! into Shopify product metafields that drive storefront countdown banners.
pub mod banner;
pub mod config;
pub mod database_ops;
pub mod logging;
pub mod sync;

pub mod util {
    pub mod env;
}
