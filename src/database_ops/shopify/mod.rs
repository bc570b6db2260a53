pub mod provider;

pub use provider::{product_gid, ShopifyProvider};
