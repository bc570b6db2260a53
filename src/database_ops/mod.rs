pub mod db;
pub mod promotions;
pub mod shopify;
