use anyhow::{anyhow, Context, Result};
use promo_banner_sync::banner::MetafieldStore;
use promo_banner_sync::config::{Config, ExecutionMode};
use promo_banner_sync::database_ops::db::Db;
use promo_banner_sync::database_ops::promotions::PromotionReader;
use promo_banner_sync::database_ops::shopify::ShopifyProvider;
use promo_banner_sync::{logging, sync, util::env as env_util};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_util::init_env();
    logging::init_tracing("info")?;

    let config = Config::from_env().context("configuration error")?;
    config.log_snapshot();

    // Only apply mode talks to the shop.
    let shop = match config.mode {
        ExecutionMode::Apply => {
            let settings = config
                .shopify
                .as_ref()
                .ok_or_else(|| anyhow!("configuration error: shopify settings missing"))?;
            Some(ShopifyProvider::new(settings).context("failed to build shopify client")?)
        }
        ExecutionMode::ReadOnly | ExecutionMode::Simulate => None,
    };
    if let Some(shop) = &shop {
        info!(endpoint = shop.endpoint(), "shopify client ready");
    }

    let db = Db::connect(&config.db.target)
        .await
        .context("failed to connect to the promotions database")?;
    let reader = PromotionReader::new(db, config.db.query.clone());

    let store = shop.as_ref().map(|s| s as &dyn MetafieldStore);
    let outcome = sync::run(&config, &reader, store).await;
    reader.close().await;
    outcome?;
    Ok(())
}
