use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::DbTarget;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip_all)]
    pub async fn connect(target: &DbTarget) -> Result<Self> {
        let mut connect_options = connect_options(target)?;
        // PgBouncer txn mode safe
        connect_options = connect_options.statement_cache_capacity(0);

        // A single sequential reader never needs more than one connection.
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn connect_options(target: &DbTarget) -> Result<PgConnectOptions> {
    match target {
        DbTarget::Url(url) => {
            let mut opts = PgConnectOptions::from_str(url)?;
            // Ensure TLS is enabled when DSN contains sslmode=require
            if url.contains("sslmode=require") {
                opts = opts.ssl_mode(PgSslMode::Require);
            }
            Ok(opts)
        }
        DbTarget::Parts {
            server,
            database,
            user,
            password,
            port,
            ssl_mode,
        } => {
            // Bracketed IPv6 literals are accepted from the env.
            let host = server.trim().trim_matches(|c| c == '[' || c == ']');
            let mut opts = PgConnectOptions::new()
                .host(host)
                .port(*port)
                .database(database)
                .username(user)
                .ssl_mode(PgSslMode::from_str(ssl_mode)?);
            if let Some(pass) = password {
                opts = opts.password(pass);
            }
            Ok(opts)
        }
    }
}
