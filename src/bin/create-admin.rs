//! Create an admin account in the configured database.
//!
//! Usage: create-admin [USERNAME EMAIL PASSWORD]
//! Missing arguments fall back to ADMIN_USERNAME / ADMIN_EMAIL / ADMIN_PASSWORD.

use anyhow::Context;
use realty_cms::config::AdminSeed;
use realty_cms::db::{self, DbConfig};
use realty_cms::seed;
use realty_cms::store::PostgresStore;
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realty_cms=info".into()),
        )
        .init();

    let defaults = AdminSeed::from_env();
    let mut args = env::args().skip(1);
    let admin = AdminSeed {
        username: args.next().unwrap_or(defaults.username),
        email: args.next().unwrap_or(defaults.email),
        password: args.next().unwrap_or(defaults.password),
    };

    let url = env::var("DATABASE_URL").context("DATABASE_URL must be set to create an admin")?;
    let config = DbConfig::new(url);
    let pool = db::connect_with_retry(&config, 3, Duration::from_secs(2))
        .await
        .with_context(|| format!("could not connect to {}", config.redacted_url()))?;
    db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let store = PostgresStore::new(pool);
    let user = seed::create_admin(&store, &admin).await?;

    println!("\nAdmin created");
    println!("Username : {}", user.username);
    println!("Email    : {}", user.email);
    println!("Id       : {}\n", user.id);
    Ok(())
}
