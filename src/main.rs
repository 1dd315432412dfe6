//! Convenios - institutional agreement tracking backend

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convenios::{
    config::Args,
    db::MongoClient,
    server::{self, AppState},
    store::{MemoryStore, MongoStore, Store},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("convenios={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Convenios - agreement tracking");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db {})", args.mongodb_uri, args.mongodb_db);
    info!("Evidence dir: {}", args.evidence_dir.display());
    info!("======================================");

    // MongoDB is required in production; dev mode falls back to memory
    let (store, backend): (Arc<dyn Store>, &'static str) =
        match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(client) => {
                info!("MongoDB connected successfully");
                (Arc::new(MongoStore::new(client).await?), "mongodb")
            }
            Err(e) if args.dev_mode => {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                (Arc::new(MemoryStore::new()), "memory")
            }
            Err(e) => {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        };

    let state = AppState::new(args, store, backend)?;

    if let Some(name) = state.args.bootstrap_org_unit.as_deref() {
        if let Some(org_unit) = state.org_units.bootstrap(name).await? {
            info!(id = org_unit.id, name = %org_unit.nombre, "Bootstrapped first org unit");
        }
    }

    if let Some(email) = state.args.bootstrap_admin_email.as_deref() {
        match state.users.promote_to_admin(email).await? {
            Some(user) => info!(user_id = user.id, email = %user.email, "Promoted bootstrap admin"),
            None => warn!(email = %email, "Bootstrap admin email matches no user"),
        }
    }

    server::run(Arc::new(state)).await?;

    Ok(())
}
