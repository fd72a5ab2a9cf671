//! tinkerbox-settings — appliance settings bootstrap entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger at configured level
//!   4. Bootstrap settings (credentials → user doc → persisted doc → merge)
//!   5. Print status and exit

use tracing::info;

use tinkerbox_settings::{
    config,
    credentials::keygen::KeyGenerator,
    error::AppError,
    logger,
    settings::SettingsStore,
};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.log_level)?;

    info!(
        user_dir = %config.user_dir.display(),
        persistence_dir = %config.persistence_dir.display(),
        "config loaded"
    );

    let mut store = SettingsStore::new(&config, KeyGenerator::openssl());
    let snapshot = store.load().await?;

    info!(
        instance_id = %store.instance_id(),
        keys = snapshot.len(),
        "settings ready"
    );
    if let Some(identity) = store.device_identity() {
        info!(
            model = identity.model.as_deref().unwrap_or("Unknown"),
            gpio = identity.gpio_layout.as_deref().unwrap_or("unsupported"),
            "board identified"
        );
    }

    println!("✓ Settings loaded: {} keys", snapshot.len());

    Ok(())
}
