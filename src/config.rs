//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `TINKERBOX_USER_DIR` and `TINKERBOX_LOG_LEVEL` env overrides.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// Fully-resolved appliance configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the user-editable settings document (already
    /// expanded, no `~`).
    pub user_dir: PathBuf,
    /// Directory holding the runtime-persisted settings document.
    pub persistence_dir: PathBuf,
    pub log_level: String,
    /// Directory holding the three PEM key files.
    pub certs_dir: PathBuf,
    /// File name of the update server's public key, under `certs_dir`.
    pub server_key: String,
    /// File name of the device public key, under `certs_dir`.
    pub public_key: String,
    /// File name of the device private key, under `certs_dir`.
    pub private_key: String,
    /// Update service URL embedded into the persisted settings on first run.
    pub update_url: String,
    /// Platform identification blob, `/proc/cpuinfo` on real hardware.
    pub cpuinfo_path: PathBuf,
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    appliance: RawAppliance,
    #[serde(default)]
    certs: RawCerts,
    #[serde(default)]
    update: RawUpdate,
    #[serde(default)]
    platform: RawPlatform,
}

#[derive(Deserialize)]
struct RawAppliance {
    user_dir: String,
    persistence_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

#[derive(Deserialize)]
struct RawCerts {
    /// Defaults to `<user_dir>/certs` when absent.
    #[serde(default)]
    dir: Option<String>,
    #[serde(default = "default_server_key")]
    server_key: String,
    #[serde(default = "default_public_key")]
    public_key: String,
    #[serde(default = "default_private_key")]
    private_key: String,
}

impl Default for RawCerts {
    fn default() -> Self {
        Self {
            dir: None,
            server_key: default_server_key(),
            public_key: default_public_key(),
            private_key: default_private_key(),
        }
    }
}

#[derive(Deserialize)]
struct RawUpdate {
    #[serde(default = "default_update_url")]
    url: String,
}

impl Default for RawUpdate {
    fn default() -> Self {
        Self { url: default_update_url() }
    }
}

#[derive(Deserialize)]
struct RawPlatform {
    #[serde(default = "default_cpuinfo")]
    cpuinfo: String,
}

impl Default for RawPlatform {
    fn default() -> Self {
        Self { cpuinfo: default_cpuinfo() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_server_key() -> String {
    "server_pub.pem".to_string()
}

fn default_public_key() -> String {
    "pub.pem".to_string()
}

fn default_private_key() -> String {
    "key.pem".to_string()
}

fn default_update_url() -> String {
    "https://updates.tinkerbox.io/api".to_string()
}

fn default_cpuinfo() -> String {
    "/proc/cpuinfo".to_string()
}

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let user_dir_override = env::var("TINKERBOX_USER_DIR").ok();
    let log_level_override = env::var("TINKERBOX_LOG_LEVEL").ok();
    load_from(
        Path::new("config/default.toml"),
        user_dir_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    user_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let a = parsed.appliance;

    let user_dir_str = user_dir_override.unwrap_or(&a.user_dir).to_string();
    let user_dir = expand_home(&user_dir_str);
    let persistence_dir = expand_home(&a.persistence_dir);
    let log_level = log_level_override.unwrap_or(&a.log_level).to_string();
    let certs_dir = match parsed.certs.dir {
        Some(dir) => expand_home(&dir),
        None => user_dir.join("certs"),
    };

    Ok(Config {
        user_dir,
        persistence_dir,
        log_level,
        certs_dir,
        server_key: parsed.certs.server_key,
        public_key: parsed.certs.public_key,
        private_key: parsed.certs.private_key,
        update_url: parsed.update.url,
        cpuinfo_path: PathBuf::from(parsed.platform.cpuinfo),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// `Config` rooted entirely under `root` — no fixed system paths, dummy
    /// update URL. Used by unit and integration tests.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            user_dir: root.join("user"),
            persistence_dir: root.join("persist"),
            log_level: "info".into(),
            certs_dir: root.join("certs"),
            server_key: "server_pub.pem".into(),
            public_key: "pub.pem".into(),
            private_key: "key.pem".into(),
            update_url: "http://localhost:0/update".into(),
            cpuinfo_path: root.join("cpuinfo"),
        }
    }
}
