//! Settings bootstrap — two JSON stores layered into one snapshot.
//!
//! `load()` runs the full sequence: ensure credentials are valid, read (or
//! seed) the user document, read (or seed) the persisted document, merge.
//! The merge overlays the persisted document onto the user document, so
//! persisted keys win on conflict.
//!
//! Error policy, kept deliberately loose: document write failures and key
//! generation failures are logged and swallowed — the next `load()` retries
//! them. A corrupt document is treated as absent and silently replaced by a
//! freshly seeded default. The one failure that aborts a load is device
//! identity resolution while seeding the persisted document for the first
//! time, because the identity cannot be synthesized.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::credentials::{CredentialManager, RsaPaths, keygen::KeyGenerator};
use crate::error::AppError;
use crate::identity::{DeviceIdentity, DeviceIdentityResolver};

/// File name of the user-editable document, under `user_dir`.
pub const USER_SETTINGS_FILE: &str = "tinkerbox.json";
/// File name of the runtime document, under `persistence_dir`.
pub const PERSISTED_SETTINGS_FILE: &str = "settings.json";

/// Keys recognized in the user document; anything else is dropped from the
/// merge.
pub const ALLOWED_USER_KEYS: &[&str] = &["rsa", "email", "account_id", "lang", "showall"];

/// An independent copy of the merged settings. Mutating one never affects
/// the store or another snapshot.
pub type SettingsSnapshot = serde_json::Map<String, Value>;

/// Orchestrates the bootstrap/merge sequence across the two JSON stores.
pub struct SettingsStore {
    instance_id: String,
    update_url: String,
    user_path: PathBuf,
    persisted_path: PathBuf,
    credentials: CredentialManager,
    resolver: DeviceIdentityResolver,
    settings: SettingsSnapshot,
}

impl SettingsStore {
    pub fn new(config: &Config, generator: KeyGenerator) -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            update_url: config.update_url.clone(),
            user_path: config.user_dir.join(USER_SETTINGS_FILE),
            persisted_path: config.persistence_dir.join(PERSISTED_SETTINGS_FILE),
            credentials: CredentialManager::new(RsaPaths::from_config(config), generator),
            resolver: DeviceIdentityResolver::new(config.cpuinfo_path.clone()),
            settings: SettingsSnapshot::new(),
        }
    }

    /// The merged settings as of the most recent successful [`load`](Self::load).
    pub fn settings(&self) -> SettingsSnapshot {
        self.settings.clone()
    }

    /// The resolved hardware identity, once a load has had to seed the
    /// persisted document (or a caller resolved it directly).
    pub fn device_identity(&self) -> Option<&DeviceIdentity> {
        self.resolver.cached()
    }

    /// Identifier generated for this store instance, embedded into the
    /// persisted document on first run.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Run the bootstrap sequence and return the merged snapshot.
    pub async fn load(&mut self) -> Result<SettingsSnapshot, AppError> {
        self.credentials.ensure_valid().await;

        let user = self.user_settings().await;
        let persisted = self.persisted_settings().await?;

        let mut merged = SettingsSnapshot::new();
        for (key, value) in user {
            if ALLOWED_USER_KEYS.contains(&key.as_str()) {
                merged.insert(key, value);
            } else {
                debug!(key = %key, "dropping unrecognized user setting");
            }
        }
        for (key, value) in persisted {
            merged.insert(key, value);
        }

        info!(keys = merged.len(), "settings merged");
        self.settings = merged;
        Ok(self.settings())
    }

    /// Read the user document; seed it with the RSA path material when
    /// absent or unreadable. The in-memory content is used either way.
    async fn user_settings(&self) -> SettingsSnapshot {
        if let Some(doc) = read_document(&self.user_path).await {
            return doc;
        }

        let mut doc = SettingsSnapshot::new();
        match serde_json::to_value(self.credentials.paths()) {
            Ok(rsa) => {
                doc.insert("rsa".to_string(), rsa);
            }
            Err(e) => warn!(error = %e, "cannot encode RSA key paths"),
        }
        write_document(&self.user_path, &doc).await;
        doc
    }

    /// Read the persisted document; seed it with the instance id and update
    /// descriptor when absent or unreadable. Identity resolution errors
    /// propagate — this is the only failing path of a load.
    async fn persisted_settings(&self) -> Result<SettingsSnapshot, AppError> {
        if let Some(doc) = read_document(&self.persisted_path).await {
            return Ok(doc);
        }

        let identity = self.resolver.resolve().await?;
        let mut doc = SettingsSnapshot::new();
        doc.insert("id".to_string(), Value::String(self.instance_id.clone()));
        doc.insert(
            "update".to_string(),
            json!({ "url": self.update_url, "type": identity }),
        );
        write_document(&self.persisted_path, &doc).await;
        Ok(doc)
    }
}

/// Read and parse a settings document. Absent, unreadable, unparsable and
/// non-object documents all come back as `None` — the caller reseeds.
async fn read_document(path: &Path) -> Option<SettingsSnapshot> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(_) => return None,
    };
    match serde_json::from_str(&text) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) | Err(_) => {
            warn!(path = %path.display(), "settings document unreadable; reseeding defaults");
            None
        }
    }
}

/// Best-effort document write: create parent directories, serialize, write.
/// Failures are logged and swallowed — the next load attempts creation again.
async fn write_document(path: &Path, doc: &SettingsSnapshot) {
    if let Err(e) = try_write_document(path, doc).await {
        warn!(path = %path.display(), error = %e, "cannot write settings document");
    }
}

async fn try_write_document(path: &Path, doc: &SettingsSnapshot) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            AppError::DocumentWrite(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    let body = serde_json::to_string(doc)
        .map_err(|e| AppError::DocumentWrite(format!("cannot serialize document: {e}")))?;
    tokio::fs::write(path, body)
        .await
        .map_err(|e| AppError::DocumentWrite(format!("cannot write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::TempDir;

    const CPUINFO: &str = "Hardware\t: BCM2835\nRevision\t: a02082\nSerial\t: 0000\n";

    fn store_at(root: &Path) -> SettingsStore {
        let config = Config::rooted_at(root);
        stdfs::write(&config.cpuinfo_path, CPUINFO).unwrap();
        SettingsStore::new(&config, KeyGenerator::dummy())
    }

    #[tokio::test]
    async fn persisted_keys_win_over_user_keys() {
        let tmp = TempDir::new().unwrap();
        let config = Config::rooted_at(tmp.path());

        stdfs::create_dir_all(&config.user_dir).unwrap();
        stdfs::write(
            config.user_dir.join(USER_SETTINGS_FILE),
            r#"{"lang": "en", "rsa": "x"}"#,
        )
        .unwrap();
        stdfs::create_dir_all(&config.persistence_dir).unwrap();
        stdfs::write(
            config.persistence_dir.join(PERSISTED_SETTINGS_FILE),
            r#"{"lang": "fr", "id": "abc"}"#,
        )
        .unwrap();

        let mut store = SettingsStore::new(&config, KeyGenerator::dummy());
        let merged = store.load().await.unwrap();

        assert_eq!(merged["lang"], "fr");
        assert_eq!(merged["rsa"], "x");
        assert_eq!(merged["id"], "abc");
    }

    #[tokio::test]
    async fn unrecognized_user_keys_are_dropped() {
        let tmp = TempDir::new().unwrap();
        let config = Config::rooted_at(tmp.path());

        stdfs::create_dir_all(&config.user_dir).unwrap();
        stdfs::write(
            config.user_dir.join(USER_SETTINGS_FILE),
            r#"{"lang": "en", "favourite_color": "teal"}"#,
        )
        .unwrap();
        stdfs::create_dir_all(&config.persistence_dir).unwrap();
        stdfs::write(config.persistence_dir.join(PERSISTED_SETTINGS_FILE), r#"{"id": "abc"}"#)
            .unwrap();

        let mut store = SettingsStore::new(&config, KeyGenerator::dummy());
        let merged = store.load().await.unwrap();

        assert_eq!(merged["lang"], "en");
        assert!(!merged.contains_key("favourite_color"));
    }

    #[tokio::test]
    async fn snapshot_is_isolated_from_store() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_at(tmp.path());
        store.load().await.unwrap();

        let mut snapshot = store.settings();
        snapshot.insert("injected".to_string(), Value::Bool(true));

        assert!(!store.settings().contains_key("injected"));
    }

    #[tokio::test]
    async fn corrupt_user_document_is_reseeded() {
        let tmp = TempDir::new().unwrap();
        let config = Config::rooted_at(tmp.path());
        stdfs::write(&config.cpuinfo_path, CPUINFO).unwrap();

        stdfs::create_dir_all(&config.user_dir).unwrap();
        let user_path = config.user_dir.join(USER_SETTINGS_FILE);
        stdfs::write(&user_path, "{not json").unwrap();

        let mut store = SettingsStore::new(&config, KeyGenerator::dummy());
        let merged = store.load().await.unwrap();

        // replaced on disk with the seeded default, and merged with rsa paths
        let reseeded: Value =
            serde_json::from_str(&stdfs::read_to_string(&user_path).unwrap()).unwrap();
        assert!(reseeded.get("rsa").is_some());
        assert!(merged.get("rsa").is_some());
    }

    #[tokio::test]
    async fn existing_persisted_document_skips_identity_resolution() {
        let tmp = TempDir::new().unwrap();
        let config = Config::rooted_at(tmp.path());
        // no cpuinfo file at all — resolution would fail if attempted

        stdfs::create_dir_all(&config.persistence_dir).unwrap();
        stdfs::write(config.persistence_dir.join(PERSISTED_SETTINGS_FILE), r#"{"id": "kept"}"#)
            .unwrap();

        let mut store = SettingsStore::new(&config, KeyGenerator::dummy());
        let merged = store.load().await.unwrap();

        assert_eq!(merged["id"], "kept");
        assert!(store.device_identity().is_none());
    }

    #[tokio::test]
    async fn unreadable_platform_info_aborts_first_load() {
        let tmp = TempDir::new().unwrap();
        let config = Config::rooted_at(tmp.path());
        // no cpuinfo, no persisted document: seeding must resolve and fails

        let mut store = SettingsStore::new(&config, KeyGenerator::dummy());
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, AppError::PlatformUnavailable(_)));
    }

    #[tokio::test]
    async fn write_failure_is_swallowed_and_content_still_used() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::rooted_at(tmp.path());
        stdfs::write(&config.cpuinfo_path, CPUINFO).unwrap();

        // user_dir collides with a plain file, so create_dir_all fails
        stdfs::write(tmp.path().join("blocked"), "").unwrap();
        config.user_dir = tmp.path().join("blocked");

        let mut store = SettingsStore::new(&config, KeyGenerator::dummy());
        let merged = store.load().await.unwrap();

        // the unwritten seed content still reaches the merge
        assert!(merged.get("rsa").is_some());
        assert!(!config.user_dir.join(USER_SETTINGS_FILE).exists());
    }

    #[tokio::test]
    async fn second_load_rereads_documents() {
        let tmp = TempDir::new().unwrap();
        let config = Config::rooted_at(tmp.path());
        stdfs::write(&config.cpuinfo_path, CPUINFO).unwrap();

        let mut store = SettingsStore::new(&config, KeyGenerator::dummy());
        store.load().await.unwrap();

        // an operator edits the user document between loads
        stdfs::write(
            config.user_dir.join(USER_SETTINGS_FILE),
            r#"{"lang": "de"}"#,
        )
        .unwrap();
        let merged = store.load().await.unwrap();
        assert_eq!(merged["lang"], "de");
    }
}
