//! Backup and restore of the four persisted collections.
//!
//! A snapshot is a JSON document:
//!
//! ```json
//! { "timestamp": "<ISO-8601>",
//!   "data": { "appointments": [], "notifications": [],
//!             "registeredUsers": [], "settings": {} } }
//! ```
//!
//! Restore parses and validates the whole snapshot before touching storage,
//! then writes every section present in one all-or-nothing batch. Sections
//! missing from the snapshot keep their current contents.

pub mod crypto;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::models::{new_id, AppSettings, Appointment, Entity, Notification, User};
use crate::repository::{validate_collection, Collection, SettingsRepository};
use crate::storage::{keys, KeyValueStore};

const BACKUP_FILE_PREFIX: &str = "backup-";
const BACKUP_FILE_SUFFIX: &str = ".json";
/// Sortable file name timestamp; a ULID suffix keeps same-millisecond names apart
const BACKUP_FILE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupData {
    pub appointments: Vec<Appointment>,
    pub notifications: Vec<Notification>,
    pub registered_users: Vec<User>,
    pub settings: AppSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub timestamp: DateTime<Utc>,
    pub data: BackupData,
}

/// Records written by a restore; `None` means the section was absent and left as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub appointments: Option<usize>,
    pub notifications: Option<usize>,
    pub registered_users: Option<usize>,
    pub settings_restored: bool,
}

/// Parse and check one record of type `T` from untrusted JSON.
pub fn validate_record<T: Entity>(value: &Value) -> Result<T> {
    let record = T::deserialize(value)
        .map_err(|e| StoreError::validation(format!("malformed {}: {}", T::NAME, e)))?;
    record.validate()?;
    Ok(record)
}

pub fn validate_appointment(value: &Value) -> Result<Appointment> {
    validate_record(value)
}

pub fn validate_user(value: &Value) -> Result<User> {
    validate_record(value)
}

/// Message of a validation error without its prefix
fn detail(error: &StoreError) -> String {
    match error {
        StoreError::Validation(message) => message.clone(),
        other => other.to_string(),
    }
}

fn parse_section<T: Entity>(data: &Map<String, Value>, section: &str) -> Result<Option<Vec<T>>> {
    let value = match data.get(section) {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };
    let records = value.as_array().ok_or_else(|| {
        StoreError::validation(format!("backup section '{}' is not a list", section))
    })?;

    let mut items = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let item = validate_record::<T>(record).map_err(|e| {
            StoreError::validation(format!(
                "backup section '{}' record {}: {}",
                section,
                index,
                detail(&e)
            ))
        })?;
        items.push(item);
    }
    validate_collection(&items).map_err(|e| {
        StoreError::validation(format!("backup section '{}': {}", section, detail(&e)))
    })?;
    Ok(Some(items))
}

/// Fully parsed snapshot, ready to apply.
struct ParsedSnapshot {
    appointments: Option<Vec<Appointment>>,
    notifications: Option<Vec<Notification>>,
    registered_users: Option<Vec<User>>,
    settings: Option<AppSettings>,
}

fn parse_snapshot(raw: &str) -> Result<ParsedSnapshot> {
    let root: Value =
        serde_json::from_str(raw).map_err(|e| StoreError::serialization("backup", e))?;

    match root.get("timestamp") {
        Some(Value::String(ts)) if ts.parse::<DateTime<Utc>>().is_ok() => {}
        Some(_) => {
            return Err(StoreError::validation(
                "backup timestamp is not an ISO-8601 instant",
            ))
        }
        None => debug!("Backup has no timestamp"),
    }

    let data = root
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| StoreError::validation("backup has no 'data' object"))?;

    let settings = match data.get("settings") {
        None | Some(Value::Null) => None,
        Some(value) => Some(AppSettings::deserialize(value).map_err(|e| {
            StoreError::validation(format!("backup section 'settings': {}", e))
        })?),
    };

    Ok(ParsedSnapshot {
        appointments: parse_section(data, keys::APPOINTMENTS)?,
        notifications: parse_section(data, keys::NOTIFICATIONS)?,
        registered_users: parse_section(data, keys::REGISTERED_USERS)?,
        settings,
    })
}

fn is_backup_file(name: &str) -> bool {
    name.starts_with(BACKUP_FILE_PREFIX) && name.ends_with(BACKUP_FILE_SUFFIX)
}

#[derive(Clone)]
pub struct BackupManager {
    store: Arc<KeyValueStore>,
    appointments: Collection<Appointment>,
    notifications: Collection<Notification>,
    users: Collection<User>,
    settings: SettingsRepository,
}

impl BackupManager {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self {
            appointments: Collection::new(store.clone()),
            notifications: Collection::new(store.clone()),
            users: Collection::new(store.clone()),
            settings: SettingsRepository::new(store.clone()),
            store,
        }
    }

    /// Current contents of the four collections. Fails if any of them
    /// cannot be read, rather than backing it up as empty.
    pub async fn snapshot(&self) -> Result<BackupSnapshot> {
        Ok(BackupSnapshot {
            timestamp: self.store.now(),
            data: BackupData {
                appointments: self.appointments.fetch_all().await?,
                notifications: self.notifications.fetch_all().await?,
                registered_users: self.users.fetch_all().await?,
                settings: self.settings.fetch().await?,
            },
        })
    }

    /// Serialize the four collections into a portable JSON string.
    pub async fn create_backup(&self) -> Result<String> {
        let snapshot = self.snapshot().await?;
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| StoreError::serialization("backup", e))?;
        info!(
            appointments = snapshot.data.appointments.len(),
            notifications = snapshot.data.notifications.len(),
            users = snapshot.data.registered_users.len(),
            "Backup created"
        );
        Ok(json)
    }

    /// Replace the collections with the snapshot's contents.
    ///
    /// Nothing is written unless the whole snapshot parses and validates, and
    /// a failing write undoes the sections already written.
    pub async fn restore(&self, raw: &str) -> Result<RestoreReport> {
        let parsed = parse_snapshot(raw)?;

        let mut report = RestoreReport::default();
        let mut entries = Vec::new();
        if let Some(items) = &parsed.appointments {
            entries.push(KeyValueStore::encode(keys::APPOINTMENTS, items)?);
            report.appointments = Some(items.len());
        }
        if let Some(items) = &parsed.notifications {
            entries.push(KeyValueStore::encode(keys::NOTIFICATIONS, items)?);
            report.notifications = Some(items.len());
        }
        if let Some(items) = &parsed.registered_users {
            entries.push(KeyValueStore::encode(keys::REGISTERED_USERS, items)?);
            report.registered_users = Some(items.len());
        }
        if let Some(settings) = &parsed.settings {
            entries.push(KeyValueStore::encode(keys::SETTINGS, settings)?);
            report.settings_restored = true;
        }

        if entries.is_empty() {
            warn!("Backup contained no sections, nothing restored");
            return Ok(report);
        }
        self.store.set_many(entries).await?;
        info!(?report, "Backup restored");
        Ok(report)
    }

    pub async fn create_encrypted_backup(&self, passphrase: &str) -> Result<Vec<u8>> {
        let json = self.create_backup().await?;
        crypto::seal(json.as_bytes(), passphrase)
    }

    pub async fn restore_encrypted(&self, sealed: &[u8], passphrase: &str) -> Result<RestoreReport> {
        let plaintext = crypto::open(sealed, passphrase)?;
        let raw = String::from_utf8(plaintext)
            .map_err(|_| StoreError::validation("decrypted backup is not UTF-8"))?;
        self.restore(&raw).await
    }

    // ===== Backup files =====

    /// Write a snapshot to `dir` and return its path.
    pub async fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        let json = self.create_backup().await?;
        tokio::fs::create_dir_all(dir).await?;
        let name = format!(
            "{}{}-{}{}",
            BACKUP_FILE_PREFIX,
            self.store.now().format(BACKUP_FILE_TIME_FORMAT),
            new_id(),
            BACKUP_FILE_SUFFIX
        );
        let path = dir.join(name);
        tokio::fs::write(&path, json).await?;
        info!(path = %path.display(), "Backup written");
        Ok(path)
    }

    pub async fn restore_from_file(&self, path: &Path) -> Result<RestoreReport> {
        let raw = tokio::fs::read_to_string(path).await?;
        self.restore(&raw).await
    }

    /// Backup files in `dir`, oldest first
    pub async fn list_backups(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_backup_file)
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Write a backup when the user enabled auto-backup, keeping at most
    /// `retention` files.
    pub async fn auto_backup(&self, dir: &Path, retention: usize) -> Result<Option<PathBuf>> {
        if !self.settings.fetch().await?.auto_backup {
            debug!("Auto-backup disabled");
            return Ok(None);
        }
        let path = self.write_to_dir(dir).await?;

        let files = self.list_backups(dir).await?;
        let excess = files.len().saturating_sub(retention.max(1));
        for old in files.iter().take(excess) {
            tokio::fs::remove_file(old).await?;
            debug!(path = %old.display(), "Pruned old backup");
        }
        Ok(Some(path))
    }
}
