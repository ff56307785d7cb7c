use std::sync::Arc;

use crate::error::Result;
use crate::models::AppSettings;
use crate::storage::{keys, Change, KeyValueStore};

/// Device preferences, stored as a single document.
#[derive(Clone)]
pub struct SettingsRepository {
    store: Arc<KeyValueStore>,
}

impl SettingsRepository {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stored settings, or the defaults when none were saved
    pub async fn get(&self) -> AppSettings {
        self.store.get_or(keys::SETTINGS, AppSettings::default()).await
    }

    /// Like [`Self::get`], but a failed read is an error instead of defaults.
    pub async fn fetch(&self) -> Result<AppSettings> {
        Ok(self.store.fetch(keys::SETTINGS).await?.unwrap_or_default())
    }

    pub async fn save(&self, settings: &AppSettings) -> Result<()> {
        self.store.set(keys::SETTINGS, settings).await
    }

    pub async fn update<F>(&self, f: F) -> Result<AppSettings>
    where
        F: FnOnce(&mut AppSettings),
    {
        self.store
            .modify(keys::SETTINGS, None, |settings: &mut AppSettings| {
                f(settings);
                Ok(Change::Write(settings.clone()))
            })
            .await
    }

    pub async fn reset(&self) -> Result<()> {
        self.store.remove(keys::SETTINGS).await
    }
}
