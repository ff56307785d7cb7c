use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::auth::SessionStore;
use crate::backup::BackupManager;
use crate::config::Config;
use crate::notifications::NotificationCenter;
use crate::repository::{AppointmentRepository, Collection, SettingsRepository, UserRepository};
use crate::statistics::StatisticsEngine;
use crate::storage::{FileMedium, KeyValueStore};

/// Every repository and service over one shared store.
#[derive(Clone)]
pub struct DataLayer {
    pub store: Arc<KeyValueStore>,
    pub appointments: AppointmentRepository,
    pub users: UserRepository,
    pub settings: SettingsRepository,
    pub notifications: NotificationCenter,
    pub statistics: StatisticsEngine,
    pub backup: BackupManager,
    pub session: SessionStore,
}

impl DataLayer {
    /// Data layer persisted as JSON files under the configured data directory.
    pub fn open(config: &Config) -> Result<Self> {
        let dir = config.data_dir()?;
        let medium = FileMedium::new(dir.clone())
            .with_context(|| format!("opening data directory {}", dir.display()))?;
        info!(dir = %dir.display(), ttl = ?config.cache_ttl_minutes, "Opened data layer");
        Ok(Self::with_store(Arc::new(KeyValueStore::new(Arc::new(medium))), config))
    }

    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(KeyValueStore::in_memory()), &Config::default())
    }

    pub fn with_store(store: Arc<KeyValueStore>, config: &Config) -> Self {
        let ttl = config.cache_ttl();
        let appointments = Collection::new(store.clone()).with_ttl(ttl);
        let users = Collection::new(store.clone()).with_ttl(ttl);

        Self {
            statistics: StatisticsEngine::new(appointments.clone(), users.clone()),
            notifications: NotificationCenter::new(store.clone()).with_ttl(ttl),
            settings: SettingsRepository::new(store.clone()),
            backup: BackupManager::new(store.clone()),
            session: SessionStore::new(store.clone()).with_users_ttl(ttl),
            appointments,
            users,
            store,
        }
    }
}
