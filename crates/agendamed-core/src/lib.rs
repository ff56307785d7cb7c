//! agendamed-core - local data layer for a medical appointment scheduling client.
//!
//! Everything the client keeps on the device lives here: a key-value store
//! with a TTL cache, repositories for appointments, users, notifications and
//! settings, derived statistics, backup/restore and the signed-in session.
//!
//! [`DataLayer`] wires all of them over one shared [`KeyValueStore`].

pub mod auth;
pub mod backup;
pub mod config;
pub mod data_layer;
pub mod error;
pub mod models;
pub mod notifications;
pub mod repository;
pub mod statistics;
pub mod storage;

pub use auth::{generate_token, Session, SessionStore};
pub use backup::{BackupManager, BackupSnapshot, RestoreReport};
pub use config::Config;
pub use data_layer::DataLayer;
pub use error::{Result, StoreError};
pub use notifications::NotificationCenter;
pub use repository::{AppointmentRepository, Collection, SettingsRepository, UserRepository};
pub use statistics::{Statistics, StatisticsEngine, StatsScope};
pub use storage::{FileMedium, KeyValueStore, MemoryMedium, PersistentMedium};
