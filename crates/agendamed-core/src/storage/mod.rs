//! Persistent key-value storage with an in-memory TTL cache.
//!
//! - `PersistentMedium`: the string-keyed primitive (memory or JSON files)
//! - `TtlCache`: parsed documents with optional expiry, checked lazily
//! - `KeyValueStore`: cache-first reads, serialized per-key writes
//!
//! Every key holds one JSON document. The known keys are listed in [`keys`].

pub mod cache;
pub mod clock;
pub mod medium;
pub mod store;

pub use cache::{CacheEntry, Generation, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use medium::{FileMedium, MemoryMedium, PersistentMedium};
pub use store::{Change, KeyLocks, KeyValueStore};

/// Persisted key namespace.
pub mod keys {
    pub const USER: &str = "user";
    pub const TOKEN: &str = "token";
    pub const APPOINTMENTS: &str = "appointments";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const REGISTERED_USERS: &str = "registeredUsers";
    pub const SETTINGS: &str = "settings";
    /// Reserved, nothing writes it yet
    pub const STATISTICS_CACHE: &str = "statisticsCache";
}
