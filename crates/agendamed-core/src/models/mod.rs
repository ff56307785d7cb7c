//! Persisted entities of the scheduling client.
//!
//! - `Appointment`, `AppointmentStatus`: a consultation between patient and doctor
//! - `Notification`, `NotificationType`: per-user inbox items
//! - `User` (`Admin` / `Doctor` / `Patient`): registered accounts, tagged by role
//! - `AppSettings`: device preferences
//!
//! Field names on the wire are camelCase to stay compatible with the stored
//! JSON documents.

pub mod appointment;
pub mod notification;
pub mod settings;
pub mod user;

use std::sync::{Mutex, OnceLock, PoisonError};

use serde::{de::DeserializeOwned, Serialize};
use ulid::{Generator, Ulid};

use crate::error::{Result, StoreError};

pub use appointment::{Appointment, AppointmentDraft, AppointmentPatch, AppointmentStatus};
pub use notification::{NewNotification, Notification, NotificationType};
pub use settings::{AppSettings, Theme};
pub use user::{BaseUser, Doctor, Role, User};

/// A record stored inside a whole-collection document.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Storage key of the collection document
    const COLLECTION: &'static str;
    /// Human readable name used in messages
    const NAME: &'static str;

    fn id(&self) -> &str;

    /// Check invariants that the type system does not already enforce.
    fn validate(&self) -> Result<()>;
}

/// Reject empty or whitespace-only required fields
pub(crate) fn require(entity: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::validation(format!(
            "{} is missing required field '{}'",
            entity, field
        )));
    }
    Ok(())
}

/// Generate a collision-resistant record id. Ids from one process sort in
/// creation order, also within the same millisecond.
pub fn new_id() -> String {
    static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();
    let mut generator = GENERATOR
        .get_or_init(|| Mutex::new(Generator::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    // Overflow needs 2^80 ids in one millisecond; fall back to a random id
    generator
        .generate()
        .unwrap_or_else(|_| Ulid::new())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_require_rejects_blank() {
        assert!(require("Appointment", "id", "a1").is_ok());
        assert!(require("Appointment", "id", "").is_err());
        assert!(require("Appointment", "id", "   ").is_err());
    }

    #[test]
    fn test_new_ids_do_not_collide_in_a_burst() {
        let ids: HashSet<String> = (0..1000).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_new_ids_follow_creation_order() {
        let ids: Vec<String> = (0..500).map(|_| new_id()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
