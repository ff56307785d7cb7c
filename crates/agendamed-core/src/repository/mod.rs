//! Collection repositories built on the key-value store.
//!
//! Each entity type lives in one JSON array under its collection key and is
//! rewritten whole on every mutation. Mutations go through
//! [`KeyValueStore::modify`], so concurrent writers to one collection are
//! applied one at a time.
//!
//! `update` and `delete` on an unknown id are not errors: they return
//! `Ok(false)` and leave storage untouched.

pub mod appointments;
pub mod settings;
pub mod users;

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Duration;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::models::Entity;
use crate::storage::{Change, KeyValueStore};

pub use settings::SettingsRepository;

pub type AppointmentRepository = Collection<crate::models::Appointment>;
pub type UserRepository = Collection<crate::models::User>;

/// Check every item and that no id appears twice.
pub fn validate_collection<T: Entity>(items: &[T]) -> Result<()> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        item.validate()?;
        if !seen.insert(item.id()) {
            return Err(duplicate_id::<T>(item.id()));
        }
    }
    Ok(())
}

fn duplicate_id<T: Entity>(id: &str) -> StoreError {
    StoreError::validation(format!(
        "{} with id {} already exists",
        T::NAME,
        StoreError::quote(id)
    ))
}

pub struct Collection<T: Entity> {
    store: Arc<KeyValueStore>,
    ttl: Option<Duration>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ttl: self.ttl,
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Collection<T> {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self {
            store,
            ttl: None,
            _entity: PhantomData,
        }
    }

    /// Expire the cached collection this long after each write
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<KeyValueStore> {
        &self.store
    }

    pub async fn get_all(&self) -> Vec<T> {
        self.store.get_or(T::COLLECTION, Vec::new()).await
    }

    /// Strict variant of [`Self::get_all`] for callers that must not mistake
    /// an unreadable collection for an empty one.
    pub async fn fetch_all(&self) -> Result<Vec<T>> {
        Ok(self.store.fetch(T::COLLECTION).await?.unwrap_or_default())
    }

    pub async fn find(&self, id: &str) -> Option<T> {
        self.get_all().await.into_iter().find(|item| item.id() == id)
    }

    pub async fn count(&self) -> usize {
        self.get_all().await.len()
    }

    /// Replace the whole collection.
    pub async fn save_all(&self, items: &[T]) -> Result<()> {
        validate_collection(items)?;
        self.store
            .set_with_ttl(T::COLLECTION, items, self.ttl)
            .await
    }

    pub async fn add(&self, item: T) -> Result<()> {
        item.validate()?;
        self.store
            .modify(T::COLLECTION, self.ttl, |items: &mut Vec<T>| {
                if items.iter().any(|existing| existing.id() == item.id()) {
                    return Err(duplicate_id::<T>(item.id()));
                }
                debug!(entity = T::NAME, id = %item.id(), "Adding record");
                items.push(item);
                Ok(Change::Write(()))
            })
            .await
    }

    /// Apply `patch` to the record with `id`. Returns `false` when no record
    /// matched.
    pub async fn update<F>(&self, id: &str, patch: F) -> Result<bool>
    where
        F: FnOnce(&mut T),
    {
        self.store
            .modify(T::COLLECTION, self.ttl, |items: &mut Vec<T>| {
                let Some(item) = items.iter_mut().find(|item| item.id() == id) else {
                    debug!(entity = T::NAME, id = %id, "Update matched no record");
                    return Ok(Change::Keep(false));
                };
                patch(item);
                if item.id() != id {
                    return Err(StoreError::validation(format!(
                        "{} id cannot change on update",
                        T::NAME
                    )));
                }
                item.validate()?;
                Ok(Change::Write(true))
            })
            .await
    }

    /// Apply `patch` to every record matching `predicate`; returns how many
    /// records matched.
    pub async fn update_where<P, F>(&self, predicate: P, mut patch: F) -> Result<usize>
    where
        P: Fn(&T) -> bool,
        F: FnMut(&mut T),
    {
        self.store
            .modify(T::COLLECTION, self.ttl, |items: &mut Vec<T>| {
                let mut changed = 0;
                for item in items.iter_mut().filter(|item| predicate(item)) {
                    patch(item);
                    changed += 1;
                }
                if changed == 0 {
                    Ok(Change::Keep(0))
                } else {
                    Ok(Change::Write(changed))
                }
            })
            .await
    }

    /// Remove the record with `id`. Returns `false` when no record matched.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.delete_where(|item| item.id() == id)
            .await
            .map(|removed| removed > 0)
    }

    pub async fn delete_where<P>(&self, predicate: P) -> Result<usize>
    where
        P: Fn(&T) -> bool,
    {
        self.store
            .modify(T::COLLECTION, self.ttl, |items: &mut Vec<T>| {
                let before = items.len();
                items.retain(|item| !predicate(item));
                let removed = before - items.len();
                if removed == 0 {
                    Ok(Change::Keep(0))
                } else {
                    Ok(Change::Write(removed))
                }
            })
            .await
    }

    /// Drop the collection document entirely.
    pub async fn clear(&self) -> Result<()> {
        self.store.remove(T::COLLECTION).await
    }
}
