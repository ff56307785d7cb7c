use super::Collection;
use crate::error::{Result, StoreError};
use crate::models::{Entity, Role, User};
use crate::storage::Change;

impl Collection<User> {
    pub async fn find_by_email(&self, email: &str) -> Option<User> {
        let email = email.trim();
        self.get_all()
            .await
            .into_iter()
            .find(|user| user.email().eq_ignore_ascii_case(email))
    }

    pub async fn by_role(&self, role: Role) -> Vec<User> {
        self.get_all()
            .await
            .into_iter()
            .filter(|user| user.role() == role)
            .collect()
    }

    pub async fn doctors(&self) -> Vec<User> {
        self.by_role(Role::Doctor).await
    }

    /// Add a user, refusing an id or email that is already registered.
    pub async fn register(&self, user: User) -> Result<()> {
        user.validate()?;
        self.store()
            .modify(User::COLLECTION, self.ttl, |users: &mut Vec<User>| {
                check_unique(users, &user)?;
                users.push(user);
                Ok(Change::Write(()))
            })
            .await
    }
}

/// Fail if `user` clashes with a registered id or email
pub(crate) fn check_unique(users: &[User], user: &User) -> Result<()> {
    if users.iter().any(|u| u.id() == user.id()) {
        return Err(StoreError::validation(format!(
            "User with id {} already exists",
            StoreError::quote(user.id())
        )));
    }
    if users
        .iter()
        .any(|u| u.email().eq_ignore_ascii_case(user.email()))
    {
        return Err(StoreError::validation(format!(
            "Email {} is already registered",
            StoreError::quote(user.email())
        )));
    }
    Ok(())
}
