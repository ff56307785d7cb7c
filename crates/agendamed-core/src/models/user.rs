use serde::{Deserialize, Serialize};

use super::{require, Entity};
use crate::error::{Result, StoreError};
use crate::storage::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Doctor,
    Patient,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Doctor => write!(f, "doctor"),
            Role::Patient => write!(f, "patient"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct BaseUser {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Doctor {
    #[serde(flatten)]
    pub base: BaseUser,
    pub specialty: String,
}

/// A registered account, discriminated by its `role` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum User {
    Admin(BaseUser),
    Doctor(Doctor),
    Patient(BaseUser),
}

impl User {
    pub fn base(&self) -> &BaseUser {
        match self {
            User::Admin(base) | User::Patient(base) => base,
            User::Doctor(doctor) => &doctor.base,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            User::Admin(_) => Role::Admin,
            User::Doctor(_) => Role::Doctor,
            User::Patient(_) => Role::Patient,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn email(&self) -> &str {
        &self.base().email
    }

    pub fn specialty(&self) -> Option<&str> {
        match self {
            User::Doctor(doctor) => Some(&doctor.specialty),
            _ => None,
        }
    }
}

impl Entity for User {
    const COLLECTION: &'static str = keys::REGISTERED_USERS;
    const NAME: &'static str = "User";

    fn id(&self) -> &str {
        &self.base().id
    }

    fn validate(&self) -> Result<()> {
        let base = self.base();
        require(Self::NAME, "id", &base.id)?;
        require(Self::NAME, "name", &base.name)?;
        require(Self::NAME, "email", &base.email)?;
        if !base.email.contains('@') {
            return Err(StoreError::validation(format!(
                "User {} has invalid email {}",
                base.id,
                StoreError::quote(&base.email)
            )));
        }
        if let User::Doctor(doctor) = self {
            require(Self::NAME, "specialty", &doctor.specialty)?;
        }
        Ok(())
    }
}
