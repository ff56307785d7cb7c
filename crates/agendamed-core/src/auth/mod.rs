//! Authenticated session persistence.
//!
//! This module provides `SessionStore`, which keeps the signed-in user and
//! their token under the `user` and `token` keys. Both keys are always
//! written and cleared together.
//!
//! Credential checking itself lives in the client; only the persisted
//! outcome is handled here.

pub mod session;

pub use session::{generate_token, Session, SessionStore};
