//! Persistent credential store.
//!
//! Mirrors a [`Session`] into three independent [`Storage`] keys so that it
//! survives restarts:
//!
//! | key            | value                         |
//! |----------------|-------------------------------|
//! | `accessToken`  | access token                  |
//! | `refreshToken` | refresh token                 |
//! | `user`         | JSON-serialized user profile  |
//!
//! Loading never fails: a key that is missing, unreadable or unparsable
//! yields `None` for its field. Saving removes the key of every absent
//! field so the store never holds a stale value for a cleared field.

use std::sync::Arc;

use crate::{
    error::Result,
    session::{Session, UserProfile},
    storage::Storage,
};

/// Storage key of the access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key of the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Storage key of the JSON-serialized user profile.
pub const USER_KEY: &str = "user";

#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Reconstructs the persisted session, field by field.
    #[must_use]
    pub fn load(&self) -> Session {
        let user = self.read(USER_KEY).and_then(|json| {
            serde_json::from_str::<UserProfile>(&json)
                .inspect_err(|e| warn!("ignoring unparsable persisted user: {e}"))
                .ok()
        });

        Session {
            access_token: self.read(ACCESS_TOKEN_KEY),
            refresh_token: self.read(REFRESH_TOKEN_KEY),
            user,
        }
    }

    /// Writes every present field and removes the key of every absent one.
    ///
    /// # Errors
    ///
    /// Returns the first storage or serialization failure. Keys written
    /// before the failure are not rolled back.
    pub fn save(&self, session: &Session) -> Result<()> {
        self.write(ACCESS_TOKEN_KEY, session.access_token.as_deref())?;
        self.write(REFRESH_TOKEN_KEY, session.refresh_token.as_deref())?;

        let user = session
            .user
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.write(USER_KEY, user.as_deref())
    }

    /// Removes all three keys.
    ///
    /// # Errors
    ///
    /// Returns the first storage failure; the remaining keys are still
    /// attempted.
    pub fn clear(&self) -> Result<()> {
        let mut result = Ok(());
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.storage.remove(key) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("ignoring unreadable persisted {key}: {e}");
                None
            }
        }
    }

    fn write(&self, key: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => self.storage.set(key, value),
            None => self.storage.remove(key),
        }
    }
}
