//! Authentication session and its single point of mutation.
//!
//! [`Session`] is the authoritative record of the current credentials and
//! identity. [`SessionState`] owns it for the lifetime of the client:
//! * Reads go through accessors or a [`watch`] subscription
//! * Every write goes through [`SessionState::update`],
//!   [`SessionState::merge_user`] or [`SessionState::logout`]
//! * Every write is mirrored into the [`CredentialStore`] in the same
//!   critical section, so a subsequent `load()` always agrees with memory
//!
//! # Invariants
//!
//! * The access and refresh tokens are both present or both absent
//! * A user is present whenever an access token is present
//!
//! Patches that would break either invariant are rejected.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use serde::{de, de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use tokio::sync::watch;
use veil::Redact;

use crate::{
    credentials::CredentialStore,
    error::{Error, Result},
    jwt,
};

/// Role tag of administrators.
pub const ADMIN_ROLE: &str = "ADMIN";

/// Short field names some endpoints use, and the backend names they stand for.
const SHORT_NAMES: [(&str, &str); 4] = [
    ("id", "memId"),
    ("name", "memName"),
    ("role", "memType"),
    ("uuid", "memUuid"),
];

/// Current credentials and identity.
#[derive(Clone, Default, Eq, PartialEq, Redact)]
pub struct Session {
    /// Short-lived bearer credential
    #[redact]
    pub access_token: Option<String>,

    /// Long-lived credential used only to mint new access tokens
    #[redact]
    pub refresh_token: Option<String>,

    /// Identity returned by the backend at login or refresh time
    pub user: Option<UserProfile>,
}

impl Session {
    /// Creates a complete session.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        user: UserProfile,
    ) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
            user: Some(user),
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }

    /// Checks the session invariants.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a partial token pair or for an access
    /// token without a user.
    pub fn validate(&self) -> Result<()> {
        if self.access_token.is_some() != self.refresh_token.is_some() {
            return Err(Error::invalid_argument(
                "access and refresh tokens must be set or cleared together",
            ));
        }

        if self.access_token.is_some() && self.user.is_none() {
            return Err(Error::invalid_argument(
                "an authenticated session requires a user",
            ));
        }

        Ok(())
    }
}

/// Identity and role snapshot of the logged-in member.
///
/// Fields the client does not interpret are kept in `extra` so that the
/// profile survives persistence unchanged. A short name such as `id` is read
/// as `memId` only when `memId` itself is absent; otherwise it is kept as an
/// unknown field.
#[skip_serializing_none]
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct UserProfile {
    /// Member login ID
    #[serde(rename = "memId")]
    pub id: String,

    /// Display name
    #[serde(rename = "memName")]
    pub name: Option<String>,

    /// Role or member type tag, e.g. `ADMIN`
    #[serde(rename = "memType")]
    pub role: Option<String>,

    /// Stable member UUID assigned at enrolment
    #[serde(rename = "memUuid")]
    pub uuid: Option<String>,

    /// Reference to the profile image
    #[serde(rename = "profileImage")]
    pub profile_image: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            role: None,
            uuid: None,
            profile_image: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }

    /// Overlays changed fields, as returned by a profile update, onto this
    /// profile.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the merged fields no longer form a
    /// valid profile, e.g. `memId` was set to a non-string. The profile is
    /// unchanged on error.
    pub fn merge(&mut self, mut changes: Map<String, Value>) -> Result<()> {
        let Value::Object(mut fields) = serde_json::to_value(&*self)? else {
            return Err(Error::internal("user profile did not serialize to an object"));
        };
        expand_short_names(&mut changes);
        fields.extend(changes);

        *self = serde_json::from_value(Value::Object(fields))?;
        Ok(())
    }
}

impl<'de> Deserialize<'de> for UserProfile {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        expand_short_names(&mut fields);

        let id = take::<String>(&mut fields, "memId")
            .map_err(<D::Error as de::Error>::custom)?
            .ok_or_else(|| <D::Error as de::Error>::missing_field("memId"))?;
        let mut optional = |key: &str| {
            take::<Option<String>>(&mut fields, key)
                .map(Option::flatten)
                .map_err(<D::Error as de::Error>::custom)
        };

        Ok(Self {
            id,
            name: optional("memName")?,
            role: optional("memType")?,
            uuid: optional("memUuid")?,
            profile_image: optional("profileImage")?,
            extra: fields,
        })
    }
}

fn take<T>(fields: &mut Map<String, Value>, key: &str) -> serde_json::Result<Option<T>>
where
    T: DeserializeOwned,
{
    fields.remove(key).map(serde_json::from_value).transpose()
}

/// Renames short field names to their backend names, unless the backend name
/// is present as well.
fn expand_short_names(fields: &mut Map<String, Value>) {
    for (short, name) in SHORT_NAMES {
        if fields.contains_key(name) {
            continue;
        }
        if let Some(value) = fields.remove(short) {
            fields.insert(name.to_owned(), value);
        }
    }
}

/// Partial update of a [`Session`].
///
/// Fields left untouched keep their current value. Converting a whole
/// [`Session`] into a patch replaces every field.
#[derive(Clone, Default, Redact)]
pub struct SessionPatch {
    #[redact]
    access_token: Option<Option<String>>,
    #[redact]
    refresh_token: Option<Option<String>>,
    user: Option<Option<UserProfile>>,
}

impl SessionPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn access_token(mut self, token: Option<String>) -> Self {
        self.access_token = Some(token);
        self
    }

    #[must_use]
    pub fn refresh_token(mut self, token: Option<String>) -> Self {
        self.refresh_token = Some(token);
        self
    }

    #[must_use]
    pub fn user(mut self, user: Option<UserProfile>) -> Self {
        self.user = Some(user);
        self
    }

    /// Returns `session` with this patch applied.
    #[must_use]
    pub fn apply(self, session: &Session) -> Session {
        Session {
            access_token: self
                .access_token
                .unwrap_or_else(|| session.access_token.clone()),
            refresh_token: self
                .refresh_token
                .unwrap_or_else(|| session.refresh_token.clone()),
            user: self.user.unwrap_or_else(|| session.user.clone()),
        }
    }
}

impl From<Session> for SessionPatch {
    fn from(session: Session) -> Self {
        Self {
            access_token: Some(session.access_token),
            refresh_token: Some(session.refresh_token),
            user: Some(session.user),
        }
    }
}

/// Process-wide owner of the current [`Session`].
pub struct SessionState {
    store: CredentialStore,
    current: watch::Sender<Session>,

    /// Serializes writers so that memory and storage change together.
    writer: Mutex<()>,
}

impl SessionState {
    /// Restores the persisted session.
    ///
    /// A persisted session that violates the invariants, for example one
    /// whose user record could not be parsed, is discarded and cleared from
    /// storage.
    pub fn new(store: CredentialStore) -> Self {
        let mut session = store.load();
        if let Err(e) = session.validate() {
            warn!("discarding persisted session: {e}");
            if let Err(e) = store.clear() {
                error!("could not clear persisted session: {e}");
            }
            session = Session::default();
        }

        if let Some(ref user) = session.user {
            debug!("restored session for {}", user.id);
        }

        let (current, _) = watch::channel(session);
        Self {
            store,
            current,
            writer: Mutex::new(()),
        }
    }

    /// A snapshot of the current session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.current.borrow().clone()
    }

    /// Subscribes to session changes.
    ///
    /// The receiver is marked changed after every successful mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.current.subscribe()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.current.borrow().access_token.clone()
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.current.borrow().refresh_token.clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.current.borrow().user.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current.borrow().is_authenticated()
    }

    /// When the current access token expires, if it carries that claim.
    #[must_use]
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.current
            .borrow()
            .access_token
            .as_deref()
            .and_then(jwt::expires_at)
    }

    /// Merges `patch` into the session, persists it and notifies
    /// subscribers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the result would violate the session
    /// invariants, or the storage error if it could not be persisted. In
    /// both cases neither memory nor storage is changed.
    pub fn update(&self, patch: impl Into<SessionPatch>) -> Result<()> {
        let _writer = self.lock_writer();

        let next = patch.into().apply(&self.current.borrow());
        next.validate()?;

        self.commit(next)
    }

    /// Merges changed profile fields into the current user.
    ///
    /// # Errors
    ///
    /// Returns `FailedPrecondition` when nobody is logged in, or the merge
    /// or storage error. The session is unchanged on error.
    pub fn merge_user(&self, changes: Map<String, Value>) -> Result<()> {
        let _writer = self.lock_writer();

        let mut next = self.current.borrow().clone();
        let Some(ref mut user) = next.user else {
            return Err(Error::failed_precondition("no user is logged in"));
        };
        user.merge(changes)?;

        self.commit(next)
    }

    /// Clears the session in memory and in storage.
    ///
    /// Cannot fail: a storage failure is logged and memory is cleared
    /// regardless.
    pub fn logout(&self) {
        let _writer = self.lock_writer();

        self.current.send_replace(Session::default());
        if let Err(e) = self.store.clear() {
            error!("could not clear persisted session: {e}");
        }
    }

    fn commit(&self, next: Session) -> Result<()> {
        self.store.save(&next)?;
        self.current.send_replace(next);
        Ok(())
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`, so a poisoned lock holds no broken state.
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::storage::{MemoryStorage, Storage};

    fn state() -> (CredentialStore, SessionState) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(storage);
        (store.clone(), SessionState::new(store))
    }

    #[test]
    fn user_profile_accepts_short_field_names() {
        let user: UserProfile = serde_json::from_str(r#"{"id":"u1","role":"ADMIN"}"#).unwrap();
        assert_eq!(user, UserProfile::new("u1").with_role("ADMIN"));
        assert_eq!(
            serde_json::to_string(&user).unwrap(),
            r#"{"memId":"u1","memType":"ADMIN"}"#
        );
    }

    #[test]
    fn short_field_name_next_to_backend_name_is_kept_as_extra() {
        let user: UserProfile = serde_json::from_str(r#"{"memId":"u1","id":7}"#).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.extra["id"], json!(7));

        let reparsed: UserProfile =
            serde_json::from_str(&serde_json::to_string(&user).unwrap()).unwrap();
        assert_eq!(reparsed, user);
    }

    #[test]
    fn user_profile_requires_member_id() {
        assert!(serde_json::from_str::<UserProfile>(r#"{"memName":"Kim"}"#).is_err());
        assert!(serde_json::from_str::<UserProfile>(r#"{"memId":7}"#).is_err());
    }

    #[test]
    fn user_profile_keeps_unknown_fields() {
        let json = r#"{"memId":"u1","memType":"ADMIN","memEmail":"u1@example.com"}"#;
        let user: UserProfile = serde_json::from_str(json).unwrap();
        assert!(user.is_admin());
        assert_eq!(user.extra["memEmail"], json!("u1@example.com"));

        let reparsed: UserProfile =
            serde_json::from_str(&serde_json::to_string(&user).unwrap()).unwrap();
        assert_eq!(reparsed, user);
    }

    #[test]
    fn merge_overlays_changes() {
        let mut user = UserProfile::new("u1");
        let Value::Object(changes) = json!({"memName": "Kim", "memEmail": "kim@example.com"}) else {
            unreachable!()
        };
        user.merge(changes).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.name.as_deref(), Some("Kim"));
        assert_eq!(user.extra["memEmail"], json!("kim@example.com"));
    }

    #[test]
    fn merge_renames_short_field_names() {
        let mut user = UserProfile::new("u1");
        user.name = Some("Kim".to_owned());

        let Value::Object(changes) = json!({"name": "Lee"}) else {
            unreachable!()
        };
        user.merge(changes).unwrap();
        assert_eq!(user.name.as_deref(), Some("Lee"));
        assert!(user.extra.is_empty());
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let session = Session::new("secret-access", "secret-refresh", UserProfile::new("u1"));
        let debug = format!("{session:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("u1"));
    }

    #[test]
    fn update_persists_and_notifies() {
        let (store, state) = state();
        let mut rx = state.subscribe();

        state
            .update(Session::new("A1", "R1", UserProfile::new("u1")))
            .unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().access_token.as_deref(), Some("A1"));
        assert_eq!(store.load(), state.session());
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let (store, state) = state();
        state
            .update(Session::new("A1", "R1", UserProfile::new("u1")))
            .unwrap();

        state
            .update(
                SessionPatch::new()
                    .access_token(Some("A2".to_owned()))
                    .refresh_token(Some("R2".to_owned())),
            )
            .unwrap();

        let session = state.session();
        assert_eq!(session.access_token.as_deref(), Some("A2"));
        assert_eq!(session.refresh_token.as_deref(), Some("R2"));
        assert_eq!(session.user, Some(UserProfile::new("u1")));
        assert_eq!(store.load(), session);
    }

    #[test]
    fn invalid_patch_changes_nothing() {
        let (store, state) = state();
        state
            .update(Session::new("A1", "R1", UserProfile::new("u1")))
            .unwrap();
        let before = state.session();

        let err = state
            .update(SessionPatch::new().refresh_token(None))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);

        let err = state.update(SessionPatch::new().user(None)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);

        assert_eq!(state.session(), before);
        assert_eq!(store.load(), before);
    }

    #[test]
    fn logout_clears_memory_and_storage() {
        let (store, state) = state();
        state
            .update(Session::new("A1", "R1", UserProfile::new("u1")))
            .unwrap();

        state.logout();
        assert!(state.session().is_empty());
        assert!(store.load().is_empty());

        // Logging out twice is harmless.
        state.logout();
        assert!(state.session().is_empty());
    }

    #[test]
    fn merge_user_requires_login() {
        let (_, state) = state();
        let err = state.merge_user(Map::new()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::FailedPrecondition);
    }

    #[test]
    fn partial_persisted_session_is_discarded() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage.set("accessToken", "A1").unwrap();
        storage.set("refreshToken", "R1").unwrap();
        storage.set("user", "garbage").unwrap();

        let store = CredentialStore::new(storage);
        let state = SessionState::new(store.clone());

        assert!(state.session().is_empty());
        assert!(store.load().is_empty());
    }
}
