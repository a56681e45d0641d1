//! Member-facing session operations.
//!
//! [`Authenticator`] is what pages call to log in and out, to enrol new
//! members and to guard routes. It is the only place besides the refresh
//! coordinator that replaces the session wholesale.
//!
//! Login, enrolment and ID checks are sent without credentials. A stale
//! token must not turn a wrong password into a refresh attempt.
//!
//! Login takes a JSON body. Enrolment and profile updates are bound from
//! form fields by the backend and are sent as forms.

use std::sync::Arc;

use crate::{
    client::ApiClient,
    config::AuthConfig,
    error::{Error, Result},
    events::{Emitter, Event, Notice},
    protocol::{
        auth::{Credentials, TokenGrant},
        members::{Enrolled, ProfileChanges, SignupForm, DUPLICATE_ID},
        Envelope,
    },
    session::{Session, SessionState, UserProfile},
};

/// Outcome of guarding a protected route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Access {
    /// Render the route.
    Granted,

    /// Nobody is logged in: navigate to this login route, replacing the
    /// current page.
    Login(String),

    /// Logged in without a permitted role: navigate to the home route.
    Home,
}

/// Login, logout, enrolment and profile operations.
#[derive(Clone)]
pub struct Authenticator {
    paths: AuthConfig,
    login_route: String,
    session: Arc<SessionState>,
    events: Emitter,

    /// Sends requests with credentials, refreshing them when needed
    api: ApiClient,

    /// Sends requests to the same backend without credentials
    public: ApiClient,
}

impl Authenticator {
    pub fn new(
        paths: AuthConfig,
        login_route: impl Into<String>,
        session: Arc<SessionState>,
        events: Emitter,
        api: ApiClient,
        public: ApiClient,
    ) -> Self {
        Self {
            paths,
            login_route: login_route.into(),
            session,
            events,
            api,
            public,
        }
    }

    /// Logs in and replaces the session with the granted credentials.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` with the backend's message if the login is
    /// refused, or the transport error if the backend could not be reached.
    /// The session is unchanged on error.
    pub async fn login(&self, credentials: &Credentials) -> Result<UserProfile> {
        debug!("logging in as {}", credentials.mem_id);

        let grant = self
            .public
            .post_json(&self.paths.login_path, &[], credentials)
            .await?
            .json::<Envelope<TokenGrant>>("login")?
            .into_data("login failed", Error::unauthenticated)?;

        let session = Session::from(grant);
        let user = session.user.clone().ok_or_else(|| Error::data_loss("login granted no user"))?;
        self.session.update(session)?;

        info!("logged in as {}", user.id);
        self.events.emit(Event::LoggedIn {
            user_id: user.id.clone(),
        });
        Ok(user)
    }

    /// Clears the session locally. The backend is not contacted.
    pub fn logout(&self) {
        let user = self.session.user();
        self.session.logout();

        if let Some(user) = user {
            info!("logged out {}", user.id);
        }
        self.events.emit(Event::LoggedOut);
    }

    /// Enrols a new member and returns the member UUID assigned to it.
    ///
    /// Does not log in.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` with the backend's message if enrolment is
    /// refused, or `DataLoss` if the backend assigned no UUID.
    pub async fn signup(&self, form: &SignupForm) -> Result<String> {
        debug!("enrolling {}", form.mem_id);

        let enrolled = self
            .public
            .post_form(&self.paths.enroll_path, &[], form)
            .await?
            .json::<Envelope<Enrolled>>("enroll")?
            .into_data("signup failed", Error::invalid_argument)?;

        let uuid = enrolled
            .mem_uuid
            .filter(|uuid| !uuid.is_empty())
            .ok_or_else(|| Error::data_loss("backend assigned no member uuid"))?;

        info!("enrolled {} as {uuid}", form.mem_id);
        Ok(uuid)
    }

    /// Whether `mem_id` is still free to enrol.
    ///
    /// # Errors
    ///
    /// Returns error if the backend could not be asked.
    pub async fn is_id_available(&self, mem_id: &str) -> Result<bool> {
        let envelope = self
            .public
            .post_empty(&self.paths.id_check_path, &[("memId", mem_id)])
            .await?
            .json::<Envelope<String>>("idchk")?;

        let available = envelope.data.as_deref() != Some(DUPLICATE_ID);
        debug!("{mem_id} is {}", if available { "available" } else { "taken" });
        Ok(available)
    }

    /// Updates the profile of `mem_id` and merges the fields the backend
    /// returns into the session user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` with the backend's message if the update is
    /// refused, or any error of the authenticated request pipeline.
    pub async fn update_profile(&self, mem_id: &str, changes: &ProfileChanges) -> Result<UserProfile> {
        let path = format!("{}/{mem_id}", self.paths.members_path.trim_end_matches('/'));

        let updated = self
            .api
            .put_form(&path, &[], changes)
            .await?
            .json::<Envelope<ProfileChanges>>("update-profile")?
            .into_data("profile update failed", Error::invalid_argument)?;

        self.session.merge_user(updated)?;
        let user = self
            .session
            .user()
            .ok_or_else(|| Error::failed_precondition("no user is logged in"))?;

        debug!("updated profile of {}", user.id);
        self.events
            .emit(Event::Notice(Notice::success("Profile updated.")));
        Ok(user)
    }

    /// Guards a protected route.
    ///
    /// An empty `roles` list admits every logged-in member.
    #[must_use]
    pub fn authorize(&self, roles: &[&str]) -> Access {
        let session = self.session.session();
        if !session.is_authenticated() {
            return Access::Login(self.login_route.clone());
        }

        let role = session.user.as_ref().and_then(|user| user.role.as_deref());
        if roles.is_empty() || role.is_some_and(|role| roles.contains(&role)) {
            Access::Granted
        } else {
            Access::Home
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }
}
