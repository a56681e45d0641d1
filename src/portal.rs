//! Process-wide wiring of the session client.
//!
//! A [`Portal`] owns exactly one of each singleton: the session, the event
//! emitter, the refresh coordinator, and one [`ApiClient`] per configured
//! backend. Everything it hands out shares them.
//!
//! # Example
//!
//! ```rust
//! use portal::{config::Config, portal::Portal, protocol::auth::Credentials};
//!
//! let portal = Portal::from_config(Config::default())?;
//! portal.auth().login(&Credentials::new("u1", "p1")).await?;
//! let notices = portal.client("api")?.get("/api/notices", &[]).await?;
//! ```

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    auth::Authenticator,
    client::{ApiClient, Auth},
    config::{Backend, Config},
    credentials::CredentialStore,
    error::{Error, Result},
    events::{Emitter, Event},
    http::{self, Transport},
    refresh::Coordinator,
    session::SessionState,
    storage::{FileStorage, Storage},
};

pub struct Portal {
    config: Config,
    session: Arc<SessionState>,
    events: Emitter,
    coordinator: Coordinator,
    clients: BTreeMap<String, ApiClient>,
    auth: Authenticator,
}

impl Portal {
    /// Wires a portal around `storage` and `transport`.
    ///
    /// The session persisted in `storage` is restored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn new(config: Config, storage: Arc<dyn Storage>, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let session = Arc::new(SessionState::new(CredentialStore::new(storage)));
        let events = Emitter::new();
        let coordinator = Coordinator::new(
            &config,
            Arc::clone(&transport),
            Arc::clone(&session),
            events.clone(),
        )?;

        let auth = Auth {
            session: Arc::clone(&session),
            coordinator: coordinator.clone(),
        };

        let clients: BTreeMap<_, _> = config
            .backends
            .iter()
            .map(|(name, backend)| {
                let client = ApiClient::new(
                    name.clone(),
                    backend.clone(),
                    Arc::clone(&transport),
                    Some(auth.clone()),
                );
                debug!("{client:?}");
                (name.clone(), client)
            })
            .collect();

        let auth_backend = config.auth_backend()?;
        let api = clients
            .get(&config.auth.backend)
            .cloned()
            .ok_or_else(|| Error::internal("auth backend client missing"))?;
        let public = ApiClient::new(
            format!("{}-public", config.auth.backend),
            Backend::new(auth_backend.url.clone(), false),
            transport,
            None,
        );

        let auth = Authenticator::new(
            config.auth.clone(),
            config.login_route.clone(),
            Arc::clone(&session),
            events.clone(),
            api,
            public,
        );

        Ok(Self {
            config,
            session,
            events,
            coordinator,
            clients,
            auth,
        })
    }

    /// Wires a portal that persists credentials in the configured file and
    /// talks to the backends over HTTP.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn from_config(config: Config) -> Result<Self> {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(config.storage.clone()));
        let transport: Arc<dyn Transport> = Arc::new(http::Client::new(&config)?);
        Self::new(config, storage, transport)
    }

    /// The client of the backend called `name`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such backend is configured.
    pub fn client(&self, name: &str) -> Result<&ApiClient> {
        self.clients
            .get(name)
            .ok_or_else(|| Error::not_found(format!("backend \"{name}\" is not configured")))
    }

    #[must_use]
    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    #[must_use]
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribes to notices, redirects and session changes.
    #[must_use]
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}
