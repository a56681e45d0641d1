//! Client configuration.
//!
//! Configuration is read from a TOML file at start-up. Every field has a
//! default that targets a local development backend, so an empty file is a
//! valid configuration:
//!
//! ```toml
//! storage = "credentials.toml"
//! request_timeout = 30
//!
//! [auth]
//! backend = "api"
//!
//! [backends.api]
//! url = "http://localhost:8888/first"
//!
//! [backends.speech]
//! url = "http://localhost:5000"
//! authenticated = false
//! ```
//!
//! Backend URLs can be overridden from the environment with
//! `PORTAL_<NAME>_URL`, e.g. `PORTAL_API_URL`.

use std::{collections::BTreeMap, fs, io, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use url::Url;

use crate::error::{Error, Result};

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `User-Agent` sent with every request
    pub user_agent: String,

    /// Upper bound on any single exchange with a backend
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,

    /// Upper bound on establishing a connection
    #[serde_as(as = "DurationSeconds<u64>")]
    pub connect_timeout: Duration,

    /// File that keeps the credentials across restarts
    pub storage: PathBuf,

    /// Route the UI is sent to when the session expires
    pub login_route: String,

    /// Notice shown when the session expires
    pub expired_notice: String,

    pub auth: AuthConfig,

    /// Backends by name
    pub backends: BTreeMap<String, Backend>,
}

/// Endpoints of the authenticating backend.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Name of the backend in [`Config::backends`] that issues tokens
    pub backend: String,

    pub login_path: String,
    pub refresh_path: String,
    pub enroll_path: String,
    pub id_check_path: String,
    pub members_path: String,
}

/// A backend service.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Backend {
    /// Base URL that request paths are appended to
    pub url: Url,

    /// Whether requests carry bearer credentials and 401s trigger a refresh
    #[serde(default = "default_authenticated")]
    pub authenticated: bool,
}

fn default_authenticated() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend: Config::API_BACKEND.to_owned(),
            login_path: "/api/members/login".to_owned(),
            refresh_path: "/api/members/refresh-token".to_owned(),
            enroll_path: "/api/members/enroll".to_owned(),
            id_check_path: "/api/members/idchk".to_owned(),
            members_path: "/api/members".to_owned(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let app_name = env!("CARGO_PKG_NAME");
        let app_version = env!("CARGO_PKG_VERSION");

        let mut backends = BTreeMap::new();
        backends.insert(
            Self::API_BACKEND.to_owned(),
            Backend::new(Self::default_url("http://localhost:8888/first"), true),
        );
        backends.insert(
            Self::SPEECH_BACKEND.to_owned(),
            Backend::new(Self::default_url("http://localhost:5000"), false),
        );

        Self {
            user_agent: format!("{app_name}/{app_version} (Rust)"),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            storage: PathBuf::from("credentials.toml"),
            login_route: "/login".to_owned(),
            expired_notice: "Your session has expired. Please log in again.".to_owned(),
            auth: AuthConfig::default(),
            backends,
        }
    }
}

impl Backend {
    #[must_use]
    pub fn new(url: Url, authenticated: bool) -> Self {
        Self { url, authenticated }
    }

    /// Appends `path` to the base URL, keeping the base path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the result is not a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let url_str = format!(
            "{}/{}",
            self.url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url_str.parse::<Url>().map_err(Into::into)
    }
}

impl Config {
    /// Name of the default member API backend.
    pub const API_BACKEND: &'static str = "api";

    /// Name of the default speech backend, which does not use bearer auth.
    pub const SPEECH_BACKEND: &'static str = "speech";

    /// Refuse to parse configuration files larger than this.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    fn default_url(url: &str) -> Url {
        Url::parse(url).expect("invalid default backend url")
    }

    /// Reads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is too large, or is not
    /// valid configuration.
    pub fn from_file(path: &str) -> Result<Self> {
        let attributes = fs::metadata(path)?;
        if attributes.len() > Self::MAX_FILE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{path} is too large"),
            )
            .into());
        }

        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        debug!("loaded configuration from {path}");
        Ok(config)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid configuration or the
    /// authenticating backend is not configured.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides backend URLs from `PORTAL_<NAME>_URL` variables.
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an invalid URL.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (name, backend) in &mut self.backends {
            let variable = format!("PORTAL_{}_URL", name.to_uppercase().replace('-', "_"));
            if let Some(value) = lookup(&variable) {
                backend.url = value
                    .parse()
                    .map_err(|e| Error::invalid_argument(format!("{variable}: {e}")))?;
                debug!("{name} backend url from {variable}: {}", backend.url);
            }
        }
        Ok(())
    }

    /// Checks that the authenticating backend exists and uses bearer auth.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        match self.backends.get(&self.auth.backend) {
            Some(backend) if backend.authenticated => Ok(()),
            Some(_) => Err(Error::invalid_argument(format!(
                "auth backend \"{}\" must be authenticated",
                self.auth.backend
            ))),
            None => Err(Error::invalid_argument(format!(
                "auth backend \"{}\" is not configured",
                self.auth.backend
            ))),
        }
    }

    /// The backend that issues tokens.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if it is not configured.
    pub fn auth_backend(&self) -> Result<&Backend> {
        self.backends.get(&self.auth.backend).ok_or_else(|| {
            Error::invalid_argument(format!(
                "auth backend \"{}\" is not configured",
                self.auth.backend
            ))
        })
    }
}
