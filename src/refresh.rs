//! Token refresh coordination.
//!
//! When an authenticated request is rejected with 401, the access token is
//! renewed by exchanging the refresh token. The [`Coordinator`] makes sure
//! that this happens exactly once per failure episode, no matter how many
//! requests fail concurrently:
//!
//! ```text
//!          first 401                 grant stored
//!   Idle ────────────> Refreshing ──────────────> Succeeded ──> Idle
//!                          │  ▲
//!                          │  └── further 401s join the same episode
//!                          │
//!                          └─────────────────────> Failed ─────> Idle
//!            rejected, transport error, cancelled
//! ```
//!
//! The exchange runs on its own task and every waiter holds a shared handle
//! to its outcome, so a waiter that gives up cannot cancel it for others.
//! Settling is atomic with updating the session: waiters only observe the
//! new access token after it has been stored.
//!
//! On failure the session is torn down, a notice is emitted and the UI is
//! redirected to the login route. An episode that finds no refresh token
//! fails quietly, since the session was already logged out.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Method, Url};
use thiserror::Error;
use tokio::task::AbortHandle;

use crate::{
    config::Config,
    error::{self, Error},
    events::{Emitter, Event, Notice},
    http::Transport,
    protocol::{
        auth::{RefreshRequest, TokenGrant},
        Envelope,
    },
    request::PendingRequest,
    session::{Session, SessionState},
};

/// Why a refresh episode failed.
///
/// Cloned to every waiter of the episode.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    MissingToken,

    #[error("refresh token rejected: {0}")]
    Rejected(String),

    #[error("refresh exchange failed: {0}")]
    Transport(String),

    #[error("refreshed credentials could not be stored: {0}")]
    Persistence(String),

    #[error("refresh was cancelled")]
    Cancelled,
}

/// The new access token, or why there is none.
pub type Outcome = std::result::Result<String, RefreshError>;

type Episode = Shared<BoxFuture<'static, Outcome>>;

/// Externally visible state of the coordinator.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    Idle,
    Refreshing,
    Succeeded,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Idle => "idle",
            Self::Refreshing => "refreshing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{phase}")
    }
}

enum State {
    Idle,
    Refreshing {
        id: u64,
        episode: Episode,
        abort: AbortHandle,
    },
    Succeeded,
    Failed,
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::Refreshing { .. } => Phase::Refreshing,
            Self::Succeeded => Phase::Succeeded,
            Self::Failed => Phase::Failed,
        }
    }
}

struct Machine {
    state: State,
    episodes: u64,
}

impl Machine {
    fn transition(&mut self, next: State) {
        debug!("refresh: {} -> {}", self.state.phase(), next.phase());
        self.state = next;
    }
}

/// Deduplicates and settles refresh-token exchanges.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    session: Arc<SessionState>,
    events: Emitter,
    refresh_url: Url,
    login_route: String,
    expired_notice: String,
    machine: Mutex<Machine>,
}

impl Coordinator {
    /// Creates an idle coordinator that refreshes against the configured
    /// auth backend.
    ///
    /// # Errors
    ///
    /// Returns error if the refresh endpoint cannot be derived from
    /// `config`.
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        session: Arc<SessionState>,
        events: Emitter,
    ) -> error::Result<Self> {
        let refresh_url = config.auth_backend()?.endpoint(&config.auth.refresh_path)?;
        debug!("refresh endpoint: {refresh_url}");

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                session,
                events,
                refresh_url,
                login_route: config.login_route.clone(),
                expired_notice: config.expired_notice.clone(),
                machine: Mutex::new(Machine {
                    state: State::Idle,
                    episodes: 0,
                }),
            }),
        })
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.lock().state.phase()
    }

    /// Number of refresh exchanges started so far.
    #[must_use]
    pub fn episodes(&self) -> u64 {
        self.inner.lock().episodes
    }

    /// Obtains a new access token.
    ///
    /// Starts an exchange when idle, or joins the one in flight. All callers
    /// of the same episode receive the same outcome.
    ///
    /// # Errors
    ///
    /// Returns the reason the episode failed. By then the session has been
    /// cleared and, unless there was no refresh token to begin with, the
    /// expiry notice and redirect have been emitted.
    pub async fn refresh(&self) -> Outcome {
        let episode = {
            let mut machine = self.inner.lock();
            let in_flight = match machine.state {
                State::Refreshing { ref episode, .. } => Some(episode.clone()),
                _ => None,
            };

            if let Some(episode) = in_flight {
                trace!("joining refresh in flight");
                episode
            } else {
                Inner::begin(&self.inner, &mut machine)
            }
        };

        episode.await
    }

    /// Aborts the exchange in flight, settling it as failed.
    ///
    /// Returns whether there was an exchange to cancel.
    pub fn cancel(&self) -> bool {
        let id = {
            let machine = self.inner.lock();
            match machine.state {
                State::Refreshing { id, ref abort, .. } => {
                    abort.abort();
                    id
                }
                _ => return false,
            }
        };

        let _ = self.inner.settle(id, Err(RefreshError::Cancelled));
        true
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Machine> {
        // Every transition leaves the machine consistent before anything
        // that could panic runs.
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(this: &Arc<Self>, machine: &mut Machine) -> Episode {
        machine.episodes += 1;
        let id = machine.episodes;

        let inner = Arc::clone(this);
        let task = tokio::spawn(async move {
            let exchanged = inner.exchange().await;
            inner.settle(id, exchanged)
        });
        let abort = task.abort_handle();

        let inner = Arc::clone(this);
        let episode = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if e.is_panic() {
                        error!("refresh task panicked");
                    }
                    inner.settle(id, Err(RefreshError::Cancelled))
                }
            }
        }
        .boxed()
        .shared();

        machine.transition(State::Refreshing {
            id,
            episode: episode.clone(),
            abort,
        });
        episode
    }

    async fn exchange(&self) -> std::result::Result<TokenGrant, RefreshError> {
        let refresh_token = self
            .session
            .refresh_token()
            .ok_or(RefreshError::MissingToken)?;

        let request = PendingRequest::new(Method::POST, self.refresh_url.clone())
            .with_json(&RefreshRequest { refresh_token })
            .and_then(|request| request.build(None))
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        debug!("exchanging refresh token");
        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RefreshError::Rejected(response.to_error().to_string()));
        }

        response
            .json::<Envelope<TokenGrant>>("refresh-token")
            .and_then(|envelope| envelope.into_data("refresh token rejected", Error::unauthenticated))
            .map_err(|e| RefreshError::Rejected(e.to_string()))
    }

    /// Applies the outcome of episode `id`, unless it was settled already.
    fn settle(&self, id: u64, exchanged: std::result::Result<TokenGrant, RefreshError>) -> Outcome {
        let mut machine = self.lock();
        match machine.state {
            State::Refreshing { id: current, .. } if current == id => {}
            _ => return Err(RefreshError::Cancelled),
        }

        let outcome = exchanged.and_then(|grant| {
            let access_token = grant.access_token.clone();
            self.session
                .update(Session::from(grant))
                .map(|()| access_token)
                .map_err(|e| RefreshError::Persistence(e.to_string()))
        });

        match outcome {
            Ok(_) => {
                machine.transition(State::Succeeded);
                info!("session refreshed");
                self.events.emit(Event::Refreshed);
            }
            Err(RefreshError::MissingToken) => {
                // Nothing left to tear down: the session was already cleared.
                machine.transition(State::Failed);
                debug!("{}", RefreshError::MissingToken);
            }
            Err(ref e) => {
                machine.transition(State::Failed);
                warn!("{e}; logging out");
                self.session.logout();
                self.events
                    .emit(Event::Notice(Notice::error(self.expired_notice.clone())));
                self.events.emit(Event::Redirect(self.login_route.clone()));
            }
        }

        machine.transition(State::Idle);
        outcome
    }
}
