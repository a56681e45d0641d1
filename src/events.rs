//! Events emitted by the session client.
//!
//! The client has no user interface of its own. Side effects that a UI has
//! to render, such as the notice shown when a session expires or the
//! navigation back to the login page, are broadcast as [`Event`]s instead.
//!
//! # Example
//!
//! ```rust
//! use portal::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::Notice(notice) => println!("{notice}"),
//!         Event::Redirect(route) => println!("navigate to {route}"),
//!         _ => {}
//!     }
//! }
//! ```

use std::fmt;

use tokio::sync::broadcast;

/// Number of events buffered per subscriber before the oldest are dropped.
pub const CAPACITY: usize = 16;

/// Significant session changes and user-facing side effects.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A member logged in.
    LoggedIn {
        /// ID of the member
        user_id: String,
    },

    /// The session was cleared on request.
    LoggedOut,

    /// The access token was renewed with the refresh token.
    Refreshed,

    /// A message the UI should show, e.g. as a toast.
    Notice(Notice),

    /// The UI should navigate to this route, replacing the current page.
    Redirect(String),
}

/// Severity of a [`Notice`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    Success,
    Error,
}

/// User-visible message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Notice {
    pub level: Level,
    pub message: String,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            Level::Success => "success",
            Level::Error => "error",
        };
        write!(f, "[{level}] {}", self.message)
    }
}

/// Sending half shared by everything that emits events.
#[derive(Clone, Debug)]
pub struct Emitter {
    tx: broadcast::Sender<Event>,
}

impl Emitter {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emits `event` to current subscribers.
    ///
    /// Having no subscribers is not an error: nobody is rendering.
    pub fn emit(&self, event: Event) {
        trace!("event: {event:?}");
        let _ = self.tx.send(event);
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}
