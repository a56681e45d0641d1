//! Wire types of the member portal backend.
//!
//! Every backend endpoint answers with the same [`Envelope`]:
//!
//! ```json
//! {
//!     "success": true,
//!     "message": "optional human-readable text",
//!     "data": { ... }
//! }
//! ```
//!
//! # Submodules
//!
//! * [`auth`] - login and refresh-token exchange
//! * [`members`] - enrolment, ID checks and profile updates

pub mod auth;
pub mod members;

use std::fmt::Debug;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Response envelope of the backend.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Envelope<T> {
    /// Whether the backend declared the operation successful
    #[serde(default)]
    pub success: bool,

    /// Explanation, usually present on failure
    pub message: Option<String>,

    /// Payload, usually present on success
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Returns the payload of a declared success.
    ///
    /// # Errors
    ///
    /// A declared failure becomes an error built by `on_failure` from the
    /// backend's message, or `fallback` if it sent none. A success without
    /// payload is `DataLoss`.
    pub fn into_data<F>(self, fallback: &str, on_failure: F) -> Result<T>
    where
        F: FnOnce(String) -> Error,
    {
        if !self.success {
            return Err(on_failure(
                self.message.unwrap_or_else(|| fallback.to_owned()),
            ));
        }

        self.data
            .ok_or_else(|| Error::data_loss("response declared success without data"))
    }
}

/// Parses and logs JSON responses from the backend.
///
/// # Logging
///
/// * Success: Logs parsed structure at TRACE level
/// * Parse Error: Logs raw JSON at TRACE level if valid JSON
/// * Invalid JSON: Logs error and raw text at ERROR level
///
/// Callers are expected to use types whose `Debug` redacts secrets.
///
/// # Errors
///
/// Returns error if the body is not valid JSON or does not match `T`.
pub fn json<T>(body: &[u8], origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_slice(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if serde_json::from_slice::<serde_json::Value>(body).is_ok() {
                debug!("{origin}: unexpected response shape ({e})");
            } else {
                error!("{origin}: failed parsing response ({e:?})");
                trace!("{}", String::from_utf8_lossy(body));
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn declared_failure_uses_backend_message() {
        let envelope: Envelope<String> =
            json(br#"{"success":false,"message":"wrong password"}"#, "test").unwrap();
        let err = envelope
            .into_data("login failed", Error::unauthenticated)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
        assert!(err.to_string().ends_with("wrong password"));
    }

    #[test]
    fn declared_failure_without_message_uses_fallback() {
        let envelope: Envelope<String> = json(br#"{"success":false}"#, "test").unwrap();
        let err = envelope
            .into_data("login failed", Error::unauthenticated)
            .unwrap_err();
        assert!(err.to_string().ends_with("login failed"));
    }

    #[test]
    fn success_without_data_is_data_loss() {
        let envelope: Envelope<String> = json(br#"{"success":true}"#, "test").unwrap();
        let err = envelope
            .into_data("unused", Error::unauthenticated)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataLoss);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(json::<Envelope<String>>(b"<html>", "test").is_err());
    }
}
