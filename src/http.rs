//! HTTP transport for backend clients.
//!
//! This module provides:
//! * The [`Transport`] seam through which every request is executed
//! * [`Response`], a fully buffered backend response
//! * [`Client`], the `reqwest`-backed transport with consistent timeouts
//!   and headers
//!
//! A transport reports a response for every HTTP status. Only failures to
//! exchange a request at all, such as an unreachable host or a timeout,
//! are errors at this level. Classifying statuses is up to the caller.
//!
//! # Example
//!
//! ```rust
//! use portal::http::{Client, Transport};
//!
//! let client = Client::new(&config)?;
//! let response = client.execute(request).await?;
//! ```

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use reqwest::{
    self,
    header::{HeaderMap, HeaderValue, ACCEPT},
    StatusCode,
};
use serde::Deserialize;

use crate::{
    config::Config,
    error::{Error, Result},
    protocol::{self, Envelope},
};

/// Executes requests against a backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and buffers the response.
    ///
    /// # Errors
    ///
    /// Returns error if no response could be obtained.
    async fn execute(&self, request: reqwest::Request) -> Result<Response>;
}

/// Fully buffered backend response.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the body does not deserialize into `T`.
    pub fn json<T>(&self, origin: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de> + Debug,
    {
        protocol::json(&self.body, origin)
    }

    /// Turns a non-success status into an error.
    ///
    /// The error keeps the status and the backend's `message`, if the body
    /// is an envelope that carries one.
    ///
    /// # Errors
    ///
    /// Returns error if the status is not in the 2xx range.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }

        Err(self.to_error())
    }

    /// Builds the error describing this response.
    #[must_use]
    pub fn to_error(&self) -> Error {
        let message = serde_json::from_slice::<Envelope<serde_json::Value>>(&self.body)
            .ok()
            .and_then(|envelope| envelope.message)
            .unwrap_or_else(|| {
                self.status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_owned()
            });

        Error::from_status(self.status, message)
    }
}

/// `reqwest`-backed transport.
pub struct Client {
    inner: reqwest::Client,
}

impl Client {
    /// Duration to keep idle connections alive.
    ///
    /// Prevents frequent reconnection overhead for subsequent requests.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a new client.
    ///
    /// The configured request timeout bounds every exchange, including the
    /// refresh-token exchange, so that no request waits forever.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created, for example
    /// because the user agent is not a valid header value.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let inner = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .default_headers(headers)
            .user_agent(HeaderValue::from_str(&config.user_agent)?)
            .build()?;

        Ok(Self { inner })
    }
}

#[async_trait]
impl Transport for Client {
    async fn execute(&self, request: reqwest::Request) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();

        let response = self.inner.execute(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        trace!("{method} {url}: {status}");
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn success_passes_through() {
        let response = Response::new(StatusCode::OK, "{}");
        assert!(response.error_for_status().is_ok());
    }

    #[test]
    fn failure_keeps_backend_message() {
        let response = Response::new(
            StatusCode::CONFLICT,
            r#"{"success":false,"message":"duplicate id"}"#,
        );
        let err = response.error_for_status().unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert_eq!(err.status(), Some(StatusCode::CONFLICT));
        assert!(err.to_string().ends_with("duplicate id"));
    }

    #[test]
    fn failure_without_envelope_uses_reason() {
        let err = Response::new(StatusCode::UNAUTHORIZED, "")
            .error_for_status()
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert!(err.to_string().ends_with("Unauthorized"));
    }
}
