//! Backend API client with transparent credential handling.
//!
//! Every request to an authenticated backend passes through the same
//! pipeline:
//!
//! 1. The current access token, if any, is attached as a bearer credential.
//! 2. Success passes through unchanged. A failure other than 401 becomes an
//!    error whose kind follows the status.
//! 3. On 401 the request is retried at most once. If another request
//!    already renewed the session while this one was in flight, the newer
//!    token is used right away. Otherwise the [`Coordinator`] refreshes the
//!    session, with concurrent failures sharing a single exchange.
//! 4. If the refresh fails, the caller sees the original 401.
//!
//! Clients of unauthenticated backends skip steps 1, 3 and 4.

use std::{fmt, sync::Arc};

use reqwest::{Method, StatusCode, Url};
use serde::Serialize;

use crate::{
    config::Backend,
    error::Result,
    http::{Response, Transport},
    refresh::Coordinator,
    request::PendingRequest,
    session::SessionState,
};

/// Session and refresh coordinator shared by authenticated clients.
#[derive(Clone)]
pub struct Auth {
    pub session: Arc<SessionState>,
    pub coordinator: Coordinator,
}

/// Client of one backend.
#[derive(Clone)]
pub struct ApiClient {
    name: String,
    backend: Backend,
    transport: Arc<dyn Transport>,
    auth: Option<Auth>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("name", &self.name)
            .field("url", &self.backend.url.as_str())
            .field("authenticated", &self.auth.is_some())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client for `backend`.
    ///
    /// `auth` is only used when the backend is configured as authenticated.
    pub fn new(
        name: impl Into<String>,
        backend: Backend,
        transport: Arc<dyn Transport>,
        auth: Option<Auth>,
    ) -> Self {
        let auth = auth.filter(|_| backend.authenticated);
        Self {
            name: name.into(),
            backend,
            transport,
            auth,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }

    /// Resolves `path` against the backend and appends `query` pairs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the result is not a valid URL.
    pub fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.backend.endpoint(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        let request = PendingRequest::new(Method::GET, self.url(path, query)?);
        self.send(request).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn delete(&self, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        let request = PendingRequest::new(Method::DELETE, self.url(path, query)?);
        self.send(request).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn post_json<T>(&self, path: &str, query: &[(&str, &str)], body: &T) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        let request = PendingRequest::new(Method::POST, self.url(path, query)?).with_json(body)?;
        self.send(request).await
    }

    /// POST with a form body, as the member endpoints expect.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn post_form<T>(&self, path: &str, query: &[(&str, &str)], body: &T) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        let request = PendingRequest::new(Method::POST, self.url(path, query)?).with_form(body)?;
        self.send(request).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn put_form<T>(&self, path: &str, query: &[(&str, &str)], body: &T) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        let request = PendingRequest::new(Method::PUT, self.url(path, query)?).with_form(body)?;
        self.send(request).await
    }

    /// POST without a body, for endpoints that take their arguments in the
    /// query string.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn post_empty(&self, path: &str, query: &[(&str, &str)]) -> Result<Response> {
        let request = PendingRequest::new(Method::POST, self.url(path, query)?);
        self.send(request).await
    }

    /// Sends `request` through the credential pipeline.
    ///
    /// # Errors
    ///
    /// Returns error if the request could not be exchanged, or if the
    /// backend answered with a non-success status. A 401 that survives the
    /// refresh-and-retry cycle is returned as is.
    pub async fn send(&self, request: PendingRequest) -> Result<Response> {
        let Some(ref auth) = self.auth else {
            let response = self.transport.execute(request.build(None)?).await?;
            return response.error_for_status();
        };

        let bearer = auth.session.access_token();
        let response = self.dispatch(&request, bearer.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return response.error_for_status();
        }

        let unauthorized = response.to_error();
        if request.is_retried() || auth.session.refresh_token().is_none() {
            debug!("{} {}: unauthorized, not retrying", request.method(), request.url());
            return Err(unauthorized);
        }

        let retry = request.retried();
        let current = auth.session.access_token();
        let token = match current {
            Some(current) if bearer.as_deref() != Some(current.as_str()) => {
                debug!("session was renewed while {} was in flight", request.url());
                current
            }
            _ => match auth.coordinator.refresh().await {
                Ok(token) => token,
                Err(e) => {
                    debug!("{} {}: {e}", request.method(), request.url());
                    return Err(unauthorized);
                }
            },
        };

        self.dispatch(&retry, Some(&token))
            .await?
            .error_for_status()
    }

    async fn dispatch(&self, request: &PendingRequest, bearer: Option<&str>) -> Result<Response> {
        trace!(
            "{}: {} {} (retries: {})",
            self.name,
            request.method(),
            request.url(),
            request.retries()
        );
        self.transport.execute(request.build(bearer)?).await
    }
}
