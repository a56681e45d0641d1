//! Replayable descriptions of outbound requests.
//!
//! A `reqwest::Request` cannot always be cloned once built, yet a request
//! that failed with 401 has to be sent a second time with new credentials.
//! [`PendingRequest`] keeps everything needed to build it again, plus the
//! number of times it has been retried so that it is never retried twice.

use http::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::Serialize;
use veil::Redact;

use crate::error::Result;

/// `Content-Type` of form bodies.
pub const FORM_CONTENT: &str = "application/x-www-form-urlencoded";

/// Immutable descriptor of an outbound call.
#[derive(Clone, Redact)]
pub struct PendingRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    #[redact]
    body: Option<Vec<u8>>,
    retries: u8,
}

impl PendingRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            retries: 0,
        }
    }

    /// Returns this request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns error if `body` cannot be serialized.
    pub fn with_json<T>(mut self, body: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        self.body = Some(serde_json::to_vec(body)?);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(self)
    }

    /// Returns this request with a `application/x-www-form-urlencoded` body,
    /// as sent by HTML forms.
    ///
    /// # Errors
    ///
    /// Returns error if `body` is not a flat list of scalar fields.
    pub fn with_form<T>(self, body: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_urlencoded::to_string(body)?;
        Ok(self.with_body(encoded, HeaderValue::from_static(FORM_CONTENT)))
    }

    /// Returns this request with a raw body of the given content type.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>, content_type: HeaderValue) -> Self {
        self.body = Some(body.into());
        self.headers.insert(CONTENT_TYPE, content_type);
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    #[must_use]
    pub fn retries(&self) -> u8 {
        self.retries
    }

    /// Whether this request was already re-issued after an authorization
    /// failure.
    #[must_use]
    pub fn is_retried(&self) -> bool {
        self.retries > 0
    }

    /// A copy of this request marked as retried once more.
    #[must_use]
    pub fn retried(&self) -> Self {
        Self {
            retries: self.retries.saturating_add(1),
            ..self.clone()
        }
    }

    /// Builds the request to send, with `bearer` as credentials if given.
    ///
    /// # Errors
    ///
    /// Returns error if `bearer` cannot be used in a header value.
    pub fn build(&self, bearer: Option<&str>) -> Result<reqwest::Request> {
        let mut request = reqwest::Request::new(self.method.clone(), self.url.clone());

        let headers = request.headers_mut();
        headers.extend(self.headers.clone());

        if let Some(token) = bearer {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        if let Some(ref body) = self.body {
            *request.body_mut() = Some(body.clone().into());
        }

        Ok(request)
    }
}
