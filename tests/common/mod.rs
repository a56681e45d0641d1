#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use portal::{
    config::Config,
    error::Result,
    events::Event,
    http::{Response, Transport},
    portal::Portal,
    request::FORM_CONTENT,
    session::{Session, UserProfile},
    storage::{MemoryStorage, Storage},
};
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method, StatusCode,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const LOGIN: &str = "/first/api/members/login";
pub const REFRESH: &str = "/first/api/members/refresh-token";
pub const ENROLL: &str = "/first/api/members/enroll";
pub const ID_CHECK: &str = "/first/api/members/idchk";
pub const NOTICES: &str = "/first/api/notices";

/// A request as seen by the fake backend.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Value,
}

impl Recorded {
    pub fn bearer(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .and_then(|value| value.strip_prefix("Bearer "))
    }
}

type Handler = Arc<dyn Fn(&Recorded) -> Response + Send + Sync>;

struct Route {
    handler: Handler,
    delay: Duration,
}

/// Scripted in-process backend.
#[derive(Default)]
pub struct FakeBackend {
    routes: Mutex<BTreeMap<(String, String), Route>>,
    log: Mutex<Vec<Recorded>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route<F>(&self, method: Method, path: &str, handler: F)
    where
        F: Fn(&Recorded) -> Response + Send + Sync + 'static,
    {
        self.delayed_route(method, path, Duration::ZERO, handler);
    }

    /// Like [`FakeBackend::route`], answering only after `delay`.
    pub fn delayed_route<F>(&self, method: Method, path: &str, delay: Duration, handler: F)
    where
        F: Fn(&Recorded) -> Response + Send + Sync + 'static,
    {
        self.routes.lock().unwrap().insert(
            (method.to_string(), path.to_owned()),
            Route {
                handler: Arc::new(handler),
                delay,
            },
        );
    }

    /// Requests received so far for `path`.
    pub fn requests(&self, path: &str) -> Vec<Recorded> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.path == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests(path).len()
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn execute(&self, request: reqwest::Request) -> Result<Response> {
        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .map(|value| value.to_str().unwrap().to_owned());
        let body = request
            .body()
            .and_then(reqwest::Body::as_bytes)
            .map(|bytes| match content_type.as_deref() {
                Some(FORM_CONTENT) => url::form_urlencoded::parse(bytes)
                    .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
                    .collect(),
                _ => serde_json::from_slice(bytes).unwrap(),
            })
            .unwrap_or(Value::Null);

        let recorded = Recorded {
            method: request.method().clone(),
            path: request.url().path().to_owned(),
            query: request.url().query().map(ToOwned::to_owned),
            authorization: request
                .headers()
                .get(AUTHORIZATION)
                .map(|value| value.to_str().unwrap().to_owned()),
            content_type,
            body,
        };
        self.log.lock().unwrap().push(recorded.clone());

        let route = {
            let routes = self.routes.lock().unwrap();
            routes
                .get(&(recorded.method.to_string(), recorded.path.clone()))
                .map(|route| (Arc::clone(&route.handler), route.delay))
        };

        let Some((handler, delay)) = route else {
            return Ok(Response::new(StatusCode::NOT_FOUND, ""));
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(handler(&recorded))
    }
}

pub fn ok(data: Value) -> Response {
    Response::new(
        StatusCode::OK,
        json!({"success": true, "data": data}).to_string(),
    )
}

pub fn declined(message: &str) -> Response {
    Response::new(
        StatusCode::OK,
        json!({"success": false, "message": message}).to_string(),
    )
}

pub fn unauthorized() -> Response {
    Response::new(
        StatusCode::UNAUTHORIZED,
        json!({"success": false, "message": "token expired"}).to_string(),
    )
}

pub fn grant(access_token: &str, refresh_token: &str, mem_id: &str) -> Response {
    ok(json!({
        "accessToken": access_token,
        "refreshToken": refresh_token,
        "user": {"memId": mem_id, "memType": "USER"},
    }))
}

/// Answers `NOTICES` only for requests carrying `token`.
pub fn notices_for(token: &'static str) -> impl Fn(&Recorded) -> Response + Send + Sync {
    move |request| {
        if request.bearer() == Some(token) {
            ok(json!([{"title": "hello"}]))
        } else {
            unauthorized()
        }
    }
}

pub fn storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new())
}

/// Storage holding the session of `u1` with the given tokens.
pub fn logged_in_storage(access_token: &str, refresh_token: &str) -> Arc<MemoryStorage> {
    let storage = storage();
    storage.set("accessToken", access_token).unwrap();
    storage.set("refreshToken", refresh_token).unwrap();
    storage
        .set(
            "user",
            &serde_json::to_string(&UserProfile::new("u1").with_role("USER")).unwrap(),
        )
        .unwrap();
    storage
}

pub fn portal(backend: &Arc<FakeBackend>, storage: &Arc<MemoryStorage>) -> Portal {
    let storage: Arc<dyn Storage> = Arc::clone(storage) as Arc<dyn Storage>;
    let transport: Arc<dyn Transport> = Arc::clone(backend) as Arc<dyn Transport>;
    Portal::new(Config::default(), storage, transport).unwrap()
}

pub fn session(access_token: &str, refresh_token: &str) -> Session {
    Session::new(
        access_token,
        refresh_token,
        UserProfile::new("u1").with_role("USER"),
    )
}

/// Events emitted so far.
pub fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
