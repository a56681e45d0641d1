//! Session client for the member portal.
//!
//! Keeps the access and refresh tokens of the logged-in member, attaches
//! them to backend requests, and renews them transparently when the backend
//! answers 401. When renewal is impossible the session is torn down and the
//! UI is told to show the login page again.
//!
//! Start with [`portal::Portal`], which wires everything from a
//! [`config::Config`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

#[macro_use]
extern crate log;

pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod http;
pub mod jwt;
pub mod portal;
pub mod protocol;
pub mod refresh;
pub mod request;
pub mod session;
pub mod storage;
