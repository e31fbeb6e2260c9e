//! OAuth2-authenticated sessions for REST APIs.
//!
//! A [`Session`] owns one set of credentials ([`Auth`]), refreshes the access
//! token when it runs out, and sends every request with an
//! `Authorization: <type> <token>` header through a [`Transport`].

pub mod auth;
pub mod config;
pub mod session;
pub mod transport;

pub use auth::{Auth, AuthError, Grant, GrantKind, Token};
pub use config::Config;
pub use session::{Error, Session, SessionOptions};
pub use transport::{Body, Method, Request, RequestOptions, Response, Transport, UreqTransport};
