//! Authenticated session against a versioned REST API.

use crate::auth::{Auth, AuthError};
use crate::transport::{Method, Request, RequestOptions, Response, Transport, TransportError};
use std::sync::Arc;

/// Header carrying the access token
pub const AUTHORIZATION: &str = "Authorization";

/// Errors from an authenticated call. HTTP error statuses are not errors;
/// they come back as a [`Response`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// How request paths are mapped onto the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Prefix every path with the REST base
    pub auto_base: bool,
    /// API version used in `/rest/v{version}`
    pub version: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_base: true,
            version: 1,
        }
    }
}

/// Session handler for an API.
///
/// Owns the credentials and refreshes the access token whenever it has run
/// out before a request goes out. The transport is shared and may serve
/// other sessions.
pub struct Session {
    base_url: String,
    rest_base: String,
    auto_base: bool,
    auth: Auth,
    transport: Arc<dyn Transport>,
}

impl Session {
    /// Create a session with the default options (`auto_base`, version 1)
    pub fn new(base_url: &str, auth: Auth, transport: Arc<dyn Transport>) -> Self {
        Self::with_options(base_url, auth, transport, SessionOptions::default())
    }

    pub fn with_options(
        base_url: &str,
        auth: Auth,
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let rest_base = format!("{}/rest/v{}", base_url, options.version);
        Self {
            base_url,
            rest_base,
            auto_base: options.auto_base,
            auth,
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rest_base(&self) -> &str {
        &self.rest_base
    }

    pub fn auto_base(&self) -> bool {
        self.auto_base
    }

    /// The held credentials, refreshed first if the token has run out
    pub fn auth(&mut self) -> Result<&Auth, AuthError> {
        if self.auth.expired() {
            tracing::debug!(base_url = %self.base_url, "access token expired, refreshing");
            self.auth.refresh_auth_token(self.transport.as_ref())?;
        }
        Ok(&self.auth)
    }

    /// Force a token refresh regardless of expiry
    pub fn refresh_auth_token(&mut self) -> Result<&Auth, AuthError> {
        self.auth.refresh_auth_token(self.transport.as_ref())?;
        Ok(&self.auth)
    }

    /// `Authorization` header value, e.g. `Bearer abc123`
    pub fn auth_header(&mut self) -> Result<String, AuthError> {
        let auth = self.auth()?;
        auth.header_value()
            .ok_or(AuthError::MissingField("access_token"))
    }

    /// Resolve a request path against the REST base when `auto_base` is set
    pub fn request_url(&self, url: &str) -> String {
        if !self.auto_base {
            return url.to_string();
        }
        if url.starts_with('/') {
            format!("{}{}", self.rest_base, url)
        } else {
            format!("{}/{}", self.rest_base, url)
        }
    }

    /// Compose and send one authenticated request, returning the raw response
    pub fn request(
        &mut self,
        method: Method,
        url: &str,
        mut options: RequestOptions,
    ) -> Result<Response, Error> {
        let url = self.request_url(url);
        options.set_header(AUTHORIZATION, self.auth_header()?);

        tracing::debug!(method = %method, url = %url, "sending request");
        let resp = self.transport.send(Request::new(method, &url, options))?;
        tracing::debug!(method = %method, url = %url, status = resp.status(), "received response");
        Ok(resp)
    }

    pub fn get(&mut self, url: &str, options: RequestOptions) -> Result<Response, Error> {
        self.request(Method::Get, url, options)
    }

    pub fn post(&mut self, url: &str, options: RequestOptions) -> Result<Response, Error> {
        self.request(Method::Post, url, options)
    }

    pub fn put(&mut self, url: &str, options: RequestOptions) -> Result<Response, Error> {
        self.request(Method::Put, url, options)
    }

    pub fn delete(&mut self, url: &str, options: RequestOptions) -> Result<Response, Error> {
        self.request(Method::Delete, url, options)
    }
}
