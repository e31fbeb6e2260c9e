//! OAuth2 credentials and access-token lifecycle.
//!
//! An [`Auth`] pairs a [`Grant`] (how to obtain a token) with the current
//! [`Token`]. Refreshing posts the grant to the provider's token endpoint and
//! replaces the token wholesale.

use crate::transport::{Body, Method, Request, RequestOptions, Transport, TransportError};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;

/// OAuth2 flow used to obtain tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    ClientCredentials,
    AuthorizationCode,
    RefreshToken,
}

impl GrantKind {
    /// OAuth2 `grant_type` parameter value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientCredentials => "client_credentials",
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// Token endpoint path below an identity URL
pub const IDENTITY_TOKEN_PATH: &str = "oauth/token";

/// An issued access token
#[derive(Clone, PartialEq)]
pub struct Token {
    pub access_token: String,
    /// Prefix used in the Authorization header, usually "Bearer"
    pub token_type: String,
    /// Lifetime in seconds, counted from `created_at`
    pub expires_in: i64,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Token {
    pub fn new(access_token: &str, token_type: &str, expires_in: i64) -> Self {
        Self {
            access_token: access_token.to_string(),
            token_type: token_type.to_string(),
            expires_in,
            scope: None,
            created_at: Utc::now(),
        }
    }

    /// `created_at + expires_in`, or `None` when that falls outside the
    /// representable range
    pub fn checked_expires_at(&self) -> Option<DateTime<Utc>> {
        Duration::try_seconds(self.expires_in)
            .and_then(|lifetime| self.created_at.checked_add_signed(lifetime))
    }

    /// Expiry time, clamped to the representable range
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.checked_expires_at().unwrap_or(if self.expires_in < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// How a token is obtained from the provider
#[derive(Clone, PartialEq)]
pub enum Grant {
    /// Server-to-server credentials exchanged at `{identity_url}/oauth/token`
    ClientCredentials {
        identity_url: String,
        client_id: String,
        client_secret: String,
    },
    /// One-time authorization code from the user consent redirect
    AuthorizationCode {
        token_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        code: String,
    },
    RefreshToken {
        token_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        refresh_token: String,
    },
}

impl Grant {
    pub fn kind(&self) -> GrantKind {
        match self {
            Self::ClientCredentials { .. } => GrantKind::ClientCredentials,
            Self::AuthorizationCode { .. } => GrantKind::AuthorizationCode,
            Self::RefreshToken { .. } => GrantKind::RefreshToken,
        }
    }

    /// OAuth2 `grant_type` parameter for this grant
    pub fn grant_type(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn client_id(&self) -> &str {
        match self {
            Self::ClientCredentials { client_id, .. }
            | Self::AuthorizationCode { client_id, .. }
            | Self::RefreshToken { client_id, .. } => client_id,
        }
    }

    pub fn token_endpoint(&self) -> String {
        match self {
            Self::ClientCredentials { identity_url, .. } => format!(
                "{}/{}",
                identity_url.trim_end_matches('/'),
                IDENTITY_TOKEN_PATH
            ),
            Self::AuthorizationCode { token_url, .. } | Self::RefreshToken { token_url, .. } => {
                token_url.clone()
            }
        }
    }

    /// Form fields posted to the token endpoint
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![("grant_type".to_string(), self.grant_type().to_string())];
        let mut push = |k: &str, v: &str| fields.push((k.to_string(), v.to_string()));
        match self {
            Self::ClientCredentials {
                client_id,
                client_secret,
                ..
            } => {
                push("client_id", client_id);
                push("client_secret", client_secret);
            }
            Self::AuthorizationCode {
                client_id,
                client_secret,
                redirect_uri,
                code,
                ..
            } => {
                push("client_id", client_id);
                push("client_secret", client_secret);
                push("redirect_uri", redirect_uri);
                push("code", code);
            }
            Self::RefreshToken {
                client_id,
                client_secret,
                redirect_uri,
                refresh_token,
                ..
            } => {
                push("client_id", client_id);
                push("client_secret", client_secret);
                push("redirect_uri", redirect_uri);
                push("refresh_token", refresh_token);
            }
        }
        fields
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field("grant_type", &self.grant_type())
            .field("client_id", &self.client_id())
            .field("token_endpoint", &self.token_endpoint())
            .finish_non_exhaustive()
    }
}

/// Errors raised while obtaining a token
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("token endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid token response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("token response missing field '{0}'")]
    MissingField(&'static str),
    #[error("token response has invalid field '{0}'")]
    InvalidField(&'static str),
}

/// Token endpoint response body
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// One OAuth2 credential set and its current token
#[derive(Debug, Clone)]
pub struct Auth {
    grant: Grant,
    token: Option<Token>,
}

impl Auth {
    /// Credentials with no token yet; the first access triggers a refresh
    pub fn new(grant: Grant) -> Self {
        Self { grant, token: None }
    }

    /// Credentials with an already issued token
    pub fn with_token(grant: Grant, token: Token) -> Self {
        Self {
            grant,
            token: Some(token),
        }
    }

    pub fn client_credentials(identity_url: &str, client_id: &str, client_secret: &str) -> Self {
        Self::new(Grant::ClientCredentials {
            identity_url: identity_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// User credentials holding a refresh token, as stored after a consent flow
    pub fn user(
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        refresh_token: &str,
        token_url: &str,
    ) -> Self {
        Self::new(Grant::RefreshToken {
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            refresh_token: refresh_token.to_string(),
        })
    }

    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.access_token.as_str())
    }

    pub fn header_type(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.token_type.as_str())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.token.as_ref().map(|t| t.created_at)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.token.as_ref().map(Token::expires_at)
    }

    /// True when there is no token or the current one has run out
    pub fn expired(&self) -> bool {
        self.token.as_ref().map_or(true, Token::is_expired)
    }

    /// `Authorization` header value for the current token
    pub fn header_value(&self) -> Option<String> {
        self.token
            .as_ref()
            .map(|t| format!("{} {}", t.token_type, t.access_token))
    }

    /// Request a new token from the provider and replace the current one.
    ///
    /// The previous token is discarded only on success. Failures are not
    /// retried.
    pub fn refresh_auth_token(&mut self, transport: &dyn Transport) -> Result<(), AuthError> {
        let url = self.grant.token_endpoint();
        let options = RequestOptions {
            body: Some(Body::Form(self.grant.form_fields())),
            ..RequestOptions::default()
        }
        .header("Accept", "application/json");

        let resp = transport
            .send(Request::new(Method::Post, &url, options))
            .inspect_err(|e| tracing::warn!(url = %url, error = %e, "token refresh failed"))?;

        if !resp.is_success() {
            tracing::warn!(url = %url, status = resp.status(), "token endpoint rejected refresh");
            return Err(AuthError::Status {
                status: resp.status(),
                body: resp.into_string(),
            });
        }

        let body: TokenResponse = resp.json()?;
        let access_token = body
            .access_token
            .ok_or(AuthError::MissingField("access_token"))?;
        let token_type = body
            .token_type
            .ok_or(AuthError::MissingField("token_type"))?;
        let expires_in = body
            .expires_in
            .ok_or(AuthError::MissingField("expires_in"))?;
        if expires_in <= 0 {
            return Err(AuthError::InvalidField("expires_in"));
        }

        // Keep issue times strictly ordered even within one clock tick
        let mut created_at = Utc::now();
        if let Some(prev) = &self.token {
            if created_at <= prev.created_at {
                created_at = prev.created_at + Duration::microseconds(1);
            }
        }

        let token = Token {
            access_token,
            token_type,
            expires_in,
            scope: body.scope,
            created_at,
        };
        if token.checked_expires_at().is_none() {
            return Err(AuthError::InvalidField("expires_in"));
        }

        self.advance_grant(body.refresh_token);
        self.token = Some(token);

        tracing::info!(
            grant_type = self.grant.grant_type(),
            client_id = self.grant.client_id(),
            expires_in,
            "access token refreshed"
        );
        Ok(())
    }

    /// Move the grant forward after a successful exchange: a used
    /// authorization code becomes a refresh-token grant, and a rotated
    /// refresh token replaces the old one.
    fn advance_grant(&mut self, issued_refresh_token: Option<String>) {
        let Some(new_refresh) = issued_refresh_token else {
            return;
        };
        match &mut self.grant {
            Grant::AuthorizationCode {
                token_url,
                client_id,
                client_secret,
                redirect_uri,
                ..
            } => {
                self.grant = Grant::RefreshToken {
                    token_url: std::mem::take(token_url),
                    client_id: std::mem::take(client_id),
                    client_secret: std::mem::take(client_secret),
                    redirect_uri: std::mem::take(redirect_uri),
                    refresh_token: new_refresh,
                };
            }
            Grant::RefreshToken { refresh_token, .. } => *refresh_token = new_refresh,
            Grant::ClientCredentials { .. } => {}
        }
    }
}
