use crate::auth::{Auth, Grant, GrantKind};
use crate::session::{Session, SessionOptions};
use crate::transport::UreqTransport;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Credentials section (`[auth]`)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub grant: GrantKind,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Environment variable holding the client secret
    #[serde(default)]
    pub client_secret_env: Option<String>,
    /// For client_credentials: base of the identity service
    #[serde(default)]
    pub identity_url: Option<String>,
    /// For authorization_code/refresh_token: full token endpoint URL
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_token_env: Option<String>,
}

/// Resolve a value given directly or through an environment variable.
/// A direct value takes priority.
fn resolve_secret(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(value) = direct {
        return Some(value.clone());
    }
    env_var.as_ref().and_then(|var| std::env::var(var).ok())
}

impl AuthConfig {
    pub fn resolve_client_secret(&self) -> Result<String> {
        resolve_secret(&self.client_secret, &self.client_secret_env).ok_or_else(|| {
            anyhow!(
                "No client secret for '{}': set client_secret or client_secret_env",
                self.client_id
            )
        })
    }

    pub fn resolve_refresh_token(&self) -> Result<String> {
        resolve_secret(&self.refresh_token, &self.refresh_token_env).ok_or_else(|| {
            anyhow!("No refresh token: set refresh_token or refresh_token_env")
        })
    }

    fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
        value
            .as_deref()
            .ok_or_else(|| anyhow!("auth.{} is required for this grant", field))
    }

    /// Build the grant described by this section, resolving secrets
    pub fn to_grant(&self) -> Result<Grant> {
        let client_id = self.client_id.clone();
        let client_secret = self.resolve_client_secret()?;
        let grant = match self.grant {
            GrantKind::ClientCredentials => Grant::ClientCredentials {
                identity_url: Self::required(&self.identity_url, "identity_url")?.to_string(),
                client_id,
                client_secret,
            },
            GrantKind::AuthorizationCode => Grant::AuthorizationCode {
                token_url: Self::required(&self.token_url, "token_url")?.to_string(),
                client_id,
                client_secret,
                redirect_uri: Self::required(&self.redirect_uri, "redirect_uri")?.to_string(),
                code: Self::required(&self.code, "code")?.to_string(),
            },
            GrantKind::RefreshToken => Grant::RefreshToken {
                token_url: Self::required(&self.token_url, "token_url")?.to_string(),
                client_id,
                client_secret,
                redirect_uri: Self::required(&self.redirect_uri, "redirect_uri")?.to_string(),
                refresh_token: self.resolve_refresh_token()?,
            },
        };
        Ok(grant)
    }

    fn validate_into(&self, errors: &mut Vec<ValidationError>) {
        let mut require = |value: &Option<String>, field: &str| {
            if value.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError {
                    field: format!("auth.{}", field),
                    message: format!("Required for {} grant", self.grant.as_str()),
                });
            }
        };

        match self.grant {
            GrantKind::ClientCredentials => require(&self.identity_url, "identity_url"),
            GrantKind::AuthorizationCode => {
                require(&self.token_url, "token_url");
                require(&self.redirect_uri, "redirect_uri");
                require(&self.code, "code");
            }
            GrantKind::RefreshToken => {
                require(&self.token_url, "token_url");
                require(&self.redirect_uri, "redirect_uri");
                if self.refresh_token.is_none() && self.refresh_token_env.is_none() {
                    errors.push(ValidationError {
                        field: "auth.refresh_token".to_string(),
                        message: "Set refresh_token or refresh_token_env".to_string(),
                    });
                }
            }
        }

        if self.client_id.is_empty() {
            errors.push(ValidationError {
                field: "auth.client_id".to_string(),
                message: "Must not be empty".to_string(),
            });
        }
        match &self.client_secret {
            Some(secret) if secret.is_empty() => errors.push(ValidationError {
                field: "auth.client_secret".to_string(),
                message: "Must not be empty".to_string(),
            }),
            None if self.client_secret_env.is_none() => errors.push(ValidationError {
                field: "auth.client_secret".to_string(),
                message: "Set client_secret or client_secret_env".to_string(),
            }),
            _ => {}
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_version: Option<u32>,
    #[serde(default)]
    pub auto_base: Option<bool>,
    /// Default request timeout; unset means the transport default
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.spot/config.local.toml) > project (.spot/config.toml) > user (~/.spot/config.toml)
    /// A `.env` file in the working directory is loaded first so `*_env` keys can see it
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let user_dir = dirs::home_dir().map(|home| home.join(".spot"));
        Self::load_layered(user_dir.as_deref(), Path::new(".spot"))
    }

    /// Merge `config.toml` from the user directory, then `config.toml` and
    /// `config.local.toml` from the project directory
    pub fn load_layered(user_dir: Option<&Path>, project_dir: &Path) -> Result<Self> {
        let mut config = Self::default();

        let mut layers: Vec<PathBuf> = Vec::new();
        if let Some(dir) = user_dir {
            layers.push(dir.join("config.toml"));
        }
        layers.push(project_dir.join("config.toml"));
        layers.push(project_dir.join("config.local.toml"));

        for path in layers {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading config layer");
                config.merge(Self::load_from(&path)?);
            }
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority)
    /// Scalars are overridden if set; the auth section is replaced whole
    pub fn merge(&mut self, other: Config) {
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.api_version.is_some() {
            self.api_version = other.api_version;
        }
        if other.auto_base.is_some() {
            self.auto_base = other.auto_base;
        }
        if other.timeout_ms.is_some() {
            self.timeout_ms = other.timeout_ms;
        }
        if other.auth.is_some() {
            self.auth = other.auth;
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        let defaults = SessionOptions::default();
        SessionOptions {
            auto_base: self.auto_base.unwrap_or(defaults.auto_base),
            version: self.api_version.unwrap_or(defaults.version),
        }
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        match &self.base_url {
            None => errors.push(ValidationError {
                field: "base_url".to_string(),
                message: "Required".to_string(),
            }),
            Some(url) if url.is_empty() => errors.push(ValidationError {
                field: "base_url".to_string(),
                message: "Must not be empty".to_string(),
            }),
            Some(_) => {}
        }

        if self.api_version == Some(0) {
            errors.push(ValidationError {
                field: "api_version".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.timeout_ms == Some(0) {
            errors.push(ValidationError {
                field: "timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        match &self.auth {
            Some(auth) => auth.validate_into(&mut errors),
            None => errors.push(ValidationError {
                field: "auth".to_string(),
                message: "Required".to_string(),
            }),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Build a session over a fresh `ureq` transport.
    /// No token is requested until the first call.
    pub fn build_session(&self) -> Result<Session> {
        if let Err(errors) = self.validate() {
            let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            return Err(anyhow!("Invalid configuration: {}", joined.join("; ")));
        }

        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow!("base_url is required"))?;
        let auth_config = self
            .auth
            .as_ref()
            .ok_or_else(|| anyhow!("auth section is required"))?;
        let auth = Auth::new(auth_config.to_grant()?);

        let transport = match self.timeout_ms {
            Some(ms) => UreqTransport::with_timeout(ms),
            None => UreqTransport::new(),
        };

        Ok(Session::with_options(
            base_url,
            auth,
            Arc::new(transport),
            self.session_options(),
        ))
    }
}
