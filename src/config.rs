//! Gateway configuration and the environment surface it is read from

use std::fmt;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;
use url::Url;

use crate::event::IdPolicy;

/// Errors that prevent the gateway from starting
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("username and password both needed")]
    IncompleteCredentials,

    #[error("invalid endpoint {endpoint:?}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("can not load TLS material from {}: {source}", .path.display())]
    TlsMaterial {
        path: PathBuf,
        #[source]
        source: rustls::pki_types::pem::Error,
    },

    #[error("no certificate found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
}

/// Username/password pair clients must present with `AUTH`
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Exact comparison of both fields
    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password == password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable policy shared by every session.
///
/// Built once at startup and handed to the server behind an `Arc`.
#[derive(Clone)]
pub struct GatewayConfig {
    credentials: Option<Credentials>,
    endpoint: Url,
    token: Option<String>,
    insecure_tls: bool,
    id_policy: IdPolicy,
}

impl GatewayConfig {
    /// Validate the raw values and freeze them.
    ///
    /// Username and password must be both empty or both set, and the
    /// endpoint must be an absolute URI. An empty token means no token.
    pub fn build(
        username: &str,
        password: &str,
        endpoint: &str,
        token: &str,
        insecure_tls: bool,
        hash_ids: bool,
    ) -> Result<Self, ConfigError> {
        tracing::info!("parsing endpoint {endpoint}");
        let endpoint_url = Url::parse(endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let credentials = match (username.is_empty(), password.is_empty()) {
            (true, true) => None,
            (false, false) => Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => return Err(ConfigError::IncompleteCredentials),
        };
        tracing::info!(
            "authentication {}",
            if credentials.is_some() {
                "required"
            } else {
                "disabled"
            }
        );

        Ok(Self {
            credentials,
            endpoint: endpoint_url,
            token: (!token.is_empty()).then(|| token.to_string()),
            insecure_tls,
            id_policy: if hash_ids {
                IdPolicy::ContentHash
            } else {
                IdPolicy::Random
            },
        })
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Whether clients have to authenticate before submitting
    pub fn requires_auth(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn insecure_tls(&self) -> bool {
        self.insecure_tls
    }

    pub fn id_policy(&self) -> IdPolicy {
        self.id_policy
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("credentials", &self.credentials)
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("insecure_tls", &self.insecure_tls)
            .field("id_policy", &self.id_policy)
            .finish()
    }
}

/// Process settings, read from the environment or the command line
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Settings {
    /// Username clients must authenticate with
    #[arg(long, env = "DIREKTIV_SMTP_USERNAME", default_value = "")]
    pub username: String,

    /// Password clients must authenticate with
    #[arg(long, env = "DIREKTIV_SMTP_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Endpoint events are posted to
    #[arg(long, env = "DIREKTIV_SMTP_ENDPOINT", default_value = "")]
    pub endpoint: String,

    /// Sink injected by Knative; takes precedence over the endpoint
    #[arg(long, env = "K_SINK", hide = true)]
    pub sink: Option<String>,

    /// Value of the Direktiv-Token header sent with every event
    #[arg(long, env = "DIREKTIV_SMTP_TOKEN", default_value = "", hide_env_values = true)]
    pub token: String,

    /// Skip certificate validation towards the endpoint
    #[arg(long, env = "DIREKTIV_SMTP_INSECURE_TLS", default_value = "")]
    pub insecure_tls: String,

    /// Derive event ids from the message content
    #[arg(long, env = "DIREKTIV_SMTP_HASH", default_value = "")]
    pub hash: String,

    /// Address to listen on
    #[arg(long, env = "DIREKTIV_SMTP_ADDRESS", default_value = "0.0.0.0:2525")]
    pub address: String,

    /// Any non-empty value enables debug logging
    #[arg(long, env = "DIREKTIV_SMTP_DEBUG", default_value = "")]
    pub debug: String,

    /// Directory holding tls.crt and tls.key
    #[arg(long, env = "DIREKTIV_SMTP_CERT_DIR", default_value = "/smtp-certs")]
    pub cert_dir: PathBuf,

    /// Hostname announced in the greeting
    #[arg(long, env = "DIREKTIV_SMTP_HOSTNAME", default_value = "localhost")]
    pub hostname: String,
}

impl Settings {
    pub fn debug_enabled(&self) -> bool {
        !self.debug.is_empty()
    }

    /// The endpoint in effect, `K_SINK` winning when set
    pub fn effective_endpoint(&self) -> &str {
        match self.sink.as_deref() {
            Some(sink) if !sink.is_empty() => sink,
            _ => &self.endpoint,
        }
    }

    pub fn gateway_config(&self) -> Result<GatewayConfig, ConfigError> {
        GatewayConfig::build(
            &self.username,
            &self.password,
            self.effective_endpoint(),
            &self.token,
            parse_flag("insecure tls", &self.insecure_tls),
            parse_flag("hash", &self.hash),
        )
    }
}

/// Lenient boolean parsing; anything unrecognised is `false`
pub fn parse_flag(name: &str, value: &str) -> bool {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => true,
        "0" | "f" | "F" | "FALSE" | "false" | "False" | "" => false,
        other => {
            tracing::warn!("can not parse value {other:?} for {name}, setting to false");
            false
        }
    }
}
