use std::env;
use std::fmt;

use pve_api::{Auth, HttpLogging, SessionOptions};

use crate::{Error, Result};

/// Client configuration. Built once and never mutated.
#[derive(Clone)]
pub struct Configuration {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls_insecure: bool,
    /// Run clone submissions without the client-wide clone gate.
    pub parallel_clone: bool,
    /// Run resize submissions without the client-wide resize gate.
    pub parallel_resize: bool,
    /// Credentials attached to every request.
    pub auth: Auth,
    pub logging: HttpLogging,
}

impl Configuration {
    /// Configuration with serialized clone/resize and no credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            tls_insecure: false,
            parallel_clone: false,
            parallel_resize: false,
            auth: Auth::None,
            logging: HttpLogging::default(),
        }
    }

    /// Create from env vars:
    ///
    /// - `PVE_URL` (required, e.g. `https://pve1:8006/api2/json`)
    /// - `PVE_USER`, `PVE_PASSWORD`
    /// - `PVE_TLS_INSECURE`, `PVE_PARALLEL_CLONE`, `PVE_PARALLEL_RESIZE` (booleans, default off)
    /// - `PVE_API_TOKEN`, or `PVE_TICKET` together with `PVE_CSRF_TOKEN`
    /// - `PVE_LOG_BODIES` (boolean, default off)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup using the same keys as `from_env`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("PVE_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::MissingEnv("PVE_URL".into()))?;

        let flag = |key: &str| -> Result<bool> {
            match lookup(key) {
                Some(raw) => parse_bool(key, &raw),
                None => Ok(false),
            }
        };

        let auth = match (lookup("PVE_API_TOKEN"), lookup("PVE_TICKET"), lookup("PVE_CSRF_TOKEN")) {
            (Some(token), _, _) => Auth::ApiToken(token),
            (None, Some(ticket), Some(csrf_token)) => Auth::Ticket { ticket, csrf_token },
            (None, Some(_), None) => return Err(Error::MissingEnv("PVE_CSRF_TOKEN".into())),
            _ => Auth::None,
        };

        Ok(Self {
            url,
            username: lookup("PVE_USER"),
            password: lookup("PVE_PASSWORD"),
            tls_insecure: flag("PVE_TLS_INSECURE")?,
            parallel_clone: flag("PVE_PARALLEL_CLONE")?,
            parallel_resize: flag("PVE_PARALLEL_RESIZE")?,
            auth,
            logging: HttpLogging {
                log_bodies: flag("PVE_LOG_BODIES")?,
            },
        })
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            base_url: self.url.clone(),
            tls_insecure: self.tls_insecure,
            auth: self.auth.clone(),
            logging: self.logging,
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("tls_insecure", &self.tls_insecure)
            .field("parallel_clone", &self.parallel_clone)
            .field("parallel_resize", &self.parallel_resize)
            .field("auth", &self.auth)
            .field("logging", &self.logging)
            .finish()
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(Error::InvalidConfig(format!("{key}={other} is not a boolean"))),
    }
}
