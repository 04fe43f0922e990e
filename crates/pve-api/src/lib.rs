//! Typed Rust client for the Proxmox VE HTTP API.
//!
//! Covers the transport surface the task orchestrator consumes:
//! authenticated form/JSON requests, the `Transport` seam used to swap the
//! HTTP session for a scripted one, and typed structures for the response
//! shapes the orchestrator reads (task submission, task status, disk
//! creation, id allocation, inventory listings).
//!
//! Acquiring an authentication ticket is out of scope; a `Session` only
//! attaches credentials it was handed.

mod params;
mod transport;
mod types;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, COOKIE};
use serde::de::DeserializeOwned;
use tracing::debug;

pub use params::{Params, form_pairs, path_segment};
pub use reqwest::{Method, StatusCode};
pub use transport::Transport;
pub use types::*;

/// Request timeout applied to every HTTP call made by a `Session`.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pve api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("pve api {path} returned {status}: {body}")]
    Api {
        path: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("pve api response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    /// True when the response body ended before a complete document was read.
    ///
    /// This is the only read failure the task poller tolerates.
    pub fn is_truncated(&self) -> bool {
        match self {
            Self::Decode(e) => e.is_eof(),
            Self::Request(e) => e.is_body(),
            Self::Api { .. } => false,
        }
    }

    /// HTTP status reported by the server, if the request got that far.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Request(e) => e.status(),
            Self::Decode(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Decode a raw response body into one of the typed response shapes.
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(Error::from)
}

/// Decode an already-parsed JSON document into a typed response shape.
pub fn decode_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(Error::from)
}

/// Credentials attached to every request. The session never acquires them.
#[derive(Clone, Default)]
pub enum Auth {
    #[default]
    None,
    /// Ticket and CSRF token issued by `/access/ticket`.
    Ticket { ticket: String, csrf_token: String },
    /// `USER@REALM!TOKENID=SECRET`
    ApiToken(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Ticket { .. } => f.write_str("Ticket(..)"),
            Self::ApiToken(_) => f.write_str("ApiToken(..)"),
        }
    }
}

/// Per-session logging switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpLogging {
    /// Emit request forms and response bodies at debug level.
    pub log_bodies: bool,
}

/// Options for building a `Session`.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub base_url: String,
    pub tls_insecure: bool,
    pub auth: Auth,
    pub logging: HttpLogging,
}

/// HTTP session against a single Proxmox VE API endpoint.
#[derive(Clone)]
pub struct Session {
    base_url: String,
    auth: Auth,
    logging: HttpLogging,
    http: reqwest::Client,
}

impl Session {
    pub fn new(opts: SessionOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(opts.tls_insecure)
            .build()?;

        Ok(Self {
            base_url: opts.base_url.trim_end_matches('/').to_string(),
            auth: opts.auth,
            logging: opts.logging,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Auth::None => builder,
            Auth::Ticket { ticket, csrf_token } => builder
                .header(COOKIE, format!("PVEAuthCookie={ticket}"))
                .header("CSRFPreventionToken", csrf_token),
            Auth::ApiToken(token) => builder.header(AUTHORIZATION, format!("PVEAPIToken={token}")),
        }
    }

    async fn check(resp: reqwest::Response, path: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                path: path.to_string(),
                status,
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl Transport for Session {
    async fn request(&self, method: Method, path: &str, form: Option<&Params>) -> Result<String> {
        let mut builder = self
            .authorize(self.http.request(method.clone(), self.url(path)))
            .header(ACCEPT, "application/json");

        if let Some(params) = form {
            let pairs = form_pairs(params);
            if self.logging.log_bodies {
                debug!(%method, path, form = ?pairs, "pve request");
            }
            builder = builder.form(&pairs);
        } else if self.logging.log_bodies {
            debug!(%method, path, "pve request");
        }

        let resp = builder.send().await?;
        let body = Self::check(resp, path).await?.text().await?;

        if self.logging.log_bodies {
            debug!(%method, path, body = %body, "pve response");
        }
        Ok(body)
    }
}
