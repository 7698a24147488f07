//! Configuration file loading and validation.
//!
//! The file is TOML:
//!
//! ```toml
//! [schedule]
//! every = "1h"
//!
//! [tracker]
//! base_url = "https://jira.example.com"
//! token = "dXNlcjpwYXNz"          # sent as "Basic <token>"
//! jql = "project = ABC"
//!
//! [document_store]
//! base_url = "http://elasticsearch:9200"
//!
//! [linked_resource]               # optional; defaults to the tracker
//! base_url = "https://jira.example.com"
//!
//! [reconcile]
//! flush_every = 2
//! lead_time_projection = "both"   # url | commits | both
//!
//! [http]
//! timeout = "30s"
//! ```
//!
//! Everything is validated up front by [`AppConfig::into_settings`]; an
//! invalid configuration never starts a cycle.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use pipeline::{LeadTimeProjection, ReconcileSettings, DEFAULT_FLUSH_EVERY};
use transport::{Authorization, EndpointError, Endpoints, ServiceEndpoint};
use trigger::{Schedule, ScheduleError};

const DEFAULT_TRACKER_URL: &str = "http://localhost:80";
const DEFAULT_DOCUMENT_STORE_URL: &str = "http://elasticsearch:9200";
const DEFAULT_TIMEOUT: &str = "30s";

/// A configuration that cannot be used. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("a tracker token is required (tracker.token, --token or ISSUE_SYNC_TOKEN)")]
    MissingToken,

    #[error("invalid {service} endpoint: {source}")]
    Endpoint {
        service: &'static str,
        #[source]
        source: EndpointError,
    },

    #[error("invalid http.timeout '{value}': {message}")]
    Timeout { value: String, message: String },
}

/// The configuration file as written.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Exactly one of `cron`, `every`, `in`, `at`.
    pub schedule: BTreeMap<String, String>,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub document_store: DocumentStoreConfig,
    /// Falls back to the tracker's URL and token when absent.
    #[serde(default)]
    pub linked_resource: Option<LinkedResourceConfig>,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub jql: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: default_tracker_url(),
            token: None,
            jql: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentStoreConfig {
    #[serde(default = "default_document_store_url")]
    pub base_url: String,
    /// Sent as `Basic <token>` when present.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_document_store_url(),
            token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkedResourceConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    #[serde(default = "default_flush_every")]
    pub flush_every: NonZeroUsize,
    #[serde(default)]
    pub lead_time_projection: LeadTimeProjection,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            flush_every: default_flush_every(),
            lead_time_projection: LeadTimeProjection::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

fn default_tracker_url() -> String {
    DEFAULT_TRACKER_URL.to_owned()
}

fn default_document_store_url() -> String {
    DEFAULT_DOCUMENT_STORE_URL.to_owned()
}

fn default_flush_every() -> NonZeroUsize {
    DEFAULT_FLUSH_EVERY
}

fn default_timeout() -> String {
    DEFAULT_TIMEOUT.to_owned()
}

/// A validated configuration, ready to wire.
#[derive(Debug)]
pub struct Settings {
    pub schedule: Schedule,
    pub endpoints: Endpoints,
    pub timeout: Duration,
    pub reconcile: ReconcileSettings,
}

impl AppConfig {
    /// Reads and parses the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parses TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Validates the configuration. `token` overrides `tracker.token`.
    pub fn into_settings(self, token: Option<String>) -> Result<Settings, ConfigError> {
        let schedule = Schedule::from_map(&self.schedule)?;

        let token = token
            .or(self.tracker.token)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;
        let tracker = endpoint("tracker", &self.tracker.base_url)?
            .with_authorization(Authorization::Basic(token));
        let document_store = service_endpoint(
            "document_store",
            &self.document_store.base_url,
            self.document_store.token,
        )?;
        let linked_resource = match self.linked_resource {
            Some(config) => service_endpoint("linked_resource", &config.base_url, config.token)?,
            None => tracker.clone(),
        };

        let timeout =
            humantime::parse_duration(&self.http.timeout).map_err(|e| ConfigError::Timeout {
                value: self.http.timeout.clone(),
                message: e.to_string(),
            })?;

        Ok(Settings {
            schedule,
            endpoints: Endpoints {
                tracker,
                document_store,
                linked_resource,
            },
            timeout,
            reconcile: ReconcileSettings {
                jql: self.tracker.jql.filter(|q| !q.trim().is_empty()),
                flush_every: self.reconcile.flush_every,
                lead_time_projection: self.reconcile.lead_time_projection,
            },
        })
    }
}

fn endpoint(service: &'static str, base_url: &str) -> Result<ServiceEndpoint, ConfigError> {
    ServiceEndpoint::parse(base_url).map_err(|source| ConfigError::Endpoint { service, source })
}

fn service_endpoint(
    service: &'static str,
    base_url: &str,
    token: Option<String>,
) -> Result<ServiceEndpoint, ConfigError> {
    let endpoint = endpoint(service, base_url)?;
    Ok(match token.filter(|t| !t.trim().is_empty()) {
        Some(token) => endpoint.with_authorization(Authorization::Basic(token)),
        None => endpoint,
    })
}
