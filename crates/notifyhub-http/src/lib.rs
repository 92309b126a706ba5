//! Shared HTTP client pool for providers.
//!
//! Each provider family is keyed by its service ID and shares one
//! `reqwest::Client` (connection reuse, one configured timeout), rather than
//! constructing a private client per destination. Mirrors
//! `RegistryClient`'s one-client-per-instance shape, generalized from a
//! single client to a keyed pool since this engine has many concurrent
//! provider families instead of one registry endpoint.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{Context, Result};

/// User-agent string sent on every outbound request.
pub const USER_AGENT: &str = concat!("notifyhub/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout when a provider does not override it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A keyed pool of shared `reqwest::Client`s, one per service ID.
///
/// Thread-safe: `get_or_create` takes a read lock for the common case
/// (client already built) and only takes a write lock to insert a new
/// client, never holding either lock across I/O.
pub struct ClientPool {
    clients: RwLock<HashMap<String, reqwest::Client>>,
    default_timeout: Duration,
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ClientPool {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Get the shared client for `service_id`, building and caching it with
    /// `timeout` (falling back to the pool default) on first use.
    pub fn get_or_create(&self, service_id: &str, timeout: Option<Duration>) -> Result<reqwest::Client> {
        if let Some(client) = self.clients.read().unwrap().get(service_id) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(self.default_timeout))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;

        self.clients
            .write()
            .unwrap()
            .insert(service_id.to_string(), client.clone());
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
