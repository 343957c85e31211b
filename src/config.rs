//! Endpoint configuration
//!
//! Defaults point at the production services. Every field can be overridden
//! from the environment or from a JSON document.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// GitHub REST API, serving the attestations and releases endpoints
pub const GITHUB_API: &str = "https://api.github.com";

/// Host serving release assets
pub const GITHUB_DOWNLOADS: &str = "https://github.com";

/// AMD Key Distribution Service, via Tinfoil's caching proxy
pub const KDS_PROXY: &str = "https://kds-proxy.tinfoil.sh";

/// Path every enclave serves its runtime attestation on
pub const ATTESTATION_PATH: &str = "/.well-known/tinfoil-attestation";

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL for `/repos/{repo}/attestations/sha256:{digest}`
    pub attestation_api_base: String,

    /// Base URL for `/repos/{repo}/releases/latest`
    pub github_api_base: String,

    /// Base URL for `/{repo}/releases/download/{tag}/tinfoil.hash`
    pub github_download_base: String,

    /// Base URL for VCEK and ASK/ARK lookups
    pub kds_base: String,

    /// Well-known path of the runtime attestation document
    pub attestation_path: String,

    pub fetch_timeout_secs: u64,

    /// Open a TLS connection after `verify_complete` and check that the
    /// served key is the attested one
    pub check_tls_binding: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            attestation_api_base: GITHUB_API.to_string(),
            github_api_base: GITHUB_API.to_string(),
            github_download_base: GITHUB_DOWNLOADS.to_string(),
            kds_base: KDS_PROXY.to_string(),
            attestation_path: ATTESTATION_PATH.to_string(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            check_tls_binding: true,
        }
    }
}

impl Config {
    /// Defaults overlaid with `TINFOIL_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Parse a JSON object; missing fields keep their defaults.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidInput(format!("Invalid configuration: {}", e)))?;
        // serde also accepts a field sequence for structs; only objects are configuration
        if !value.is_object() {
            return Err(Error::InvalidInput("Invalid configuration: expected a JSON object".into()));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidInput(format!("Invalid configuration: {}", e)))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("TINFOIL_ATTESTATION_API") {
            self.attestation_api_base = v;
        }
        if let Some(v) = lookup("TINFOIL_GITHUB_API") {
            self.github_api_base = v;
        }
        if let Some(v) = lookup("TINFOIL_GITHUB_DOWNLOADS") {
            self.github_download_base = v;
        }
        if let Some(v) = lookup("TINFOIL_KDS_URL") {
            self.kds_base = v;
        }
        if let Some(v) = lookup("TINFOIL_ATTESTATION_PATH") {
            self.attestation_path = v;
        }
        match lookup("TINFOIL_FETCH_TIMEOUT_SECS").map(|v| v.parse::<u64>()) {
            Some(Ok(secs)) => self.fetch_timeout_secs = secs,
            Some(Err(e)) => tracing::warn!("Ignoring TINFOIL_FETCH_TIMEOUT_SECS: {}", e),
            None => {}
        }
        if let Some(v) = lookup("TINFOIL_CHECK_TLS_BINDING") {
            self.check_tls_binding = !matches!(v.as_str(), "0" | "false" | "no");
        }
        self
    }
}
