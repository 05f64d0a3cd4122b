// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Configuration for a migration run

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Service-account token mounted into every pod
const DEFAULT_TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Service-account CA bundle mounted into every pod
const DEFAULT_CA_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Migration tunables
///
/// Loaded from environment variables (see `from_env()`), optionally
/// overlaid with a JSON file (see [`ConfigFile`] and `merge_tunables()`),
/// and finally overridden by command-line flags.
#[derive(Clone, Debug)]
pub struct MigrateConfig {
    /// Only claims in namespaces starting with this prefix are migrated
    pub tenant_prefix: String,

    /// Name suffix marking a claim as a backup copy
    pub backup_suffix: String,

    /// Data mover program followed by any leading arguments
    pub data_mover: Vec<String>,

    /// Where the per-claim status report is written at exit
    pub report_path: PathBuf,

    /// Upper bound on per-claim tasks running at once within a stage
    pub max_concurrency: usize,

    /// HTTP client timeout in seconds
    pub http_timeout_secs: u64,

    /// Attempts per workload scale operation
    pub scale_attempts: u32,

    /// Delay between scale attempts in seconds
    pub scale_retry_delay_secs: u64,

    /// Replica count workloads are resumed at before the final rollback
    pub resume_replicas: i32,

    /// Time to let resumed workloads recreate their claims before polling
    pub resume_settle_secs: u64,

    /// Seconds between claim status checks
    pub bind_poll_interval_secs: u64,

    /// Failed claim reads tolerated while waiting for a bind
    pub bind_max_errors: u32,

    /// Not-yet-bound observations tolerated while waiting for a bind
    pub bind_max_pending: u32,

    /// Delete the backup claim of every claim whose data was restored
    pub cleanup_backups: bool,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            tenant_prefix: "ns-".to_string(),
            backup_suffix: "-backup".to_string(),
            data_mover: vec!["./bin/migrate.sh".to_string()],
            report_path: PathBuf::from("pvc_status.txt"),
            max_concurrency: 10,
            http_timeout_secs: 30,
            scale_attempts: 3,
            scale_retry_delay_secs: 3,
            resume_replicas: 1,
            resume_settle_secs: 60,
            bind_poll_interval_secs: 5,
            bind_max_errors: 10,
            bind_max_pending: 30,
            cleanup_backups: false,
        }
    }
}

impl MigrateConfig {
    /// Load configuration from environment variables
    ///
    /// Unset variables fall back to the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("TENANT_PREFIX") {
            config.tenant_prefix = prefix;
        }

        if let Ok(suffix) = std::env::var("BACKUP_SUFFIX") {
            config.backup_suffix = suffix;
        }

        if let Ok(mover) = std::env::var("DATA_MOVER") {
            config.data_mover = split_command(&mover);
        }

        if let Ok(path) = std::env::var("REPORT_PATH") {
            config.report_path = PathBuf::from(path);
        }

        if let Ok(v) = std::env::var("MAX_CONCURRENCY") {
            config.max_concurrency = v.parse().context("Invalid MAX_CONCURRENCY")?;
        }

        if let Ok(v) = std::env::var("HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = v.parse().context("Invalid HTTP_TIMEOUT_SECS")?;
        }

        if let Ok(v) = std::env::var("RESUME_SETTLE_SECS") {
            config.resume_settle_secs = v.parse().context("Invalid RESUME_SETTLE_SECS")?;
        }

        // Accepts "true", "1", "yes" (case-insensitive) as true
        config.cleanup_backups = std::env::var("CLEANUP_BACKUPS")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        config.validate()?;
        Ok(config)
    }

    /// Overlay the tunables a config file sets
    ///
    /// Keys the file leaves out keep their current value. Naming
    /// conventions (`tenant_prefix`, `backup_suffix`) and the data mover
    /// are only ever set from the environment or the command line.
    pub fn merge_tunables(&mut self, file: &ConfigFile) {
        if let Some(path) = &file.report_path {
            self.report_path = path.clone();
        }
        if let Some(v) = file.max_concurrency {
            self.max_concurrency = v;
        }
        if let Some(v) = file.http_timeout_secs {
            self.http_timeout_secs = v;
        }
        if let Some(v) = file.scale_attempts {
            self.scale_attempts = v;
        }
        if let Some(v) = file.scale_retry_delay_secs {
            self.scale_retry_delay_secs = v;
        }
        if let Some(v) = file.resume_replicas {
            self.resume_replicas = v;
        }
        if let Some(v) = file.resume_settle_secs {
            self.resume_settle_secs = v;
        }
        if let Some(v) = file.bind_poll_interval_secs {
            self.bind_poll_interval_secs = v;
        }
        if let Some(v) = file.bind_max_errors {
            self.bind_max_errors = v;
        }
        if let Some(v) = file.bind_max_pending {
            self.bind_max_pending = v;
        }
        if let Some(v) = file.cleanup_backups {
            self.cleanup_backups = v;
        }
    }

    /// Reject settings the job cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.data_mover.is_empty() {
            anyhow::bail!("data mover command must not be empty");
        }
        if self.backup_suffix.is_empty() {
            anyhow::bail!("backup suffix must not be empty");
        }
        if self.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be at least 1");
        }
        if self.scale_attempts == 0 {
            anyhow::bail!("scale_attempts must be at least 1");
        }
        if self.bind_max_errors == 0 || self.bind_max_pending == 0 {
            anyhow::bail!("bind_max_errors and bind_max_pending must be at least 1");
        }
        Ok(())
    }

    pub fn scale_retry_delay(&self) -> Duration {
        Duration::from_secs(self.scale_retry_delay_secs)
    }

    pub fn resume_settle(&self) -> Duration {
        Duration::from_secs(self.resume_settle_secs)
    }

    pub fn bind_poll_interval(&self) -> Duration {
        Duration::from_secs(self.bind_poll_interval_secs)
    }
}

/// Run tunables read from a JSON config file
///
/// Every key is optional; see [`MigrateConfig::merge_tunables`].
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub report_path: Option<PathBuf>,
    pub max_concurrency: Option<usize>,
    pub http_timeout_secs: Option<u64>,
    pub scale_attempts: Option<u32>,
    pub scale_retry_delay_secs: Option<u64>,
    pub resume_replicas: Option<i32>,
    pub resume_settle_secs: Option<u64>,
    pub bind_poll_interval_secs: Option<u64>,
    pub bind_max_errors: Option<u32>,
    pub bind_max_pending: Option<u32>,
    pub cleanup_backups: Option<bool>,
}

impl ConfigFile {
    /// Load tunables from a JSON file
    ///
    /// Values the file sets are checked against the defaults so a bad file
    /// is reported by name.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let file: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let mut check = MigrateConfig::default();
        check.merge_tunables(&file);
        check
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(file)
    }
}

/// Connection settings for the Kubernetes API server
///
/// Not part of [`MigrateConfig`]: none of this can come from the JSON file.
#[derive(Clone, Debug)]
pub struct KubeConfig {
    pub api_url: String,
    /// Bearer token, if any
    pub token: Option<String>,
    /// PEM CA bundle used to verify the API server
    pub ca_pem: Option<Vec<u8>>,
    pub timeout_secs: u64,
}

impl KubeConfig {
    /// Build the connection settings from the environment
    ///
    /// `KUBE_API_URL` wins; otherwise the in-cluster service address is
    /// used. Token and CA files are optional when absent.
    pub fn from_env(timeout_secs: u64) -> Result<Self> {
        let api_url = match std::env::var("KUBE_API_URL") {
            Ok(url) => url,
            Err(_) => {
                let host = std::env::var("KUBERNETES_SERVICE_HOST").context(
                    "KUBE_API_URL or KUBERNETES_SERVICE_HOST environment variable required",
                )?;
                let port =
                    std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
                in_cluster_url(&host, &port)
            }
        };

        let token_file =
            std::env::var("KUBE_TOKEN_FILE").unwrap_or_else(|_| DEFAULT_TOKEN_FILE.to_string());
        let token = match std::fs::read_to_string(&token_file) {
            Ok(t) => Some(t.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read token file: {}", token_file));
            }
        };

        let ca_file = std::env::var("KUBE_CA_FILE").unwrap_or_else(|_| DEFAULT_CA_FILE.to_string());
        let ca_pem = match std::fs::read(&ca_file) {
            Ok(pem) => Some(pem),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read CA file: {}", ca_file));
            }
        };

        Ok(Self {
            api_url,
            token,
            ca_pem,
            timeout_secs,
        })
    }
}

/// Format the in-cluster API URL, bracketing IPv6 hosts
fn in_cluster_url(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("https://[{}]:{}", host, port)
    } else {
        format!("https://{}:{}", host, port)
    }
}

/// Split a command line on whitespace
pub fn split_command(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

fn parse_flag(v: &str) -> bool {
    matches!(v.to_lowercase().as_str(), "true" | "1" | "yes")
}
