//! Controller configuration and cluster connection setup.
//!
//! The only command-line input is the kubeconfig path. Everything else is
//! read from environment variables.

use crate::controller::WorkerConfig;
use crate::error::ControllerError;
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use workqueue::ItemExponentialFailureRateLimiter;

/// Default informer resync period
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(20 * 60);

/// Command-line arguments.
#[derive(Debug, Clone, Parser)]
#[command(name = "ha-deployment-controller", version, about)]
pub struct Args {
    /// Path to the kubeconfig file (defaults to ~/.kube/config).
    /// Only one file is read: of a `:`-separated list, the first entry is used.
    /// Falls back to the in-cluster configuration when unusable.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

impl Args {
    /// Kubeconfig path to try first: the explicit one (first entry of a
    /// path list), else `$HOME/.kube/config`.
    pub fn kubeconfig_path(&self) -> Option<PathBuf> {
        self.kubeconfig
            .as_ref()
            .and_then(|paths| std::env::split_paths(paths).find(|p| !p.as_os_str().is_empty()))
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".kube").join("config")))
    }
}

/// What to do when no usable cluster configuration can be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPolicy {
    /// Return the error and exit
    #[default]
    FailFast,
    /// Keep retrying with exponential backoff until shutdown
    Retry,
}

impl FromStr for ConnectionPolicy {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" => Ok(Self::FailFast),
            "retry" => Ok(Self::Retry),
            other => Err(ControllerError::InvalidConfig(format!(
                "CONNECTION_POLICY must be 'fail-fast' or 'retry', got '{other}'"
            ))),
        }
    }
}

/// Settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Informer resync period; `None` disables resync
    pub resync_period: Option<Duration>,
    pub connection_policy: ConnectionPolicy,
    pub worker: WorkerConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            resync_period: Some(DEFAULT_RESYNC_PERIOD),
            connection_policy: ConnectionPolicy::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    ///
    /// - `WATCH_NAMESPACE`: namespace to watch (default: all namespaces)
    /// - `RESYNC_PERIOD_SECS`: informer resync period, `0` disables (default: 1200)
    /// - `CACHE_SYNC_TIMEOUT_SECS`: give up waiting for the initial sync (default: wait)
    /// - `CONNECTION_POLICY`: `fail-fast` or `retry` (default: `fail-fast`)
    /// - `REQUEUE_ON_ERROR`: requeue failed keys with backoff (default: `false`)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let mut config = Self::default();

        config.namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());

        if let Some(secs) = lookup("RESYNC_PERIOD_SECS") {
            let secs = parse_secs("RESYNC_PERIOD_SECS", &secs)?;
            config.resync_period = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(secs) = lookup("CACHE_SYNC_TIMEOUT_SECS") {
            let secs = parse_secs("CACHE_SYNC_TIMEOUT_SECS", &secs)?;
            config.worker.cache_sync_timeout = Some(Duration::from_secs(secs));
        }

        if let Some(policy) = lookup("CONNECTION_POLICY") {
            config.connection_policy = policy.parse()?;
        }

        if let Some(requeue) = lookup("REQUEUE_ON_ERROR") {
            config.worker.requeue_on_error = requeue.trim().parse().map_err(|_| {
                ControllerError::InvalidConfig(format!(
                    "REQUEUE_ON_ERROR must be 'true' or 'false', got '{requeue}'"
                ))
            })?;
        }

        Ok(config)
    }
}

fn parse_secs(name: &str, value: &str) -> Result<u64, ControllerError> {
    value.trim().parse().map_err(|_| {
        ControllerError::InvalidConfig(format!("{name} must be a number of seconds, got '{value}'"))
    })
}

/// Build the client configuration: the kubeconfig first, then in-cluster.
pub async fn load_config(kubeconfig: Option<&Path>) -> Result<Config, ControllerError> {
    if let Some(path) = kubeconfig {
        match from_kubeconfig(path).await {
            Ok(config) => return Ok(config),
            Err(e) => warn!(
                "Building config from {} failed, {}, trying to build in-cluster config",
                path.display(),
                e
            ),
        }
    }

    Config::incluster()
        .map_err(|e| ControllerError::Connection(format!("error building in-cluster config: {e}")))
}

async fn from_kubeconfig(path: &Path) -> Result<Config, ControllerError> {
    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| ControllerError::Connection(e.to_string()))?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ControllerError::Connection(e.to_string()))
}

/// Build a Kubernetes client according to `policy`.
pub async fn connect(
    kubeconfig: Option<&Path>,
    policy: ConnectionPolicy,
    shutdown: &CancellationToken,
) -> Result<Client, ControllerError> {
    let mut attempt = 0u32;
    loop {
        let result = match load_config(kubeconfig).await {
            Ok(config) => Client::try_from(config).map_err(ControllerError::from),
            Err(e) => Err(e),
        };

        match (result, policy) {
            (Ok(client), _) => {
                info!("Kubernetes client created");
                return Ok(client);
            }
            (Err(e), ConnectionPolicy::FailFast) => {
                error!("Failed to create Kubernetes client: {}", e);
                return Err(e);
            }
            (Err(e), ConnectionPolicy::Retry) => {
                let delay = ItemExponentialFailureRateLimiter::<()>::backoff_for(
                    attempt,
                    Duration::from_secs(1),
                    Duration::from_secs(60),
                );
                attempt = attempt.saturating_add(1);
                warn!("Failed to create Kubernetes client: {}, retrying in {:?}", e, delay);

                tokio::select! {
                    () = shutdown.cancelled() => return Err(e),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.namespace, None);
        assert_eq!(config.resync_period, Some(Duration::from_secs(1200)));
        assert_eq!(config.connection_policy, ConnectionPolicy::FailFast);
        assert_eq!(config.worker.period, Duration::from_secs(1));
        assert!(!config.worker.requeue_on_error);
    }

    #[test]
    fn test_overrides() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("WATCH_NAMESPACE", "team-a"),
            ("RESYNC_PERIOD_SECS", "0"),
            ("CACHE_SYNC_TIMEOUT_SECS", "30"),
            ("CONNECTION_POLICY", "retry"),
            ("REQUEUE_ON_ERROR", "true"),
        ]))
        .unwrap();

        assert_eq!(config.namespace.as_deref(), Some("team-a"));
        assert_eq!(config.resync_period, None);
        assert_eq!(config.worker.cache_sync_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.connection_policy, ConnectionPolicy::Retry);
        assert!(config.worker.requeue_on_error);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for vars in [
            [("RESYNC_PERIOD_SECS", "soon")],
            [("CONNECTION_POLICY", "degrade")],
            [("REQUEUE_ON_ERROR", "maybe")],
        ] {
            assert!(matches!(
                ControllerConfig::from_lookup(lookup(&vars)),
                Err(ControllerError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_explicit_kubeconfig_wins() {
        let args = Args::parse_from(["ha-deployment-controller", "--kubeconfig", "/tmp/kubeconfig"]);
        assert_eq!(args.kubeconfig_path(), Some(PathBuf::from("/tmp/kubeconfig")));
    }

    #[test]
    fn test_kubeconfig_list_uses_first_entry() {
        let args = Args::parse_from([
            "ha-deployment-controller",
            "--kubeconfig",
            "/etc/kube/admin.conf:/tmp/kubeconfig",
        ]);
        assert_eq!(args.kubeconfig_path(), Some(PathBuf::from("/etc/kube/admin.conf")));
    }

    #[tokio::test]
    async fn test_unreadable_kubeconfig_is_a_connection_error() {
        let result = from_kubeconfig(Path::new("/nonexistent/kubeconfig")).await;

        assert!(matches!(result, Err(ControllerError::Connection(_))));
    }
}
