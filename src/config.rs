//! Configuration for the cluster manager
//!
//! Values resolve with the precedence flag > environment variable > config
//! file > built-in default, then get validated into [`Settings`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variables read into the configuration. Each maps to the
/// lowercased config key.
const ENV_VARS: &[&str] = &[
    "ASSETS_PATH",
    "KUBERNETES_PATH",
    "KUBECONFIG",
    "FAILOVER_IPS",
    "HELM_BINARY",
    "POLL_INTERVAL_SECS",
    "READINESS_TIMEOUT_SECS",
    "MIN_READY_PODS",
    "SUMMARY_PATH",
    "LOG_FORMAT",
];

/// Version string shown by `--version`, carrying the git revision
pub fn version() -> String {
    format!("v{} (rev:{})", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT)
}

/// Command line flags
#[derive(Debug, Default, Parser)]
#[command(name = "k8s-cluster-manager", version = version(), about)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Assets path
    #[arg(long)]
    pub assets: Option<String>,

    /// Host kubernetes path
    #[arg(long)]
    pub kubernetes: Option<String>,

    /// Absolute path to the kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// Failover IPs of the API server
    #[arg(long, value_delimiter = ',')]
    pub failover_ips: Option<Vec<String>>,

    /// Package manager binary used to install add-ons
    #[arg(long)]
    pub helm_binary: Option<String>,

    /// Seconds between readiness checks
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Give up waiting for the control plane after this many seconds
    #[arg(long)]
    pub readiness_timeout: Option<u64>,

    /// Minimum number of pods that must be observed before the cluster counts as ready
    #[arg(long)]
    pub min_ready_pods: Option<u64>,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    pub summary_path: Option<String>,

    /// Log output format (text or json)
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Unvalidated configuration as produced by the layered sources
#[derive(Debug, Deserialize)]
struct RawSettings {
    assets_path: String,
    kubernetes_path: String,
    #[serde(default)]
    kubeconfig: Option<String>,
    failover_ips: Vec<String>,
    helm_binary: String,
    poll_interval_secs: u64,
    #[serde(default)]
    readiness_timeout_secs: Option<u64>,
    min_ready_pods: u64,
    #[serde(default)]
    summary_path: Option<String>,
    log_format: LogFormat,
}

/// Validated configuration, built once and passed to every component
#[derive(Debug, Clone)]
pub struct Settings {
    pub assets_path: PathBuf,
    pub kubernetes_path: PathBuf,
    pub kubeconfig: Option<PathBuf>,
    pub failover_ips: Vec<IpAddr>,
    pub helm_binary: String,
    pub poll_interval: Duration,
    pub readiness_timeout: Option<Duration>,
    pub min_ready_pods: usize,
    pub summary_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Settings {
    /// Load settings from `.env`, the process environment, the config file and flags
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let env: HashMap<String, String> = std::env::vars().collect();
        let home = env.get("HOME").cloned();
        Self::resolve(cli, &env, home.as_deref())
    }

    /// Resolve settings from explicit sources. `env` stands in for the process environment.
    pub fn resolve(
        cli: &Cli,
        env: &HashMap<String, String>,
        home: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("assets_path", "/app/assets")?
            .set_default("kubernetes_path", "/app/kubernetes")?
            .set_default("failover_ips", vec!["10.4.0.1", "10.4.0.2"])?
            .set_default("helm_binary", "helm")?
            .set_default("poll_interval_secs", 60)?
            .set_default("min_ready_pods", 0)?
            .set_default("log_format", "text")?;

        if let Some(path) = &cli.config {
            if !path.exists() {
                return Err(ConfigError::MissingFile(path.clone()));
            }
            builder = builder.add_source(
                config::File::from(path.as_path()).format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::default()
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("failover_ips")
                .source(Some(known_env(env))),
        );

        let settings: RawSettings = builder
            .set_override_option("assets_path", cli.assets.clone())?
            .set_override_option("kubernetes_path", cli.kubernetes.clone())?
            .set_override_option("kubeconfig", cli.kubeconfig.clone())?
            .set_override_option("failover_ips", cli.failover_ips.clone())?
            .set_override_option("helm_binary", cli.helm_binary.clone())?
            .set_override_option("poll_interval_secs", cli.poll_interval)?
            .set_override_option("readiness_timeout_secs", cli.readiness_timeout)?
            .set_override_option("min_ready_pods", cli.min_ready_pods)?
            .set_override_option("summary_path", cli.summary_path.clone())?
            .set_override_option("log_format", cli.log_format.clone())?
            .build()?
            .try_deserialize()?;

        settings.validate(home)
    }

    /// Directory holding one subdirectory per add-on chart
    pub fn charts_dir(&self) -> PathBuf {
        self.assets_path.join("charts")
    }
}

impl RawSettings {
    fn validate(self, home: Option<&str>) -> Result<Settings, ConfigError> {
        let assets_path = non_empty_path("assets_path", &self.assets_path)?;
        let kubernetes_path = non_empty_path("kubernetes_path", &self.kubernetes_path)?;

        if self.helm_binary.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "helm_binary",
            });
        }

        let failover_ips = self
            .failover_ips
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpAddr>().map_err(|source| ConfigError::FailoverIp {
                    value: s.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::NotPositive {
                field: "poll_interval_secs",
            });
        }
        if self.readiness_timeout_secs == Some(0) {
            return Err(ConfigError::NotPositive {
                field: "readiness_timeout_secs",
            });
        }

        let kubeconfig = match self.kubeconfig.filter(|k| !k.is_empty()) {
            Some(path) => Some(PathBuf::from(path)),
            None => home
                .filter(|h| !h.is_empty())
                .map(|h| Path::new(h).join(".kube").join("config")),
        };

        Ok(Settings {
            assets_path,
            kubernetes_path,
            kubeconfig,
            failover_ips,
            helm_binary: self.helm_binary,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            readiness_timeout: self.readiness_timeout_secs.map(Duration::from_secs),
            min_ready_pods: self.min_ready_pods as usize,
            summary_path: self.summary_path.filter(|p| !p.is_empty()).map(PathBuf::from),
            log_format: self.log_format,
        })
    }
}

fn non_empty_path(field: &'static str, value: &str) -> Result<PathBuf, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Empty { field });
    }
    Ok(PathBuf::from(value))
}

/// Keep only the variables this tool knows about. Empty values count as unset.
fn known_env(env: &HashMap<String, String>) -> config::Map<String, String> {
    ENV_VARS
        .iter()
        .filter_map(|var| {
            env.get(*var)
                .filter(|v| !v.is_empty())
                .map(|v| (var.to_string(), v.clone()))
        })
        .collect()
}
