//! Error types for the cluster manager
//!
//! Only configuration and cluster-client errors are fatal to the process.
//! Everything else is logged by the stage that produced it and folded into
//! the run summary.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving and validating [`crate::config::Settings`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("config file {} does not exist", .0.display())]
    MissingFile(PathBuf),

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("invalid failover ip '{value}': {source}")]
    FailoverIp {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
}

/// Errors from the recursive directory copy used by the stager
#[derive(Debug, Error)]
pub enum StageError {
    #[error("source directory {} does not exist", .0.display())]
    SourceMissing(PathBuf),

    #[error("source {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from invoking the package manager binary
#[derive(Debug, Error)]
pub enum HelmError {
    #[error("failed to execute `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {output}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Failed {
        command: String,
        code: Option<i32>,
        output: String,
    },
}

/// Errors talking to the Kubernetes API
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("failed to read kubeconfig {}: {source}", path.display())]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: kube::config::KubeconfigError,
    },

    #[error("failed to infer cluster configuration: {0}")]
    Infer(#[from] kube::config::InferConfigError),

    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),
}
