//! k8s-cluster-manager library
//!
//! Bootstraps a single Kubernetes control-plane node: stages credentials and
//! static manifests, waits for the control plane pods to run, then installs
//! the core add-ons with Helm.

pub mod addons;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod helm;
pub mod k8s;
pub mod shutdown;
pub mod stager;

pub use crate::bootstrap::{BootstrapSummary, Bootstrapper};
pub use crate::config::{Cli, LogFormat, Settings};

/// Git revision baked in at build time
pub const GIT_COMMIT: &str = match option_env!("GIT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};
