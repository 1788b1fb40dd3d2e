use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::error::HelmError;

/// Taint and label carried by control-plane nodes
const MASTER_ROLE: &str = "node-role.kubernetes.io/master";

/// Operations the add-on installer needs from a package manager
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Install the chart located at `chart`, returning the combined output
    async fn install(&self, chart: &Path) -> Result<String, HelmError>;

    /// Install the package manager's own server-side component
    async fn init(&self) -> Result<String, HelmError>;
}

/// Arguments that pin the Helm server-side component to a control-plane node
pub fn control_plane_init_args() -> Vec<String> {
    vec![
        "init".to_string(),
        "--node-selectors".to_string(),
        format!("{}=", MASTER_ROLE),
        "--override".to_string(),
        format!("spec.template.spec.tolerations[0].key={}", MASTER_ROLE),
        "--override".to_string(),
        "spec.template.spec.tolerations[0].effect=NoSchedule".to_string(),
    ]
}

/// Client for the Helm CLI
#[derive(Clone, Debug)]
pub struct HelmClient {
    binary: String,
}

impl HelmClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run the binary to completion and return stdout followed by stderr
    async fn run(&self, args: &[String]) -> Result<String, HelmError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!(%command, "Running package manager");

        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| HelmError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr);

        if !stderr.is_empty() {
            warn!("{} stderr: {}", self.binary, stderr.trim_end());
        }

        if output.status.success() {
            Ok(combined)
        } else {
            Err(HelmError::Failed {
                command,
                code: output.status.code(),
                output: combined.trim_end().to_string(),
            })
        }
    }
}

#[async_trait]
impl PackageManager for HelmClient {
    #[instrument(skip(self), fields(binary = %self.binary))]
    async fn install(&self, chart: &Path) -> Result<String, HelmError> {
        info!("Installing Helm chart: {}", chart.display());
        let args = vec!["install".to_string(), chart.display().to_string()];
        self.run(&args).await
    }

    #[instrument(skip(self), fields(binary = %self.binary))]
    async fn init(&self) -> Result<String, HelmError> {
        info!("Installing Helm server-side component on the control plane");
        self.run(&control_plane_init_args()).await
    }
}
