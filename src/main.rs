use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use k8s_cluster_manager::{
    helm::HelmClient,
    k8s::{CancelToken, K8sClient},
    shutdown,
    Bootstrapper, Cli, LogFormat, Settings, GIT_COMMIT,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = Settings::load(&cli).context("error validating configuration")?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    match settings.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        rev = GIT_COMMIT,
        "Starting k8s-cluster-manager"
    );
    tracing::info!(failover_ips = ?settings.failover_ips, "Configuration loaded");

    // Connection to k8s
    let k8s = K8sClient::connect(settings.kubeconfig.as_deref())
        .await
        .context("failed to create Kubernetes client")?;
    let helm = HelmClient::new(settings.helm_binary.clone());

    let cancel = CancelToken::new();
    tokio::spawn(shutdown::handle_signals(cancel.clone()));

    let summary_path = settings.summary_path.clone();
    let bootstrapper = Bootstrapper::new(settings, Arc::new(k8s), Arc::new(helm));
    let summary = bootstrapper.run(&cancel).await;
    // Nothing left to cancel, so any further signal exits
    cancel.cancel();

    let json = serde_json::to_string(&summary)?;
    tracing::info!(summary = %json, "Run summary");
    if let Some(path) = summary_path {
        tokio::fs::write(&path, &json)
            .await
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
    }

    if !summary.is_complete() {
        bail!("bootstrap did not complete: control plane {}", summary.readiness);
    }

    Ok(())
}
