//! Bootstrap orchestration
//!
//! Runs staging, the readiness wait and add-on installation in that order,
//! once. Only the readiness wait decides whether the run moves on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::addons::{AddonInstaller, InstallReport};
use crate::config::Settings;
use crate::helm::PackageManager;
use crate::k8s::{Backoff, CancelToken, PodLister, ReadinessPolicy, ReadinessWaiter, WaitOutcome};
use crate::stager::{self, BootstrapPaths, StageReport};

/// Machine-readable record of one bootstrap run
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub staging: StageReport,
    pub readiness: WaitOutcome,
    /// `None` when the readiness wait did not end in `Ready`
    pub addons: Option<InstallReport>,
}

impl BootstrapSummary {
    /// Every stage was attempted. Individual copy or install failures do not count.
    pub fn is_complete(&self) -> bool {
        self.readiness.is_ready() && self.addons.is_some()
    }

    pub fn failed_copies(&self) -> usize {
        self.staging.failed()
    }

    pub fn failed_installs(&self) -> usize {
        self.addons.as_ref().map(|a| a.failed()).unwrap_or(0)
    }
}

pub struct Bootstrapper<L: ?Sized, P: ?Sized> {
    settings: Settings,
    lister: Arc<L>,
    package_manager: Arc<P>,
    backoff: Backoff,
}

impl<L, P> Bootstrapper<L, P>
where
    L: PodLister + ?Sized + 'static,
    P: PackageManager + ?Sized,
{
    pub fn new(settings: Settings, lister: Arc<L>, package_manager: Arc<P>) -> Self {
        Self {
            settings,
            lister,
            package_manager,
            backoff: Backoff::default(),
        }
    }

    /// Override the retry budget used for transient API errors
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run(&self, cancel: &CancelToken) -> BootstrapSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        async {
            let staging = self.stage().await;

            let readiness = ReadinessWaiter::new(Arc::clone(&self.lister), self.settings.poll_interval)
                .with_policy(ReadinessPolicy::new(self.settings.min_ready_pods))
                .with_backoff(self.backoff)
                .with_deadline(self.settings.readiness_timeout)
                .wait_until_ready(cancel)
                .instrument(info_span!("readiness"))
                .await;

            let addons = if readiness.is_ready() {
                Some(
                    AddonInstaller::new(&*self.package_manager)
                        .install_addons(&self.settings.charts_dir())
                        .instrument(info_span!("addons"))
                        .await,
                )
            } else {
                warn!("Skipping add-on installation: control plane {}", readiness);
                None
            };

            let summary = BootstrapSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                staging,
                readiness,
                addons,
            };
            info!(
                failed_copies = summary.failed_copies(),
                failed_installs = summary.failed_installs(),
                complete = summary.is_complete(),
                "Bootstrap finished"
            );
            summary
        }
        .instrument(info_span!("bootstrap", %run_id))
        .await
    }

    async fn stage(&self) -> StageReport {
        let paths =
            BootstrapPaths::from_roots(&self.settings.assets_path, &self.settings.kubernetes_path);
        let span = info_span!("staging");

        match tokio::task::spawn_blocking(move || span.in_scope(|| stager::stage(&paths))).await {
            Ok(report) => report,
            Err(e) => {
                error!("staging task failed: {}", e);
                StageReport::default()
            }
        }
    }
}
