//! Core add-on installation
//!
//! Every immediate subdirectory of the charts directory is one add-on unit.
//! Units are installed one at a time; a failing unit is logged and the rest
//! still get installed. The package manager's own server-side component is
//! installed last, whatever happened to the units.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use crate::helm::PackageManager;

/// One installable chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddonUnit {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Succeeded,
    Failed,
}

/// Result of one package manager invocation
#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub unit: String,
    pub status: InstallStatus,
    /// Process output on success, error text on failure
    pub output: String,
}

impl InstallOutcome {
    fn from_result(unit: &str, result: Result<String, crate::error::HelmError>) -> Self {
        match result {
            Ok(output) => Self {
                unit: unit.to_string(),
                status: InstallStatus::Succeeded,
                output,
            },
            Err(e) => Self {
                unit: unit.to_string(),
                status: InstallStatus::Failed,
                output: e.to_string(),
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == InstallStatus::Succeeded
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    /// Set when the charts directory could not be listed
    pub listing_error: Option<String>,
    pub units: Vec<InstallOutcome>,
    /// Outcome of the package manager bootstrap, `None` if it was not attempted
    pub init: Option<InstallOutcome>,
}

impl InstallReport {
    pub fn installed(&self) -> usize {
        self.units.iter().filter(|u| u.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.units.iter().filter(|u| !u.succeeded()).count()
    }
}

/// List the add-on units under `charts_dir`, sorted by name.
///
/// Symlinks are followed. A link that cannot be resolved is logged and skipped.
pub fn discover_units(charts_dir: &Path) -> std::io::Result<Vec<AddonUnit>> {
    let mut units = Vec::new();
    for entry in fs::read_dir(charts_dir)? {
        let entry = entry?;
        match fs::metadata(entry.path()) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => continue,
            Err(e) => {
                warn!("skipping chart entry {}: {}", entry.path().display(), e);
                continue;
            }
        }
        units.push(AddonUnit {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path(),
        });
    }
    units.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(units)
}

pub struct AddonInstaller<'a, P: ?Sized> {
    package_manager: &'a P,
}

impl<'a, P> AddonInstaller<'a, P>
where
    P: PackageManager + ?Sized,
{
    pub fn new(package_manager: &'a P) -> Self {
        Self { package_manager }
    }

    pub async fn install_addons(&self, charts_dir: &Path) -> InstallReport {
        let mut report = InstallReport::default();

        let units = match discover_units(charts_dir) {
            Ok(units) => units,
            Err(e) => {
                error!("cannot list charts in {}: {}", charts_dir.display(), e);
                report.listing_error = Some(e.to_string());
                return report;
            }
        };
        info!("Found {} add-on charts", units.len());

        for unit in &units {
            let span = info_span!("addon", unit = %unit.name);
            let outcome = async {
                info!("installing chart {}", unit.name);
                let result = self.package_manager.install(&unit.path).await;
                match &result {
                    Ok(output) => info!("{}", output.trim_end()),
                    Err(e) => error!("installing chart {} failed: {}", unit.name, e),
                }
                InstallOutcome::from_result(&unit.name, result)
            }
            .instrument(span)
            .await;
            report.units.push(outcome);
        }

        let result = self.package_manager.init().await;
        match &result {
            Ok(output) => info!("{}", output.trim_end()),
            Err(e) => error!("package manager init failed: {}", e),
        }
        report.init = Some(InstallOutcome::from_result("init", result));

        info!(
            installed = report.installed(),
            failed = report.failed(),
            "Add-on installation finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HelmError;
    use crate::helm::MockPackageManager;

    #[test]
    fn test_discover_units_skips_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("kube-dns")).unwrap();
        fs::create_dir(dir.path().join("calico")).unwrap();
        fs::write(dir.path().join("README.md"), "charts").unwrap();

        let units = discover_units(dir.path()).unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["calico", "kube-dns"]);
        assert_eq!(units[0].path, dir.path().join("calico"));
    }

    #[cfg(unix)]
    #[test]
    fn test_discover_units_follows_symlinks() {
        let charts = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        fs::create_dir(charts.path().join("kube-dns")).unwrap();
        fs::create_dir(elsewhere.path().join("calico")).unwrap();
        std::os::unix::fs::symlink(
            elsewhere.path().join("calico"),
            charts.path().join("calico"),
        )
        .unwrap();
        // Dangling link is skipped, not fatal
        std::os::unix::fs::symlink(
            elsewhere.path().join("gone"),
            charts.path().join("gone"),
        )
        .unwrap();

        let units = discover_units(charts.path()).unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["calico", "kube-dns"]);
        assert_eq!(units[0].path, charts.path().join("calico"));
    }

    #[tokio::test]
    async fn test_listing_failure_skips_everything() {
        let mut helm = MockPackageManager::new();
        helm.expect_install().never();
        helm.expect_init().never();

        let report = AddonInstaller::new(&helm)
            .install_addons(Path::new("/no/such/charts"))
            .await;
        assert!(report.listing_error.is_some());
        assert!(report.units.is_empty());
        assert!(report.init.is_none());
    }

    #[tokio::test]
    async fn test_failed_unit_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        let mut helm = MockPackageManager::new();
        helm.expect_install().times(3).returning(|chart| {
            if chart.ends_with("b") {
                Err(HelmError::Failed {
                    command: "helm install b".to_string(),
                    code: Some(1),
                    output: "Error: release b failed".to_string(),
                })
            } else {
                Ok(format!("installed {}", chart.display()))
            }
        });
        helm.expect_init()
            .times(1)
            .returning(|| Ok("Tiller installed".to_string()));

        let report = AddonInstaller::new(&helm).install_addons(dir.path()).await;
        let statuses: Vec<_> = report
            .units
            .iter()
            .map(|u| (u.unit.as_str(), u.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("a", InstallStatus::Succeeded),
                ("b", InstallStatus::Failed),
                ("c", InstallStatus::Succeeded),
            ]
        );
        assert_eq!(report.installed(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.init.as_ref().unwrap().succeeded());
    }

    #[tokio::test]
    async fn test_init_failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("dns")).unwrap();

        let mut helm = MockPackageManager::new();
        helm.expect_install()
            .times(1)
            .returning(|_| Ok(String::new()));
        helm.expect_init().times(1).returning(|| {
            Err(HelmError::Failed {
                command: "helm init".to_string(),
                code: Some(1),
                output: "already installed".to_string(),
            })
        });

        let report = AddonInstaller::new(&helm).install_addons(dir.path()).await;
        assert_eq!(report.installed(), 1);
        let init = report.init.unwrap();
        assert_eq!(init.status, InstallStatus::Failed);
        assert!(init.output.contains("already installed"));
    }
}
