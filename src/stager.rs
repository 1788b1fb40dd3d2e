//! Staging of bootstrap credentials and static manifests
//!
//! Copies the TLS material, the auth material and the control-plane static
//! manifests from the assets root into the host paths the kubelet reads.
//! Copy failures are logged and never stop the remaining copies.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use strum::Display;
use tracing::{error, info, info_span};
use walkdir::WalkDir;

use crate::error::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum CopyKind {
    #[strum(serialize = "certificates")]
    Certificates,
    #[strum(serialize = "kubeconfig")]
    Kubeconfig,
    #[strum(serialize = "control plane manifests")]
    ControlPlaneManifests,
}

/// One source tree and the host directory it lands in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyPair {
    pub kind: CopyKind,
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// The fixed set of copies performed at bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPaths {
    pairs: Vec<CopyPair>,
}

impl BootstrapPaths {
    pub fn from_roots(assets: &Path, kubernetes: &Path) -> Self {
        let secrets = kubernetes.join("bootstrap-secrets");
        let manifests = kubernetes.join("manifests");

        Self {
            pairs: vec![
                CopyPair {
                    kind: CopyKind::Certificates,
                    source: assets.join("tls"),
                    destination: secrets.clone(),
                },
                CopyPair {
                    kind: CopyKind::Kubeconfig,
                    source: assets.join("auth"),
                    destination: secrets,
                },
                CopyPair {
                    kind: CopyKind::ControlPlaneManifests,
                    source: assets.join("bootstrap-manifests"),
                    destination: manifests,
                },
            ],
        }
    }

    pub fn pairs(&self) -> &[CopyPair] {
        &self.pairs
    }
}

/// Result of copying one pair
#[derive(Debug, Clone, Serialize)]
pub struct CopyOutcome {
    #[serde(flatten)]
    pub pair: CopyPair,
    pub files_copied: usize,
    pub error: Option<String>,
}

impl CopyOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    pub copies: Vec<CopyOutcome>,
}

impl StageReport {
    pub fn attempted(&self) -> usize {
        self.copies.len()
    }

    pub fn failed(&self) -> usize {
        self.copies.iter().filter(|c| !c.succeeded()).count()
    }
}

/// Copy every pair, logging failures and carrying on
pub fn stage(paths: &BootstrapPaths) -> StageReport {
    let mut report = StageReport::default();

    for pair in paths.pairs() {
        let _span = info_span!("copy", kind = %pair.kind).entered();

        let outcome = match copy_dir(&pair.source, &pair.destination) {
            Ok(files_copied) => {
                info!(
                    "Copied {} files from {} to {}",
                    files_copied,
                    pair.source.display(),
                    pair.destination.display()
                );
                CopyOutcome {
                    pair: pair.clone(),
                    files_copied,
                    error: None,
                }
            }
            Err(e) => {
                error!("something went wrong while copying {}: {}", pair.kind, e);
                CopyOutcome {
                    pair: pair.clone(),
                    files_copied: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        report.copies.push(outcome);
    }

    report
}

/// Recursively copy `src` into `dst`, overwriting existing files.
///
/// Returns the number of files copied. Stops at the first error, leaving
/// whatever was already copied in place.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<usize, StageError> {
    let meta = fs::metadata(src).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => StageError::SourceMissing(src.to_path_buf()),
        _ => StageError::Io {
            path: src.to_path_buf(),
            source,
        },
    })?;
    if !meta.is_dir() {
        return Err(StageError::NotADirectory(src.to_path_buf()));
    }

    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|source| StageError::Walk {
            path: src.to_path_buf(),
            source,
        })?;
        // Entries always live under `src`
        let relative = entry
            .path()
            .strip_prefix(src)
            .unwrap_or_else(|_| entry.path());
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|source| StageError::Io {
                path: target.clone(),
                source,
            })?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(|source| StageError::Io {
                path: target.clone(),
                source,
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}
