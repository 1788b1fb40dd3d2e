//! Tests for staging bootstrap assets onto the host

mod common;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use common::AssetsFixture;
use k8s_cluster_manager::stager::{stage, BootstrapPaths, CopyKind};

/// Relative path -> contents for every file under `root`
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().display().to_string();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[test]
fn test_stage_copies_all_trees() {
    let fixture = AssetsFixture::complete();
    let paths = BootstrapPaths::from_roots(&fixture.assets(), &fixture.kubernetes());

    let report = stage(&paths);

    assert_eq!(report.attempted(), 3);
    assert_eq!(report.failed(), 0);

    let secrets = fixture.kubernetes().join("bootstrap-secrets");
    assert!(secrets.join("ca.crt").is_file());
    assert!(secrets.join("etcd/server.key").is_file());
    assert!(secrets.join("kubeconfig").is_file());

    let manifests = fixture.kubernetes().join("manifests");
    assert!(manifests.join("kube-apiserver.yaml").is_file());
    assert!(manifests.join("kube-scheduler.yaml").is_file());
}

#[test]
fn test_missing_source_does_not_stop_other_copies() {
    let fixture = AssetsFixture::new();
    fixture
        .write("tls/ca.crt", "ca")
        .write("bootstrap-manifests/kube-apiserver.yaml", "kind: Pod\n");
    let paths = BootstrapPaths::from_roots(&fixture.assets(), &fixture.kubernetes());

    let report = stage(&paths);

    assert_eq!(report.attempted(), 3);
    assert_eq!(report.failed(), 1);
    let failed: Vec<_> = report
        .copies
        .iter()
        .filter(|c| !c.succeeded())
        .map(|c| c.pair.kind)
        .collect();
    assert_eq!(failed, vec![CopyKind::Kubeconfig]);

    assert!(fixture
        .kubernetes()
        .join("bootstrap-secrets/ca.crt")
        .is_file());
    assert!(fixture
        .kubernetes()
        .join("manifests/kube-apiserver.yaml")
        .is_file());
}

#[test]
fn test_nothing_to_stage() {
    let fixture = AssetsFixture::new();
    let paths = BootstrapPaths::from_roots(&fixture.assets(), &fixture.kubernetes());

    let report = stage(&paths);

    assert_eq!(report.failed(), 3);
    assert!(report.copies.iter().all(|c| c.files_copied == 0));
}

#[test]
fn test_staging_twice_matches_staging_once() {
    let fixture = AssetsFixture::complete();
    let paths = BootstrapPaths::from_roots(&fixture.assets(), &fixture.kubernetes());

    stage(&paths);
    let once = snapshot(&fixture.kubernetes());
    stage(&paths);
    let twice = snapshot(&fixture.kubernetes());

    assert_eq!(once.len(), 5);
    assert_eq!(once, twice);
}

#[test]
fn test_report_serializes_counts() {
    let fixture = AssetsFixture::new();
    fixture.write("auth/kubeconfig", "apiVersion: v1\n");
    let report = stage(&BootstrapPaths::from_roots(
        &fixture.assets(),
        &fixture.kubernetes(),
    ));

    let json = serde_json::to_value(&report).unwrap();
    let copies = json["copies"].as_array().unwrap();
    assert_eq!(copies.len(), 3);
    assert_eq!(copies[1]["kind"], "kubeconfig");
    assert_eq!(copies[1]["files_copied"], 1);
    assert!(copies[1]["error"].is_null());
    assert!(copies[0]["error"].as_str().unwrap().contains("does not exist"));
}
