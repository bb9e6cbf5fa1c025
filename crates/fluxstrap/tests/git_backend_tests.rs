//! Lifecycle against a real bare git repository.

mod common;

use std::path::Path;
use std::process::Command;

use common::ConfigurationBuilder;
use tempfile::TempDir;

use fluxstrap::cluster::MemoryCluster;
use fluxstrap::config::Credentials;
use fluxstrap::git::VersionControl;
use fluxstrap::{BootstrapReconciler, GitCli};

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("git should run");
    assert!(
        output.status.success(),
        "git {:?}: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn bare_remote() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init", "--bare", "--initial-branch=main", "remote.git"]);
    let url = format!("file://{}", dir.path().join("remote.git").display());
    (dir, url)
}

fn reconciler() -> BootstrapReconciler<GitCli, MemoryCluster> {
    BootstrapReconciler::new(GitCli::new(&Credentials::default()), MemoryCluster::new())
}

#[tokio::test]
async fn test_create_update_delete_through_git() {
    let (remote, url) = bare_remote();
    let mut config = ConfigurationBuilder::new().build();
    config.repository.url = url.clone();
    config.commit.message_appendix = Some("[skip ci]".to_string());
    let reconciler = reconciler();

    let state = reconciler.create(&config).await.unwrap().value;
    let bare = remote.path().join("remote.git");
    let log = git(&bare, &["log", "--format=%an|%s", "main"]);
    assert_eq!(log.trim(), "Flux|Add Flux v2.1.2 manifests");
    let tree = git(&bare, &["ls-tree", "-r", "--name-only", "main"]);
    assert_eq!(
        tree.lines().collect::<Vec<_>>(),
        vec![
            "flux-system/gotk-components.yaml",
            "flux-system/gotk-sync.yaml",
            "flux-system/kustomization.yaml",
        ]
    );

    let unchanged = reconciler.update(&config, &state).await.unwrap().value;
    assert_eq!(unchanged.repository_files, state.repository_files);
    assert_eq!(git(&bare, &["rev-list", "--count", "main"]).trim(), "1");

    let mut moved = config.clone();
    moved.repository.path = "clusters/prod".to_string();
    let moved_state = reconciler.update(&moved, &state).await.unwrap().value;
    let tree = git(&bare, &["ls-tree", "-r", "--name-only", "main"]);
    assert!(tree.lines().all(|path| path.starts_with("clusters/prod/flux-system/")));
    assert_eq!(tree.lines().count(), 3);

    moved.delete_git_manifests = true;
    let outcome = reconciler.delete(&moved, &moved_state).await;
    assert!(outcome.is_clean(), "{:?}", outcome.error);
    let tree = git(&bare, &["ls-tree", "-r", "--name-only", "main"]);
    assert!(tree.trim().is_empty());
    let subject = git(&bare, &["log", "-1", "--format=%B", "main"]);
    assert_eq!(subject.trim(), "Uninstall Flux\n\n[skip ci]");
}

#[tokio::test]
async fn test_refresh_reads_out_of_band_edit() {
    let (_remote, url) = bare_remote();
    let mut config = ConfigurationBuilder::new().build();
    config.repository.url = url.clone();
    let reconciler = reconciler();
    let state = reconciler.create(&config).await.unwrap().value;

    let cli = GitCli::new(&Credentials::default());
    let working_copy = cli.clone_repository(&url, "main").await.unwrap();
    std::fs::write(working_copy.path().join("flux-system/kustomization.yaml"), "edited: true\n").unwrap();
    git(working_copy.path(), &["-c", "user.name=Someone", "-c", "user.email=someone@example.com", "commit", "-am", "edit"]);
    git(working_copy.path(), &["push", "origin", "main"]);

    let refreshed = reconciler.refresh(&config, &state).await.unwrap().value.unwrap();
    assert_eq!(
        refreshed.repository_files.get("flux-system/kustomization.yaml"),
        Some("edited: true\n")
    );

    let plan = reconciler.plan(&config, Some(&refreshed)).unwrap();
    assert_eq!(plan.changed, vec!["flux-system/kustomization.yaml"]);
}
