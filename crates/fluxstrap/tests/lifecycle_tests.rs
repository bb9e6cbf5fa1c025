//! End-to-end lifecycle scenarios against the in-memory backends.

mod common;

use common::{ConfigurationBuilder, TestHarness};

use fluxstrap::cluster::{ClusterCall, Condition, ConditionStatus, ObjectRef};
use fluxstrap::git::{GitCall, PushFailure};
use fluxstrap::health::{HealthMonitor, Readiness};
use fluxstrap::manifests::secret::secret_ref;
use fluxstrap::manifests::sync::sync_ref;
use fluxstrap::{BootstrapError, TickReport};

const GENERATED: [&str; 3] = [
    "flux-system/gotk-components.yaml",
    "flux-system/gotk-sync.yaml",
    "flux-system/kustomization.yaml",
];

fn namespace_ref(name: &str) -> ObjectRef {
    ObjectRef::new("v1", "Namespace", None, name)
}

#[tokio::test]
async fn test_create_produces_three_files_and_ready_installation() {
    let harness = TestHarness::new();
    let config = ConfigurationBuilder::new().namespace("flux-system").build();

    let state = harness.create(&config).await;

    let paths: Vec<&str> = state.repository_files.paths().collect();
    assert_eq!(paths, GENERATED);
    assert_eq!(harness.remote().files("main"), state.repository_files);
    assert_eq!(
        HealthMonitor::new(harness.cluster())
            .check_ready("flux-system")
            .await
            .unwrap(),
        Readiness::Ready
    );
    assert_eq!(harness.saved_state(), Some(state));
}

#[tokio::test]
async fn test_update_moves_files_to_new_path() {
    let harness = TestHarness::new();
    let state = harness.create(&ConfigurationBuilder::new().build()).await;
    let moved = ConfigurationBuilder::new().path("custom-path").build();

    let plan = harness.reconciler.plan(&moved, Some(&state)).unwrap();
    assert_eq!(plan.removed, GENERATED);
    assert!(plan.requires_replacement.is_empty());

    let updated = harness.reconciler.update(&moved, &state).await.unwrap().value;

    let remote: Vec<String> = harness.remote().files("main").paths().map(str::to_string).collect();
    assert_eq!(
        remote,
        vec![
            "custom-path/flux-system/gotk-components.yaml",
            "custom-path/flux-system/gotk-sync.yaml",
            "custom-path/flux-system/kustomization.yaml",
        ]
    );
    assert_eq!(harness.remote().files("main"), updated.repository_files);
    let sync = harness.cluster().object(&sync_ref("flux-system", "flux-system")).unwrap();
    assert_eq!(sync.str_field(&["spec", "path"]), Some("./custom-path"));
}

#[tokio::test]
async fn test_delete_keeps_namespace_when_asked() {
    let harness = TestHarness::new();
    let config = ConfigurationBuilder::new().keep_namespace(true).build();
    let state = harness.create(&config).await;

    let outcome = harness.reconciler.delete(&config, &state).await;

    assert!(outcome.is_clean(), "{:?}", outcome.error);
    assert!(harness.cluster().contains(&namespace_ref("flux-system")));
    assert!(!harness.cluster().contains(&sync_ref("flux-system", "flux-system")));
    assert_eq!(harness.remote().files("main"), state.repository_files);
}

#[tokio::test]
async fn test_unhealthy_installation_is_rewritten_on_next_update() {
    let harness = TestHarness::new();
    let config = ConfigurationBuilder::new().build();
    let state = harness.create(&config).await;
    harness.cluster().set_condition(
        &sync_ref("flux-system", "flux-system"),
        Condition::new("Ready", ConditionStatus::False, "kustomization path not found"),
    );

    let refreshed = harness.reconciler.refresh(&config, &state).await.unwrap();
    assert_eq!(refreshed.diagnostics.len(), 1);
    let refreshed = refreshed.value.unwrap();
    let drifted = refreshed.repository_files.get("flux-system/gotk-sync.yaml").unwrap().to_string();
    assert!(drifted.is_empty());

    harness.cluster().clear_conditions();
    harness.remote().clear_calls();
    let updated = harness.reconciler.update(&config, &refreshed).await.unwrap().value;

    assert_ne!(updated.repository_files.get("flux-system/gotk-sync.yaml"), Some(drifted.as_str()));
    assert_eq!(updated.repository_files, state.repository_files);
    assert_eq!(harness.remote().push_count(), 1);
    assert!(harness
        .remote()
        .calls()
        .iter()
        .any(|c| matches!(c, GitCall::Commit { allow_empty: true, .. })));
}

#[tokio::test]
async fn test_update_applies_rotated_password() {
    let harness = TestHarness::new();
    let config = ConfigurationBuilder::new().http_password("old-token").build();
    let state = harness.create(&config).await;
    let rotated = ConfigurationBuilder::new().http_password("new-token").build();

    let updated = harness.reconciler.update(&rotated, &state).await.unwrap().value;

    let secret = harness.cluster().object(&secret_ref(&rotated)).unwrap();
    assert_eq!(secret.str_field(&["stringData", "password"]), Some("new-token"));
    assert_eq!(updated.repository_files, state.repository_files);
    assert!(updated.settings.credentials.http.is_none());
}

#[tokio::test]
async fn test_teardown_runs_in_order_despite_failures() {
    let harness = TestHarness::new();
    let config = ConfigurationBuilder::new().build();
    let state = harness.create(&config).await;
    harness.cluster().fail_deletes_of("Deployment", "forbidden");
    harness.cluster().clear_calls();

    let outcome = harness.reconciler.delete(&config, &state).await;
    assert!(matches!(outcome.error, Some(BootstrapError::Teardown { .. })));
    assert!(outcome.diagnostics.has_errors());

    let calls = harness.cluster().calls();
    let position = |pred: &dyn Fn(&ClusterCall) -> bool| calls.iter().position(pred).unwrap();
    let last = |pred: &dyn Fn(&ClusterCall) -> bool| calls.iter().rposition(pred).unwrap();
    let deletes = |kind: &'static str| move |c: &ClusterCall| matches!(c, ClusterCall::Delete(r) if r.kind == kind);
    let finalizers = |c: &ClusterCall| matches!(c, ClusterCall::RemoveFinalizers(_));

    assert!(last(&deletes("Deployment")) < position(&finalizers));
    assert!(last(&finalizers) < position(&deletes("CustomResourceDefinition")));
    assert!(last(&deletes("CustomResourceDefinition")) < position(&deletes("Namespace")));
}

#[tokio::test]
async fn test_unchanged_configuration_skips_push() {
    let harness = TestHarness::new();
    let config = ConfigurationBuilder::new().build();
    harness.create(&config).await;
    harness.remote().clear_calls();

    assert_eq!(harness.scheduler(&config).tick().await.unwrap(), TickReport::InSync);
    assert_eq!(harness.remote().push_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_pushes_are_retried() {
    let harness = TestHarness::new();
    let config = ConfigurationBuilder::new().build();
    let state = harness.create(&config).await;
    let mut changed = config.clone();
    changed.log_level = "debug".to_string();
    harness.remote().clear_calls();
    harness
        .remote()
        .fail_pushes([PushFailure::Rejected, PushFailure::Network]);

    let updated = harness.reconciler.update(&changed, &state).await.unwrap().value;

    assert_eq!(harness.remote().push_count(), 3);
    assert_eq!(harness.remote().files("main"), updated.repository_files);
    assert_eq!(updated.settings.log_level, "debug");
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_the_operation_timeout() {
    let harness = TestHarness::new();
    let config = ConfigurationBuilder::new().timeout("10s").build();
    let state = harness.create(&config).await;
    let mut changed = config.clone();
    changed.log_level = "debug".to_string();
    harness.remote().fail_pushes([PushFailure::Network; 5]);

    let err = harness.reconciler.update(&changed, &state).await.unwrap_err();
    match err {
        BootstrapError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.remote().files("main"), state.repository_files);
}

#[tokio::test]
async fn test_authentication_failure_is_not_retried() {
    let harness = TestHarness::new();
    let config = ConfigurationBuilder::new().build();
    let state = harness.create(&config).await;
    let mut changed = config.clone();
    changed.log_level = "error".to_string();
    harness.remote().clear_calls();
    harness.remote().fail_pushes([PushFailure::AuthFailed]);

    let err = harness.reconciler.update(&changed, &state).await.unwrap_err();
    assert!(matches!(err, BootstrapError::GitAuthFailed(_)));
    assert_eq!(harness.remote().push_count(), 1);
}

#[tokio::test]
async fn test_removed_namespace_stops_tracking() {
    let harness = TestHarness::new();
    let config = ConfigurationBuilder::new().build();
    let state = harness.create(&config).await;
    let outcome = harness.reconciler.delete(&config, &state).await;
    assert!(outcome.is_clean());

    assert_eq!(harness.scheduler(&config).tick().await.unwrap(), TickReport::Missing);
    assert!(harness.saved_state().is_none());
    assert_eq!(harness.scheduler(&config).tick().await.unwrap(), TickReport::Untracked);
}

#[tokio::test]
async fn test_import_matches_created_state() {
    let harness = TestHarness::new();
    let config = ConfigurationBuilder::new()
        .namespace("flux")
        .components(&["source-controller", "kustomize-controller"])
        .build();
    let state = harness.create(&config).await;
    harness.remote().clear_calls();

    let imported = harness
        .reconciler
        .import("flux", &ConfigurationBuilder::new().build())
        .await
        .unwrap()
        .value;

    assert_eq!(imported.configuration.components, vec!["kustomize-controller", "source-controller"]);
    assert_eq!(imported.state.repository_files, state.repository_files);
    assert_eq!(imported.state.id, "flux");
    assert!(harness.remote().calls().is_empty());
}
