//! Objects that make up the controller installation.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::cluster::{KubeObject, INSTANCE_LABEL, PART_OF_LABEL, PART_OF_VALUE, VERSION_LABEL};
use crate::config::InstallOptions;

/// A custom resource kind served by a toolkit controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolkitApi {
    pub component: &'static str,
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl ToolkitApi {
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }

    pub fn crd_name(&self) -> String {
        format!("{}.{}", self.plural, self.group)
    }
}

pub const TOOLKIT_APIS: &[ToolkitApi] = &[
    ToolkitApi { component: "source-controller", group: "source.toolkit.fluxcd.io", version: "v1", kind: "GitRepository", plural: "gitrepositories" },
    ToolkitApi { component: "source-controller", group: "source.toolkit.fluxcd.io", version: "v1", kind: "HelmRepository", plural: "helmrepositories" },
    ToolkitApi { component: "source-controller", group: "source.toolkit.fluxcd.io", version: "v1", kind: "HelmChart", plural: "helmcharts" },
    ToolkitApi { component: "source-controller", group: "source.toolkit.fluxcd.io", version: "v1beta2", kind: "Bucket", plural: "buckets" },
    ToolkitApi { component: "source-controller", group: "source.toolkit.fluxcd.io", version: "v1beta2", kind: "OCIRepository", plural: "ocirepositories" },
    ToolkitApi { component: "kustomize-controller", group: "kustomize.toolkit.fluxcd.io", version: "v1", kind: "Kustomization", plural: "kustomizations" },
    ToolkitApi { component: "helm-controller", group: "helm.toolkit.fluxcd.io", version: "v2beta1", kind: "HelmRelease", plural: "helmreleases" },
    ToolkitApi { component: "notification-controller", group: "notification.toolkit.fluxcd.io", version: "v1beta2", kind: "Alert", plural: "alerts" },
    ToolkitApi { component: "notification-controller", group: "notification.toolkit.fluxcd.io", version: "v1beta2", kind: "Provider", plural: "providers" },
    ToolkitApi { component: "notification-controller", group: "notification.toolkit.fluxcd.io", version: "v1", kind: "Receiver", plural: "receivers" },
    ToolkitApi { component: "image-reflector-controller", group: "image.toolkit.fluxcd.io", version: "v1beta2", kind: "ImageRepository", plural: "imagerepositories" },
    ToolkitApi { component: "image-reflector-controller", group: "image.toolkit.fluxcd.io", version: "v1beta2", kind: "ImagePolicy", plural: "imagepolicies" },
    ToolkitApi { component: "image-automation-controller", group: "image.toolkit.fluxcd.io", version: "v1beta1", kind: "ImageUpdateAutomation", plural: "imageupdateautomations" },
];

pub const WEBHOOKS_POLICY: &str = "allow-webhooks";
pub const MANAGER_CONTAINER: &str = "manager";

/// Objects of the install manifest, in apply order.
pub fn objects(options: &InstallOptions) -> Vec<KubeObject> {
    let labels = common_labels(options);
    let has = |component: &str| options.components.iter().any(|c| c == component);

    let mut objects = vec![namespace(options, &labels)];

    for component in &options.components {
        for api in TOOLKIT_APIS.iter().filter(|api| api.component == component.as_str()) {
            objects.push(crd(api, &labels));
        }
    }

    for component in &options.components {
        objects.push(
            KubeObject::new("v1", "ServiceAccount", component)
                .in_namespace(&options.namespace)
                .with_labels(&labels)
                .with_label("app.kubernetes.io/component", component),
        );
    }

    objects.extend(rbac(options, &labels));

    if has("source-controller") {
        objects.push(service(options, &labels, "source-controller", "source-controller", 9090));
    }
    if has("notification-controller") {
        objects.push(service(options, &labels, "notification-controller", "notification-controller", 9090));
        objects.push(service(options, &labels, "webhook-receiver", "notification-controller", 9292));
    }

    for component in &options.components {
        objects.push(deployment(options, &labels, component));
    }

    if options.network_policy {
        objects.extend(network_policies(options, &labels));
    }

    objects
}

fn common_labels(options: &InstallOptions) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INSTANCE_LABEL.to_string(), options.namespace.clone()),
        (PART_OF_LABEL.to_string(), PART_OF_VALUE.to_string()),
        (VERSION_LABEL.to_string(), options.version.clone()),
    ])
}

fn namespace(options: &InstallOptions, labels: &BTreeMap<String, String>) -> KubeObject {
    KubeObject::new("v1", "Namespace", &options.namespace)
        .with_labels(labels)
        .with_label("pod-security.kubernetes.io/warn", "restricted")
        .with_label("pod-security.kubernetes.io/warn-version", "latest")
}

fn crd(api: &ToolkitApi, labels: &BTreeMap<String, String>) -> KubeObject {
    KubeObject::new("apiextensions.k8s.io/v1", "CustomResourceDefinition", &api.crd_name())
        .with_labels(labels)
        .with_label("app.kubernetes.io/component", api.component)
        .with(
            "spec",
            json!({
                "group": api.group,
                "names": {
                    "kind": api.kind,
                    "listKind": format!("{}List", api.kind),
                    "plural": api.plural,
                    "singular": api.kind.to_lowercase(),
                },
                "scope": "Namespaced",
                "versions": [{
                    "name": api.version,
                    "served": true,
                    "storage": true,
                    "schema": {
                        "openAPIV3Schema": {
                            "type": "object",
                            "x-kubernetes-preserve-unknown-fields": true,
                        }
                    },
                    "subresources": {"status": {}},
                }],
            }),
        )
}

fn rbac(options: &InstallOptions, labels: &BTreeMap<String, String>) -> Vec<KubeObject> {
    let ns = &options.namespace;
    let crd_controller = format!("crd-controller-{}", ns);
    let subjects = |components: &[&String]| -> Value {
        Value::Array(
            components
                .iter()
                .map(|c| json!({"kind": "ServiceAccount", "name": c, "namespace": ns}))
                .collect(),
        )
    };

    let all: Vec<&String> = options.components.iter().collect();
    let reconcilers: Vec<&String> = options
        .components
        .iter()
        .filter(|c| matches!(c.as_str(), "kustomize-controller" | "helm-controller"))
        .collect();

    let groups: Vec<&str> = {
        let mut groups: Vec<&str> = TOOLKIT_APIS
            .iter()
            .filter(|api| options.components.iter().any(|c| c == api.component))
            .map(|api| api.group)
            .collect();
        groups.dedup();
        groups
    };

    vec![
        KubeObject::new("rbac.authorization.k8s.io/v1", "ClusterRole", &crd_controller)
            .with_labels(labels)
            .with(
                "rules",
                json!([
                    {"apiGroups": groups, "resources": ["*"], "verbs": ["*"]},
                    {"apiGroups": [""], "resources": ["namespaces", "secrets", "configmaps", "serviceaccounts"], "verbs": ["get", "list", "watch"]},
                    {"apiGroups": [""], "resources": ["events"], "verbs": ["create", "patch"]},
                    {"apiGroups": ["coordination.k8s.io"], "resources": ["leases"], "verbs": ["get", "list", "watch", "create", "update", "patch", "delete"]},
                ]),
            ),
        KubeObject::new("rbac.authorization.k8s.io/v1", "ClusterRoleBinding", &crd_controller)
            .with_labels(labels)
            .with(
                "roleRef",
                json!({"apiGroup": "rbac.authorization.k8s.io", "kind": "ClusterRole", "name": crd_controller}),
            )
            .with("subjects", subjects(&all)),
        KubeObject::new(
            "rbac.authorization.k8s.io/v1",
            "ClusterRoleBinding",
            &format!("cluster-reconciler-{}", ns),
        )
        .with_labels(labels)
        .with(
            "roleRef",
            json!({"apiGroup": "rbac.authorization.k8s.io", "kind": "ClusterRole", "name": "cluster-admin"}),
        )
        .with("subjects", subjects(&reconcilers)),
    ]
}

fn service(
    options: &InstallOptions,
    labels: &BTreeMap<String, String>,
    name: &str,
    app: &str,
    target_port: u16,
) -> KubeObject {
    KubeObject::new("v1", "Service", name)
        .in_namespace(&options.namespace)
        .with_labels(labels)
        .with_label("control-plane", "controller")
        .with(
            "spec",
            json!({
                "type": "ClusterIP",
                "selector": {"app": app},
                "ports": [{"name": "http", "port": 80, "protocol": "TCP", "targetPort": target_port}],
            }),
        )
}

/// Container arguments for one controller.
pub fn controller_args(options: &InstallOptions, component: &str) -> Vec<String> {
    let mut args = Vec::new();
    if component != "notification-controller"
        && options.components.iter().any(|c| c == "notification-controller")
    {
        args.push(format!(
            "--events-addr=http://notification-controller.{}.svc.{}./",
            options.namespace, options.cluster_domain
        ));
    }
    args.push(format!("--watch-all-namespaces={}", options.watch_all_namespaces));
    args.push(format!("--log-level={}", options.log_level));
    args.push("--log-encoding=json".to_string());
    args.push("--enable-leader-election".to_string());
    if component == "source-controller" {
        args.push("--storage-path=/data".to_string());
        args.push(format!(
            "--storage-adv-addr=source-controller.$(RUNTIME_NAMESPACE).svc.{}.",
            options.cluster_domain
        ));
    }
    args
}

fn deployment(options: &InstallOptions, labels: &BTreeMap<String, String>, component: &str) -> KubeObject {
    let mut ports = vec![
        json!({"containerPort": 8080, "name": "http-prom", "protocol": "TCP"}),
        json!({"containerPort": 9440, "name": "healthz", "protocol": "TCP"}),
    ];
    match component {
        "source-controller" => ports.push(json!({"containerPort": 9090, "name": "http", "protocol": "TCP"})),
        "notification-controller" => {
            ports.push(json!({"containerPort": 9090, "name": "http", "protocol": "TCP"}));
            ports.push(json!({"containerPort": 9292, "name": "http-webhook", "protocol": "TCP"}));
        }
        _ => {}
    }

    let mut pod_spec = json!({
        "serviceAccountName": component,
        "terminationGracePeriodSeconds": 10,
        "priorityClassName": "system-cluster-critical",
        "nodeSelector": {"kubernetes.io/os": "linux"},
        "securityContext": {"fsGroup": 1337},
        "containers": [{
            "name": MANAGER_CONTAINER,
            "image": format!("{}/{}:{}", options.registry, component, options.version),
            "imagePullPolicy": "IfNotPresent",
            "args": controller_args(options, component),
            "env": [{
                "name": "RUNTIME_NAMESPACE",
                "valueFrom": {"fieldRef": {"fieldPath": "metadata.namespace"}},
            }],
            "ports": ports,
            "livenessProbe": {"httpGet": {"path": "/healthz", "port": "healthz"}},
            "readinessProbe": {"httpGet": {"path": "/readyz", "port": "healthz"}},
            "securityContext": {
                "allowPrivilegeEscalation": false,
                "capabilities": {"drop": ["ALL"]},
                "readOnlyRootFilesystem": true,
                "runAsNonRoot": true,
                "seccompProfile": {"type": "RuntimeDefault"},
            },
        }],
    });

    if let Value::Object(spec) = &mut pod_spec {
        if !options.toleration_keys.is_empty() {
            spec.insert(
                "tolerations".to_string(),
                Value::Array(
                    options
                        .toleration_keys
                        .iter()
                        .map(|key| json!({"key": key, "operator": "Exists"}))
                        .collect(),
                ),
            );
        }
        if let Some(secret) = &options.image_pull_secret {
            spec.insert("imagePullSecrets".to_string(), json!([{"name": secret}]));
        }
    }

    KubeObject::new("apps/v1", "Deployment", component)
        .in_namespace(&options.namespace)
        .with_labels(labels)
        .with_label("app.kubernetes.io/component", component)
        .with_label("control-plane", "controller")
        .with(
            "spec",
            json!({
                "replicas": 1,
                "selector": {"matchLabels": {"app": component}},
                "template": {
                    "metadata": {
                        "labels": {"app": component},
                        "annotations": {"prometheus.io/port": "8080", "prometheus.io/scrape": "true"},
                    },
                    "spec": pod_spec,
                },
            }),
        )
}

fn network_policies(options: &InstallOptions, labels: &BTreeMap<String, String>) -> Vec<KubeObject> {
    let policy = |name: &str, spec: Value| {
        KubeObject::new("networking.k8s.io/v1", "NetworkPolicy", name)
            .in_namespace(&options.namespace)
            .with_labels(labels)
            .with("spec", spec)
    };

    vec![
        policy(
            "allow-egress",
            json!({
                "podSelector": {},
                "ingress": [{"from": [{"podSelector": {}}]}],
                "egress": [{}],
                "policyTypes": ["Ingress", "Egress"],
            }),
        ),
        policy(
            "allow-scraping",
            json!({
                "podSelector": {},
                "ingress": [{"from": [{"namespaceSelector": {}}], "ports": [{"port": 8080, "protocol": "TCP"}]}],
                "policyTypes": ["Ingress"],
            }),
        ),
        policy(
            WEBHOOKS_POLICY,
            json!({
                "podSelector": {"matchLabels": {"app": "notification-controller"}},
                "ingress": [{"from": [{"namespaceSelector": {}}]}],
                "policyTypes": ["Ingress"],
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> InstallOptions {
        InstallOptions {
            base_path: String::new(),
            namespace: "flux-system".to_string(),
            version: "v2.1.2".to_string(),
            components: vec![
                "helm-controller".to_string(),
                "kustomize-controller".to_string(),
                "notification-controller".to_string(),
                "source-controller".to_string(),
            ],
            registry: "ghcr.io/fluxcd".to_string(),
            image_pull_secret: None,
            watch_all_namespaces: true,
            network_policy: true,
            log_level: "info".to_string(),
            cluster_domain: "cluster.local".to_string(),
            toleration_keys: Vec::new(),
        }
    }

    fn find<'a>(objects: &'a [KubeObject], kind: &str, name: &str) -> Option<&'a KubeObject> {
        objects.iter().find(|o| o.kind == kind && o.name() == name)
    }

    #[test]
    fn test_every_object_is_labelled() {
        for object in objects(&options()) {
            assert_eq!(object.label(PART_OF_LABEL), Some("flux"), "{}", object.object_ref());
            assert_eq!(object.label(VERSION_LABEL), Some("v2.1.2"));
        }
    }

    #[test]
    fn test_namespace_and_crds_come_first() {
        let objects = objects(&options());
        assert_eq!(objects[0].kind, "Namespace");
        let first_other = objects
            .iter()
            .skip(1)
            .position(|o| o.kind != "CustomResourceDefinition")
            .unwrap();
        assert!(objects[1..=first_other]
            .iter()
            .all(|o| o.kind == "CustomResourceDefinition"));
        assert!(find(&objects, "CustomResourceDefinition", "gitrepositories.source.toolkit.fluxcd.io").is_some());
        assert!(find(&objects, "CustomResourceDefinition", "imagepolicies.image.toolkit.fluxcd.io").is_none());
    }

    #[test]
    fn test_deployment_image_and_args() {
        let mut options = options();
        options.toleration_keys = vec!["arch".to_string()];
        options.image_pull_secret = Some("regcred".to_string());
        let objects = objects(&options);
        let deploy = find(&objects, "Deployment", "kustomize-controller").unwrap();
        let pod = deploy.field(&["spec", "template", "spec"]).unwrap();

        assert_eq!(
            pod["containers"][0]["image"],
            "ghcr.io/fluxcd/kustomize-controller:v2.1.2"
        );
        let args: Vec<&str> = pod["containers"][0]["args"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(args.contains(&"--events-addr=http://notification-controller.flux-system.svc.cluster.local./"));
        assert!(args.contains(&"--watch-all-namespaces=true"));
        assert!(args.contains(&"--log-level=info"));
        assert_eq!(pod["tolerations"][0]["key"], "arch");
        assert_eq!(pod["imagePullSecrets"][0]["name"], "regcred");
    }

    #[test]
    fn test_no_events_addr_without_notification_controller() {
        let mut options = options();
        options.components = vec!["kustomize-controller".to_string(), "source-controller".to_string()];
        let args = controller_args(&options, "kustomize-controller");
        assert!(!args.iter().any(|a| a.starts_with("--events-addr")));
        assert!(find(&objects(&options), "Service", "webhook-receiver").is_none());
    }

    #[test]
    fn test_network_policies_toggle() {
        let with = objects(&options());
        assert!(find(&with, "NetworkPolicy", WEBHOOKS_POLICY).is_some());

        let mut options = options();
        options.network_policy = false;
        assert!(!objects(&options).iter().any(|o| o.kind == "NetworkPolicy"));
    }
}
