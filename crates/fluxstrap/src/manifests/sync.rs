//! Source and sync objects pointing the controllers back at the repository.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::cluster::{KubeObject, ObjectRef, INSTANCE_LABEL, PART_OF_LABEL, PART_OF_VALUE};
use crate::config::{format_duration, SyncOptions};

pub const SOURCE_API_VERSION: &str = "source.toolkit.fluxcd.io/v1";
pub const SOURCE_KIND: &str = "GitRepository";
pub const SYNC_API_VERSION: &str = "kustomize.toolkit.fluxcd.io/v1";
pub const SYNC_KIND: &str = "Kustomization";

/// Interval the sync object re-applies the repository path.
pub const SYNC_INTERVAL: &str = "10m0s";

pub fn source_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::new(SOURCE_API_VERSION, SOURCE_KIND, Some(namespace), name)
}

pub fn sync_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::new(SYNC_API_VERSION, SYNC_KIND, Some(namespace), name)
}

/// The source object followed by the sync object.
pub fn objects(options: &SyncOptions) -> Vec<KubeObject> {
    let labels = BTreeMap::from([
        (INSTANCE_LABEL.to_string(), options.namespace.clone()),
        (PART_OF_LABEL.to_string(), PART_OF_VALUE.to_string()),
    ]);

    let mut source_spec = json!({
        "interval": format_duration(options.interval),
        "ref": {"branch": options.branch},
        "secretRef": {"name": options.secret_name},
        "url": options.url,
    });
    if options.recurse_submodules {
        if let Value::Object(spec) = &mut source_spec {
            spec.insert("recurseSubmodules".to_string(), Value::Bool(true));
        }
    }

    let path = if options.base_path.is_empty() {
        "./".to_string()
    } else {
        format!("./{}", options.base_path)
    };

    vec![
        KubeObject::new(SOURCE_API_VERSION, SOURCE_KIND, &options.name)
            .in_namespace(&options.namespace)
            .with_labels(&labels)
            .with("spec", source_spec),
        KubeObject::new(SYNC_API_VERSION, SYNC_KIND, &options.name)
            .in_namespace(&options.namespace)
            .with_labels(&labels)
            .with(
                "spec",
                json!({
                    "interval": SYNC_INTERVAL,
                    "path": path,
                    "prune": true,
                    "sourceRef": {"kind": SOURCE_KIND, "name": options.name},
                }),
            ),
    ]
}
