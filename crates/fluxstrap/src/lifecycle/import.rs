//! Reconstructs a configuration from a live installation.

use serde_json::Value;

use crate::cluster::{ClusterClient, KubeObject, ObjectRef, VERSION_LABEL};
use crate::config::schema::{EXTRA_COMPONENTS, TOOLKIT_COMPONENTS};
use crate::config::{format_duration, parse_duration, Configuration, DEFAULT_AUTHOR};
use crate::error::{BootstrapError, Result};
use crate::manifests::install::{MANAGER_CONTAINER, WEBHOOKS_POLICY};
use crate::manifests::sync::{source_ref, sync_ref};

const DOCKER_HUB: &str = "index.docker.io";

/// Reads the installation in `namespace` back into a configuration derived from `base`.
pub async fn read_configuration<C: ClusterClient + ?Sized>(
    cluster: &C,
    namespace: &str,
    base: &Configuration,
) -> Result<Configuration> {
    let mut config = base.clone();
    config.namespace = namespace.to_string();
    config.commit.author_name = DEFAULT_AUTHOR.to_string();

    let policy = ObjectRef::new("networking.k8s.io/v1", "NetworkPolicy", Some(namespace), WEBHOOKS_POLICY);
    config.network_policy = cluster.get(&policy).await?.is_some();

    let kustomize = required(cluster, &deployment_ref(namespace, "kustomize-controller")).await?;
    read_controller(&kustomize, &mut config)?;

    let source = required(cluster, &source_ref(namespace, namespace)).await?;
    read_source(&source, &mut config)?;

    let sync = required(cluster, &sync_ref(namespace, namespace)).await?;
    config.repository.path = sync
        .str_field(&["spec", "path"])
        .unwrap_or_default()
        .trim_start_matches("./")
        .trim_matches('/')
        .to_string();

    config.components = present(cluster, namespace, TOOLKIT_COMPONENTS).await?;
    config.components_extra = present(cluster, namespace, EXTRA_COMPONENTS).await?;

    tracing::debug!(
        namespace,
        version = %config.version,
        components = ?config.components,
        "read installation"
    );
    Ok(config)
}

fn deployment_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::new("apps/v1", "Deployment", Some(namespace), name)
}

async fn required<C: ClusterClient + ?Sized>(cluster: &C, object: &ObjectRef) -> Result<KubeObject> {
    cluster
        .get(object)
        .await?
        .ok_or_else(|| BootstrapError::ImportRefused(format!("{} not found", object)))
}

async fn present<C: ClusterClient + ?Sized>(
    cluster: &C,
    namespace: &str,
    candidates: &[&str],
) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for component in candidates {
        if cluster.get(&deployment_ref(namespace, component)).await?.is_some() {
            found.push(component.to_string());
        }
    }
    Ok(found)
}

fn refused(object: &KubeObject, message: impl std::fmt::Display) -> BootstrapError {
    BootstrapError::ImportRefused(format!("{}: {}", object.object_ref(), message))
}

fn read_controller(deployment: &KubeObject, config: &mut Configuration) -> Result<()> {
    config.version = deployment
        .label(VERSION_LABEL)
        .ok_or_else(|| refused(deployment, "version label not found"))?
        .to_string();

    let pod = deployment
        .field(&["spec", "template", "spec"])
        .ok_or_else(|| refused(deployment, "pod template not found"))?;
    let container = pod
        .get("containers")
        .and_then(Value::as_array)
        .and_then(|containers| {
            containers
                .iter()
                .find(|c| c.get("name").and_then(Value::as_str) == Some(MANAGER_CONTAINER))
        })
        .ok_or_else(|| refused(deployment, format!("could not find container: {}", MANAGER_CONTAINER)))?;

    let image = container
        .get("image")
        .and_then(Value::as_str)
        .ok_or_else(|| refused(deployment, "manager container has no image"))?;
    config.registry = image_registry(image).map_err(|e| refused(deployment, e))?;

    config.toleration_keys = pod
        .get("tolerations")
        .and_then(Value::as_array)
        .map(|tolerations| {
            tolerations
                .iter()
                .filter_map(|t| t.get("key").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    config.image_pull_secret = pod
        .get("imagePullSecrets")
        .and_then(Value::as_array)
        .and_then(|secrets| secrets.first())
        .and_then(|secret| secret.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let args: Vec<String> = container
        .get("args")
        .and_then(Value::as_array)
        .map(|args| {
            args.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let watch_all = arg_value(&args, "--watch-all-namespaces")
        .map_err(|e| refused(deployment, e))?
        .ok_or_else(|| refused(deployment, "arg with name not found: --watch-all-namespaces"))?;
    config.watch_all_namespaces = watch_all
        .parse::<bool>()
        .map_err(|e| refused(deployment, format!("--watch-all-namespaces '{}': {}", watch_all, e)))?;

    config.log_level = arg_value(&args, "--log-level")
        .map_err(|e| refused(deployment, e))?
        .ok_or_else(|| refused(deployment, "arg with name not found: --log-level"))?;

    match arg_value(&args, "--events-addr").map_err(|e| refused(deployment, e))? {
        Some(address) => {
            config.cluster_domain = cluster_domain(&address).map_err(|e| refused(deployment, e))?;
        }
        None => tracing::debug!("no events address, keeping cluster domain {}", config.cluster_domain),
    }
    Ok(())
}

fn read_source(source: &KubeObject, config: &mut Configuration) -> Result<()> {
    let field = |path: &[&str]| {
        source
            .str_field(path)
            .map(str::to_string)
            .ok_or_else(|| refused(source, format!("{} not set", path.join("."))))
    };

    config.repository.url = field(&["spec", "url"])?;
    config.repository.branch = field(&["spec", "ref", "branch"])?;

    let secret_name = field(&["spec", "secretRef", "name"])?;
    config.repository.secret_name = (secret_name != config.namespace).then_some(secret_name);

    let interval = field(&["spec", "interval"])?;
    let parsed = parse_duration(&interval).map_err(|e| refused(source, format!("interval '{}': {}", interval, e)))?;
    config.interval = format_duration(parsed);

    config.repository.recurse_submodules = source
        .field(&["spec", "recurseSubmodules"])
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(())
}

/// Value of `--name=value` or `--name value`. An empty value is an error.
pub fn arg_value(args: &[String], name: &str) -> std::result::Result<Option<String>, String> {
    let prefix = format!("{}=", name);
    for (index, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            if value.is_empty() {
                return Err(format!("unexpected empty argument value for {}", name));
            }
            return Ok(Some(value.to_string()));
        }
        if arg == name {
            return match args.get(index + 1) {
                Some(value) if !value.is_empty() && !value.starts_with("--") => Ok(Some(value.clone())),
                _ => Err(format!("unexpected empty argument value for {}", name)),
            };
        }
    }
    Ok(None)
}

/// Registry host plus the first repository segment of an image reference.
pub fn image_registry(image: &str) -> std::result::Result<String, String> {
    let name = image.split('@').next().unwrap_or_default();
    let name = match name.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') => repository,
        _ => name,
    };
    if name.is_empty() {
        return Err(format!("could not parse image reference '{}'", image));
    }

    let segments: Vec<&str> = name.split('/').collect();
    let has_host = segments.len() > 1
        && (segments[0].contains('.') || segments[0].contains(':') || segments[0] == "localhost");
    let (host, repository) = match has_host {
        true if segments[0] == "docker.io" => (DOCKER_HUB, &segments[1..]),
        true => (segments[0], &segments[1..]),
        false => (DOCKER_HUB, &segments[..]),
    };

    let first = match repository {
        [] => return Err(format!("could not parse image reference '{}'", image)),
        [only] if host == DOCKER_HUB && !only.is_empty() => "library",
        [first, ..] if !first.is_empty() => *first,
        _ => return Err(format!("could not parse image reference '{}'", image)),
    };
    Ok(format!("{}/{}", host, first))
}

/// Last two labels of the events address host.
pub fn cluster_domain(address: &str) -> std::result::Result<String, String> {
    let url = url::Url::parse(address)
        .map_err(|e| format!("could not parse events address '{}': {}", address, e))?;
    let host = url
        .host_str()
        .ok_or_else(|| format!("events address '{}' has no host", address))?
        .trim_end_matches('.');
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return Err(format!("events address '{}' has no cluster domain", address));
    }
    Ok(labels[labels.len() - 2..].join("."))
}
