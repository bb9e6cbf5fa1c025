//! The kustomization file listing the generated manifests.

use serde::Deserialize;

use super::{INSTALL_FILE, SYNC_FILE};

#[derive(Deserialize)]
struct KustomizationResources {
    #[serde(default)]
    resources: Vec<String>,
}

pub fn default_kustomization() -> String {
    format!(
        "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources:\n- {}\n- {}\n",
        INSTALL_FILE, SYNC_FILE
    )
}

/// Checks that an override still lists both generated manifests.
pub fn check_override(content: &str) -> Result<(), String> {
    let parsed: KustomizationResources = serde_yaml::from_str(content)
        .map_err(|e| format!("Kustomization override is not valid YAML: {}", e))?;

    let missing: Vec<&str> = [INSTALL_FILE, SYNC_FILE]
        .into_iter()
        .filter(|file| !parsed.resources.iter().any(|r| r.trim_start_matches("./") == *file))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Kustomization resource must contain: {}",
            missing.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_passes_its_own_check() {
        assert!(check_override(&default_kustomization()).is_ok());
    }

    #[test]
    fn test_missing_resources() {
        let content = "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources:\n- gotk-components.yaml\n";
        assert_eq!(
            check_override(content).unwrap_err(),
            "Kustomization resource must contain: gotk-sync.yaml"
        );
        assert_eq!(
            check_override("kind: Kustomization\n").unwrap_err(),
            "Kustomization resource must contain: gotk-components.yaml, gotk-sync.yaml"
        );
    }

    #[test]
    fn test_relative_prefix_accepted() {
        let content = "resources:\n- ./gotk-components.yaml\n- ./gotk-sync.yaml\n- extra.yaml\n";
        assert!(check_override(content).is_ok());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(check_override("resources: [unterminated")
            .unwrap_err()
            .contains("not valid YAML"));
    }
}
