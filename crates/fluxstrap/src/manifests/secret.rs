//! Credential Secret read by the source controller.

use std::collections::BTreeMap;

use secrecy::ExposeSecret;
use serde_json::{Map, Value};

use crate::cluster::{KubeObject, ObjectRef, INSTANCE_LABEL, PART_OF_LABEL, PART_OF_VALUE};
use crate::config::Configuration;
use crate::error::{BootstrapError, Result};
use crate::secrets::expand_home;

pub fn secret_ref(config: &Configuration) -> ObjectRef {
    ObjectRef::new("v1", "Secret", Some(&config.namespace), config.secret_name())
}

/// Builds the Secret the source object references, or `None` when secret
/// creation is disabled or no credentials are configured.
///
/// Secret material is resolved here and never written to the repository.
pub fn credential_secret(config: &Configuration) -> Result<Option<KubeObject>> {
    if config.disable_secret_creation {
        return Ok(None);
    }

    let mut data = Map::new();
    if let Some(http) = &config.credentials.http {
        data.insert("username".to_string(), Value::String(http.username.clone()));
        data.insert(
            "password".to_string(),
            Value::String(http.password.resolve()?.expose_secret().to_string()),
        );
        if let Some(ca) = &http.certificate_authority {
            let path = expand_home(ca);
            let pem = std::fs::read_to_string(&path)
                .map_err(|source| BootstrapError::ReadFile { path, source })?;
            data.insert("ca.crt".to_string(), Value::String(pem));
        }
    } else if let Some(ssh) = &config.credentials.ssh {
        data.insert(
            "identity".to_string(),
            Value::String(ssh.private_key.resolve()?.expose_secret().to_string()),
        );
        if let Some(password) = &ssh.password {
            if let Some(password) = password.resolve_optional()? {
                data.insert(
                    "password".to_string(),
                    Value::String(password.expose_secret().to_string()),
                );
            }
        }
        if let Some(known_hosts) = &ssh.known_hosts {
            data.insert("known_hosts".to_string(), Value::String(known_hosts.clone()));
        }
    } else {
        return Ok(None);
    }

    let labels = BTreeMap::from([
        (INSTANCE_LABEL.to_string(), config.namespace.clone()),
        (PART_OF_LABEL.to_string(), PART_OF_VALUE.to_string()),
    ]);

    Ok(Some(
        KubeObject::new("v1", "Secret", config.secret_name())
            .in_namespace(&config.namespace)
            .with_labels(&labels)
            .with("type", Value::String("Opaque".to_string()))
            .with("stringData", Value::Object(data)),
    ))
}
