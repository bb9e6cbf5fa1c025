use std::path::Path;

use super::schema::Configuration;
use super::validation::ConfigValidator;
use crate::error::{BootstrapError, Result};

/// Reads, normalizes and validates a YAML configuration file.
pub fn load_configuration<P: AsRef<Path>>(path: P) -> Result<Configuration> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| BootstrapError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_configuration_from_str(&content).map_err(|e| match e {
        BootstrapError::ParseYaml { message, .. } => BootstrapError::ParseYaml {
            path: path.display().to_string(),
            message,
        },
        other => other,
    })
}

pub fn load_configuration_from_str(content: &str) -> Result<Configuration> {
    let config: Configuration = serde_yaml::from_str(content)?;
    prepare_configuration(config)
}

/// Normalizes and validates a configuration built in code.
pub fn prepare_configuration(mut config: Configuration) -> Result<Configuration> {
    config.normalize();
    ConfigValidator::new().validate(&config)?;
    Ok(config)
}
