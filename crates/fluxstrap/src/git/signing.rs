//! OpenPGP commit signing through a private gpg home.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use secrecy::{ExposeSecret, SecretString};
use tempfile::TempDir;
use tokio::process::Command as TokioCommand;

use super::auth::{shell_escape, write_private};
use super::parse::{format_command_error, parse_secret_key_ids};
use crate::config::CommitSettings;
use crate::error::{BootstrapError, Result};

const KEY_ID_LEN: usize = 16;

/// Strips a `0x` prefix, checks the length and uppercases a long key id.
pub fn normalize_key_id(key_id: &str) -> std::result::Result<String, String> {
    let trimmed = key_id.trim();
    let id = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if id.len() != KEY_ID_LEN {
        return Err(format!(
            "invalid GPG key id length; expected {}, got {}",
            KEY_ID_LEN,
            id.len()
        ));
    }
    Ok(id.to_uppercase())
}

/// Armored key ring plus the selectors used to pick a signing key.
#[derive(Debug)]
pub struct SigningKey {
    pub key_ring: SecretString,
    pub passphrase: Option<SecretString>,
    pub key_id: Option<String>,
}

impl SigningKey {
    /// Resolves signing material from commit settings, if a key ring is configured.
    pub fn from_settings(settings: &CommitSettings) -> Result<Option<Self>> {
        let Some(key_ring) = &settings.gpg_key_ring else {
            return Ok(None);
        };
        let passphrase = match &settings.gpg_passphrase {
            Some(source) => source.resolve_optional()?,
            None => None,
        };
        let key_id = settings
            .gpg_key_id
            .as_deref()
            .map(normalize_key_id)
            .transpose()
            .map_err(BootstrapError::Signing)?;

        Ok(Some(Self {
            key_ring: key_ring.resolve()?,
            passphrase,
            key_id,
        }))
    }
}

/// An imported key ready to sign commits. The gpg home is removed on drop.
#[derive(Debug)]
pub struct CommitSigner {
    home: TempDir,
    key_id: String,
    wrapper: PathBuf,
}

impl CommitSigner {
    /// Imports the key ring into a fresh gpg home and selects the signing key.
    pub async fn prepare(key: &SigningKey, gpg: &str) -> Result<Self> {
        if key.key_ring.expose_secret().trim().is_empty() {
            return Err(BootstrapError::Signing("empty GPG key ring".to_string()));
        }

        let home = tempfile::Builder::new()
            .prefix(".fluxstrap-gnupg-")
            .tempdir()
            .map_err(|source| BootstrapError::WriteFile {
                path: std::env::temp_dir(),
                source,
            })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(home.path(), std::fs::Permissions::from_mode(0o700)).map_err(
                |source| BootstrapError::WriteFile {
                    path: home.path().to_path_buf(),
                    source,
                },
            )?;
        }

        let ring_path = home.path().join("keyring.asc");
        write_private(&ring_path, key.key_ring.expose_secret(), 0o600)?;
        let ring_arg = ring_path.display().to_string();
        run_gpg(gpg, home.path(), &["--import", &ring_arg]).await?;

        let listing = run_gpg(gpg, home.path(), &["--list-secret-keys", "--with-colons"]).await?;
        let available = parse_secret_key_ids(&listing);
        let key_id = select_key(&available, key.key_id.as_deref())?;
        log::debug!("Signing commits with GPG key {}", key_id);

        let mut passphrase_args = String::new();
        if let Some(passphrase) = &key.passphrase {
            let passphrase_path = home.path().join("passphrase");
            write_private(&passphrase_path, passphrase.expose_secret(), 0o600)?;
            passphrase_args = format!(
                " --pinentry-mode loopback --passphrase-file '{}'",
                shell_escape(&passphrase_path.display().to_string())
            );
        }

        let wrapper = home.path().join("gpg-wrapper.sh");
        let script = format!(
            "#!/bin/sh\nexec '{}' --homedir '{}' --batch{} \"$@\"\n",
            shell_escape(gpg),
            shell_escape(&home.path().display().to_string()),
            passphrase_args
        );
        write_private(&wrapper, &script, 0o700)?;

        Ok(Self { home, key_id, wrapper })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    /// `key=value` settings passed to git with `-c`.
    pub fn git_config(&self) -> Vec<String> {
        vec![
            format!("gpg.program={}", self.wrapper.display()),
            format!("user.signingkey={}", self.key_id),
            "commit.gpgsign=true".to_string(),
        ]
    }
}

fn select_key(available: &[String], wanted: Option<&str>) -> Result<String> {
    match wanted {
        None => available
            .first()
            .cloned()
            .ok_or_else(|| BootstrapError::Signing("keyring does not contain private key".to_string())),
        Some(wanted) => available
            .iter()
            .find(|id| id.eq_ignore_ascii_case(wanted))
            .cloned()
            .ok_or_else(|| {
                BootstrapError::Signing(format!("no GPG keyring matching key id '{}' found", wanted))
            }),
    }
}

async fn run_gpg(gpg: &str, home: &Path, args: &[&str]) -> Result<String> {
    let output = TokioCommand::new(gpg)
        .arg("--homedir")
        .arg(home)
        .arg("--batch")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| BootstrapError::Signing(format!("failed to run {}: {}", gpg, e)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(BootstrapError::Signing(format_command_error(&output)))
    }
}
