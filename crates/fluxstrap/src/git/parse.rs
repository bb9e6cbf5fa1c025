//! Command output parsing helpers.

use std::process::Output;

/// Formats a failed command's output with both stderr and stdout.
pub fn format_command_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// True if `git status --porcelain` output lists no changes.
pub fn is_clean_status(porcelain: &str) -> bool {
    porcelain.lines().all(|line| line.trim().is_empty())
}

/// Whether a `clone --branch` failure means the branch or history is missing
/// rather than the remote being unusable.
pub fn is_missing_branch(message: &str) -> bool {
    let lower = message.to_lowercase();
    (lower.contains("remote branch") && lower.contains("not found"))
        || lower.contains("empty repository")
}

/// Whether a `git show HEAD:<path>` failure means the path is not committed.
pub fn is_missing_path(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("does not exist in")
        || lower.contains("exists on disk, but not in")
        || lower.contains("invalid object name")
        || lower.contains("bad revision")
        || lower.contains("unknown revision")
}

/// Long key ids of the secret keys (and subkeys) in `gpg --with-colons` output.
pub fn parse_secret_key_ids(colons: &str) -> Vec<String> {
    colons
        .lines()
        .filter(|line| line.starts_with("sec:") || line.starts_with("ssb:"))
        .filter_map(|line| line.split(':').nth(4))
        .filter(|id| !id.is_empty())
        .map(str::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        use std::os::unix::process::ExitStatusExt;
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_format_command_error() {
        assert_eq!(format_command_error(&output(1, "", "")), "Command failed with exit code 1");
        assert_eq!(format_command_error(&output(1, "out", "")), "out");
        assert_eq!(format_command_error(&output(1, "out", "err\n")), "err\nout");
    }

    #[test]
    fn test_is_clean_status() {
        assert!(is_clean_status(""));
        assert!(is_clean_status("\n"));
        assert!(!is_clean_status(" M flux-system/gotk-sync.yaml\n"));
        assert!(!is_clean_status("?? flux-system/kustomization.yaml\n"));
    }

    #[test]
    fn test_missing_branch_detection() {
        assert!(is_missing_branch(
            "warning: Could not find remote branch main to clone.\nfatal: Remote branch main not found in upstream origin"
        ));
        assert!(is_missing_branch("warning: You appear to have cloned an empty repository."));
        assert!(!is_missing_branch("fatal: repository 'https://example.com/x' not found"));
    }

    #[test]
    fn test_missing_path_detection() {
        assert!(is_missing_path("fatal: path 'a/b.yaml' does not exist in 'HEAD'"));
        assert!(is_missing_path("fatal: invalid object name 'HEAD'."));
        assert!(!is_missing_path("fatal: not a git repository"));
    }

    #[test]
    fn test_parse_secret_key_ids() {
        let colons = "\
sec:u:255:22:3AA5C34371567BD2:1650000000:::u:::scESC:::+:::23::0:
fpr:::::::::9F1C3AA5C34371567BD2A1B2C3D4E5F6A7B8C9D0:
uid:u::::1650000000::ABCDEF::Flux <flux@example.com>::::::::::0:
ssb:u:255:18:42B317FD4BA89E7A:1650000000::::::e:::+:::cv25519::
";
        assert_eq!(
            parse_secret_key_ids(colons),
            vec!["3AA5C34371567BD2", "42B317FD4BA89E7A"]
        );
        assert!(parse_secret_key_ids("").is_empty());
    }
}
