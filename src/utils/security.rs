//! Validation of the configured transcoder binary.
//!
//! The path comes from configuration, never from requests, but it still ends
//! up in an `exec`, so it is checked before every spawn.

use std::path::Path;

use tracing::debug;

use crate::errors::ExecutableError;

/// Check that `path` points at an existing executable file and contains
/// nothing that could smuggle extra shell semantics into the spawn.
pub fn validate_executable(path: &str) -> Result<(), ExecutableError> {
    debug!("Validating executable path: {}", path);

    if path.contains("..") {
        return Err(ExecutableError::Traversal);
    }

    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/' | '\\'))
    {
        return Err(ExecutableError::InvalidCharacters);
    }

    let meta = match std::fs::metadata(Path::new(path)) {
        Ok(meta) => meta,
        Err(_) => return Err(ExecutableError::NotFound(path.to_string())),
    };

    if meta.is_dir() {
        return Err(ExecutableError::NotExecutable(format!(
            "{path}: is a directory"
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(ExecutableError::NotExecutable(format!(
                "{path}: no execute permission"
            )));
        }
    }

    Ok(())
}
