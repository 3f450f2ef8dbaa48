use std::path::PathBuf;

/// Resolve an executable name to an absolute path via `PATH`.
///
/// Returns `None` when the binary is not installed.
pub fn resolve_executable_path(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_common_binary() {
        // `sh` exists on every unix CI image this runs on.
        #[cfg(unix)]
        assert!(resolve_executable_path("sh").is_some());
    }

    #[test]
    fn test_missing_binary() {
        assert!(resolve_executable_path("definitely-not-a-real-binary-xyz").is_none());
    }
}
