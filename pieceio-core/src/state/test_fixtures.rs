//! Test fixtures for persisted state.

use crate::config::PieceIoConfig;

/// Creates a configuration whose state file lives in a fresh temp directory.
///
/// The directory is removed when the returned guard is dropped.
///
/// # Panics
///
/// Panics if the temporary directory cannot be created. This is acceptable in
/// test fixtures where failures indicate environment issues.
pub fn create_temp_config() -> (tempfile::TempDir, PieceIoConfig) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = PieceIoConfig::for_testing(temp_dir.path());
    (temp_dir, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_config_points_into_temp_dir() {
        let (temp_dir, config) = create_temp_config();

        assert!(config.state.path.starts_with(temp_dir.path()));
        assert!(!config.state.path.exists());
    }
}
