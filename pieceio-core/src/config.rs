//! Centralized configuration for PieceIO.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::{Path, PathBuf};

/// Central configuration for all PieceIO components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct PieceIoConfig {
    pub state: StateConfig,
    pub service: ServiceConfig,
}

/// Persistence of the caller priority maps.
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// File holding every torrent's priority map
    pub path: PathBuf,
    /// Suffix of the scratch file written before the atomic rename
    pub temp_file_suffix: &'static str,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("pieceio-state.json"),
            temp_file_suffix: ".tmp",
        }
    }
}

impl StateConfig {
    /// Path of the scratch file next to the state file.
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(self.temp_file_suffix);
        PathBuf::from(name)
    }
}

/// Service actor channel sizing.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bounded capacity of the command channel
    pub command_buffer: usize,
    /// Events retained for slow subscribers before they start lagging
    pub event_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            command_buffer: 100,
            event_capacity: 256,
        }
    }
}

impl PieceIoConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("PIECEIO_STATE_PATH") {
            if !path.is_empty() {
                config.state.path = PathBuf::from(path);
            }
        }

        if let Ok(buffer) = std::env::var("PIECEIO_COMMAND_BUFFER") {
            if let Ok(size) = buffer.parse::<usize>() {
                config.service.command_buffer = size.max(1);
            }
        }

        if let Ok(capacity) = std::env::var("PIECEIO_EVENT_CAPACITY") {
            if let Ok(size) = capacity.parse::<usize>() {
                config.service.event_capacity = size.max(1);
            }
        }

        config
    }

    /// Creates a configuration with its state file inside `dir`.
    pub fn for_testing(dir: &Path) -> Self {
        Self {
            state: StateConfig {
                path: dir.join("pieceio-state.json"),
                ..Default::default()
            },
            service: ServiceConfig {
                command_buffer: 16,
                event_capacity: 64,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = PieceIoConfig::default();

        assert_eq!(config.state.path, PathBuf::from("pieceio-state.json"));
        assert_eq!(config.state.temp_file_suffix, ".tmp");
        assert_eq!(config.service.command_buffer, 100);
        assert_eq!(config.service.event_capacity, 256);
    }

    #[test]
    fn test_temp_path_appends_suffix() {
        let state = StateConfig {
            path: PathBuf::from("/var/lib/pieceio/state.json"),
            ..Default::default()
        };
        assert_eq!(
            state.temp_path(),
            PathBuf::from("/var/lib/pieceio/state.json.tmp")
        );
    }

    #[test]
    fn test_testing_config_uses_directory() {
        let config = PieceIoConfig::for_testing(Path::new("/tmp/pieceio-test"));
        assert_eq!(
            config.state.path,
            PathBuf::from("/tmp/pieceio-test/pieceio-state.json")
        );
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("PIECEIO_STATE_PATH", "/srv/pieceio/state.json");
            std::env::set_var("PIECEIO_COMMAND_BUFFER", "8");
            std::env::set_var("PIECEIO_EVENT_CAPACITY", "0");
        }

        let config = PieceIoConfig::from_env();

        assert_eq!(config.state.path, PathBuf::from("/srv/pieceio/state.json"));
        assert_eq!(config.service.command_buffer, 8);
        assert_eq!(config.service.event_capacity, 1);

        // Cleanup
        unsafe {
            std::env::remove_var("PIECEIO_STATE_PATH");
            std::env::remove_var("PIECEIO_COMMAND_BUFFER");
            std::env::remove_var("PIECEIO_EVENT_CAPACITY");
        }
    }
}
