//! Path utilities and XDG directory discovery

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// XDG-compliant paths for systest
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    /// Create a new Paths instance with XDG discovery
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("rs", "systest", "systest"),
        }
    }

    /// Get user config directory (~/.config/systest/)
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("Failed to determine user config directory".to_string())
            })
    }

    /// Get user cache directory (~/.cache/systest/), where release builds may be kept
    pub fn user_cache_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.cache_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("Failed to determine user cache directory".to_string())
            })
    }

    /// Get user config file path (~/.config/systest/config.toml)
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Get project config file path (systest.toml)
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("systest.toml")
    }

    /// Get local config file path (systest.local.toml, gitignored)
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("systest.local.toml")
    }

    /// Build root for a release kept in the user cache
    pub fn release_cache_dir(&self, version: &str) -> Result<PathBuf, ConfigError> {
        Ok(self.user_cache_dir()?.join("releases").join(version))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_xdg_paths() {
        let paths = Paths::new();

        // Platform dependent; only check the application name when present
        if let Ok(config_dir) = paths.user_config_dir() {
            assert!(config_dir.to_string_lossy().contains("systest"));
        }

        if let Ok(release_dir) = paths.release_cache_dir("v1.0.2") {
            assert!(release_dir.ends_with("releases/v1.0.2"));
        }
    }

    #[test]
    fn test_project_paths() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        assert_eq!(
            Paths::project_config_file(project_dir),
            project_dir.join("systest.toml")
        );
        assert_eq!(
            Paths::local_config_file(project_dir),
            project_dir.join("systest.local.toml")
        );
    }
}
