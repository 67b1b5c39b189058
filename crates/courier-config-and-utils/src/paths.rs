//! File system paths for the broker.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Runtime file locations, rooted at `~/.courier` by default.
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Paths under `~/.courier`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;
        Ok(Self {
            base_dir: home.join(".courier"),
        })
    }

    /// Paths under a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// `<base>/config.json`
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// `<base>/courier.sock`
    pub fn socket_file(&self) -> PathBuf {
        self.base_dir.join("courier.sock")
    }

    /// `<base>/courier.pid`
    pub fn pid_file(&self) -> PathBuf {
        self.base_dir.join("courier.pid")
    }

    /// `<base>/logs`
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// `<base>/logs/courier.jsonl`
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("courier.jsonl")
    }

    /// Create the base and logs directories.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-courier");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.base_dir(), &base);
        assert_eq!(paths.config_file(), base.join("config.json"));
        assert_eq!(paths.socket_file(), base.join("courier.sock"));
        assert_eq!(paths.pid_file(), base.join("courier.pid"));
        assert_eq!(paths.logs_dir(), base.join("logs"));
        assert_eq!(paths.log_file(), base.join("logs/courier.jsonl"));
    }

    #[test]
    fn test_paths_new_uses_dot_courier() {
        if let Ok(paths) = Paths::new() {
            assert!(paths.base_dir().ends_with(".courier"));
        }
    }

    #[test]
    fn test_ensure_dirs_idempotent() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("courier"));

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.logs_dir().is_dir());
    }
}
