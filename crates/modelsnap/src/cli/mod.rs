//! Command implementations and configuration resolution.
//!
//! Resolution order: built-in defaults, then the config file
//! (`--config` or `~/.modelsnap/config.toml`), then command-line flags.

use anyhow::{Context, Result};
use modelsnap_ingest::scan::expand_home;
use modelsnap_ingest::Config;
use std::path::{Path, PathBuf};

pub mod config;
pub mod upload;
pub mod watch;

/// Command-line values that win over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub watch_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub insecure: bool,
}

/// ~/.modelsnap/config.toml
pub fn default_config_path() -> PathBuf {
    modelsnap_logging::modelsnap_home().join("config.toml")
}

pub fn resolve_config(path: Option<&Path>, overrides: &Overrides) -> Result<Config> {
    let mut config = match path {
        // An explicit file must exist.
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => {
            let path = default_config_path();
            Config::load_or_default(&path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?
        }
    };

    apply_overrides(&mut config, overrides);
    config.watch_dir = expand_home(&config.watch_dir);
    config.work_dir = expand_home(&config.work_dir);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, overrides: &Overrides) {
    if let Some(dir) = &overrides.watch_dir {
        config.watch_dir = dir.clone();
    }
    if let Some(dir) = &overrides.work_dir {
        config.work_dir = dir.clone();
    }
    if let Some(endpoint) = &overrides.endpoint {
        config.upload.url = Some(endpoint.clone());
    }
    if overrides.insecure {
        config.upload.accept_invalid_certs = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn flags_override_file_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "watch_dir = \"/from/file\"\nbatch_size = 5\n[upload]\nhost = \"10.0.0.9:7026\"\n",
        )
        .unwrap();

        let overrides = Overrides {
            watch_dir: Some(PathBuf::from("/from/flag")),
            endpoint: Some("http://127.0.0.1:8080/in".to_string()),
            insecure: true,
            ..Default::default()
        };
        let config = resolve_config(Some(&path), &overrides).unwrap();

        assert_eq!(config.watch_dir, PathBuf::from("/from/flag"));
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.upload.endpoint_url(), "http://127.0.0.1:8080/in");
        assert!(config.upload.accept_invalid_certs);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(resolve_config(Some(&missing), &Overrides::default()).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "batch_size = 0\n").unwrap();
        let err = resolve_config(Some(&path), &Overrides::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("batch_size"));
    }
}
