use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cadence_core::CoreConfig;
use toml::Table;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<CoreConfig> {
        Self::load_from(&[Self::user_config_path(), Self::project_config_path()])
    }

    /// Merge the given files in order; later files override earlier ones
    pub fn load_from(paths: &[PathBuf]) -> Result<CoreConfig> {
        let mut merged = Table::new();
        for path in paths {
            if let Some(layer) = Self::read_layer(path)? {
                Self::merge(&mut merged, layer);
            }
        }

        let config: CoreConfig = toml::Value::Table(merged)
            .try_into()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Get user config path
    pub fn user_config_path() -> PathBuf {
        cadence_paths::config_file()
    }

    /// Get project config path
    /// Can be overridden with CADENCE_PROJECT_CONFIG_DIR env var
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("CADENCE_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join(cadence_paths::CONFIG_FILE)
        } else {
            PathBuf::from(".cadence").join(cadence_paths::CONFIG_FILE)
        }
    }

    fn read_layer(path: &Path) -> Result<Option<Table>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let table = contents
            .parse::<Table>()
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(table))
    }

    /// Deep merge: nested tables merge key by key, everything else is replaced
    fn merge(base: &mut Table, overlay: Table) {
        for (key, value) in overlay {
            match (base.get_mut(&key), value) {
                (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                    Self::merge(existing, nested);
                }
                (_, value) => {
                    base.insert(key, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_files_yield_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigLoader::load_from(&[dir.path().join("nope.toml")]).unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn project_layer_overrides_user_layer_per_key() {
        let dir = TempDir::new().unwrap();
        let user = write(
            &dir,
            "user.toml",
            "[velocity]\nmin_samples = 8\ndefault_window_days = 30\n",
        );
        let project = write(&dir, "project.toml", "[velocity]\nmin_samples = 3\n");

        let config = ConfigLoader::load_from(&[user, project]).unwrap();
        assert_eq!(config.velocity.min_samples, 3);
        assert_eq!(config.velocity.default_window_days, 30);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.toml", "[cache]\nbroadcast_capacity = 0\n");
        assert!(ConfigLoader::load_from(&[path]).is_err());
    }

    #[test]
    fn policy_overrides_load_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "policy.toml",
            "[actions.policy]\nstartSession = \"teacher\"\n",
        );
        let config = ConfigLoader::load_from(&[path]).unwrap();
        assert_eq!(
            config
                .actions
                .policy
                .get(&cadence_core::ActionType::StartSession),
            Some(&cadence_core::Role::Teacher)
        );
    }

    #[test]
    #[serial]
    fn project_dir_env_override() {
        unsafe {
            std::env::set_var("CADENCE_PROJECT_CONFIG_DIR", "/tmp/cadence-project");
        }
        assert_eq!(
            ConfigLoader::project_config_path(),
            PathBuf::from("/tmp/cadence-project/config.toml")
        );
        unsafe {
            std::env::remove_var("CADENCE_PROJECT_CONFIG_DIR");
        }
        assert_eq!(
            ConfigLoader::project_config_path(),
            PathBuf::from(".cadence/config.toml")
        );
    }
}
