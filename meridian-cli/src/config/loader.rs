use anyhow::{Context, Result};
use meridian_core::MeridianConfig;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user, then project, then `--config`)
    pub fn load(explicit: Option<&Path>) -> Result<MeridianConfig> {
        let mut layers = Vec::new();

        // Layer 1: User config
        if let Some(user_path) = Self::user_config_path()
            && user_path.exists()
        {
            layers.push(user_path);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            layers.push(project_path);
        }

        // Layer 3: Explicit file, which must exist
        if let Some(path) = explicit {
            layers.push(path.to_path_buf());
        }

        Self::load_layers(&layers)
    }

    /// Merge the given files in order, later keys winning, then validate once.
    pub fn load_layers(paths: &[PathBuf]) -> Result<MeridianConfig> {
        let mut merged = toml::Table::new();
        for path in paths {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let layer: toml::Table =
                toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))?;
            merge_tables(&mut merged, layer);
        }
        let text = toml::to_string(&merged)?;
        Ok(MeridianConfig::from_toml_str(&text)?)
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("meridian").join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with MERIDIAN_PROJECT_CONFIG_DIR env var
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("MERIDIAN_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".meridian/config.toml")
        }
    }
}

/// Deep merge: nested tables merge key by key, anything else is replaced.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(overlay_table) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => merge_tables(existing, overlay_table),
                _ => {
                    base.insert(key, toml::Value::Table(overlay_table));
                }
            },
            other => {
                base.insert(key, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_no_layers_is_default() {
        let config = ConfigLoader::load_layers(&[]).unwrap();
        assert_eq!(config, MeridianConfig::default());
    }

    #[test]
    fn test_later_layer_overrides_single_keys() {
        let dir = TempDir::new().unwrap();
        let user = write(
            &dir,
            "user.toml",
            "[allocator]\nexploration_floor = 0.1\ndecision_timeout_ms = 200\n\n[anomaly]\nz_threshold = 4.0\n",
        );
        let project = write(&dir, "project.toml", "[allocator]\ndecision_timeout_ms = 500\n");

        let config = ConfigLoader::load_layers(&[user, project]).unwrap();
        assert_eq!(config.allocator.decision_timeout_ms, 500);
        assert_eq!(config.allocator.exploration_floor, 0.1);
        assert_eq!(config.anomaly.z_threshold, 4.0);
    }

    #[test]
    fn test_merged_result_is_validated() {
        let dir = TempDir::new().unwrap();
        let bad = write(&dir, "bad.toml", "[allocator]\nexploration_floor = 2.0\n");
        let err = ConfigLoader::load_layers(&[bad]).unwrap_err();
        assert!(err.to_string().contains("exploration_floor"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(ConfigLoader::load_layers(&[missing]).is_err());
    }

    #[test]
    fn test_merge_tables_nested() {
        let mut base: toml::Table = toml::from_str("[limits.attribution]\nmax_run_seconds = 60\nmax_memory_mb = 512\n").unwrap();
        let overlay: toml::Table = toml::from_str("[limits.attribution]\nmax_memory_mb = 1024\n").unwrap();
        merge_tables(&mut base, overlay);
        let limits = &base["limits"]["attribution"];
        assert_eq!(limits["max_run_seconds"].as_integer(), Some(60));
        assert_eq!(limits["max_memory_mb"].as_integer(), Some(1024));
    }
}
