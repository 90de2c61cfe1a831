use crate::domain::{
    config::LinkConfig,
    error::{LinkError, LinkResult},
};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "tcplink";
const PROJECT_DIR: &str = ".tcplink";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
///
/// Layers a project file over the user's global file over built-in defaults.
/// Keys missing from a layer fall through to the one below it.
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> LinkResult<Self> {
        let global_config_path = Self::default_global_config_path()?;
        let project_config_path = Self::find_project_config_path();

        Ok(Self {
            global_config_path,
            project_config_path,
        })
    }

    /// Manager over explicit files, bypassing discovery.
    pub fn with_paths(global: impl Into<PathBuf>, project: Option<PathBuf>) -> Self {
        Self {
            global_config_path: global.into(),
            project_config_path: project,
        }
    }

    /// Load the layered configuration and validate it.
    pub fn load_config(&self) -> LinkResult<LinkConfig> {
        let mut merged = toml::Table::new();

        if self.global_config_path.exists() {
            merge_tables(&mut merged, read_table(&self.global_config_path)?);
        }

        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                merge_tables(&mut merged, read_table(project_path)?);
            }
        }

        let config: LinkConfig =
            toml::Value::Table(merged)
                .try_into()
                .map_err(|e: toml::de::Error| LinkError::Config {
                    message: format!("Invalid configuration: {}", e),
                })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from specific path, without layering.
    pub fn load_config_from_path(&self, path: &Path) -> LinkResult<LinkConfig> {
        let content = fs::read_to_string(path).map_err(|e| LinkError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        let config: LinkConfig = toml::from_str(&content).map_err(|e| LinkError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the global file
    pub fn save_config(&self, config: &LinkConfig) -> LinkResult<()> {
        self.save_config_to_path(&self.global_config_path, config)
    }

    /// Save configuration to specific path, creating parent directories
    pub fn save_config_to_path(&self, path: &Path, config: &LinkConfig) -> LinkResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| LinkError::Config {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| LinkError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| LinkError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Create default project configuration under `path/.tcplink/`.
    pub fn init_project_config(&self, path: &Path) -> LinkResult<PathBuf> {
        let config_file = path.join(PROJECT_DIR).join(CONFIG_FILE);

        if config_file.exists() {
            return Err(LinkError::Config {
                message: "Project configuration already exists".to_string(),
            });
        }

        self.save_config_to_path(&config_file, &LinkConfig::default())?;
        Ok(config_file)
    }

    /// Get the current project config path (if any)
    pub fn project_config_path(&self) -> Option<&Path> {
        self.project_config_path.as_deref()
    }

    /// Get the global config path
    pub fn global_config_path(&self) -> &Path {
        &self.global_config_path
    }

    fn default_global_config_path() -> LinkResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| LinkError::Config {
            message: "Could not determine home directory".to_string(),
        })?;

        Ok(home.join(".config").join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    fn find_project_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        find_project_config_from(&current_dir)
    }
}

fn find_project_config_from(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_DIR).join(CONFIG_FILE))
        .find(|candidate| candidate.exists())
}

fn read_table(path: &Path) -> LinkResult<toml::Table> {
    let content = fs::read_to_string(path).map_err(|e| LinkError::Config {
        message: format!("Failed to read config file {}: {}", path.display(), e),
    })?;

    content.parse::<toml::Table>().map_err(|e| LinkError::Config {
        message: format!("Failed to parse config file {}: {}", path.display(), e),
    })
}

/// Overlay `overlay` onto `base`, descending into nested tables.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let incoming = match value {
            toml::Value::Table(incoming) => incoming,
            value => {
                base.insert(key, value);
                continue;
            }
        };
        if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
            continue;
        }
        base.insert(key, toml::Value::Table(incoming));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_config_manager_creation() {
        let _manager = ConfigManager::new().unwrap();
    }

    #[test]
    fn test_load_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("missing.toml"), None);
        let config = manager.load_config().unwrap();

        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.global.buffer_size, 1024);
        assert_eq!(config.server.backlog, 128);
    }

    #[test]
    fn test_project_overrides_global_per_key() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global.toml");
        let project = temp_dir.path().join("project.toml");
        write(
            &global,
            "[global]\nbuffer_size = 4096\nlog_level = \"debug\"\n\n[client]\nport = 7000\n",
        );
        write(&project, "[global]\nbuffer_size = 512\n");

        let manager = ConfigManager::with_paths(global, Some(project));
        let config = manager.load_config().unwrap();

        assert_eq!(config.global.buffer_size, 512);
        assert_eq!(config.global.log_level, "debug");
        assert_eq!(config.client.port, 7000);
        assert_eq!(config.client.host, "127.0.0.1");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global.toml");
        write(&global, "[global]\nbuffer_size = 0\n");

        let manager = ConfigManager::with_paths(global, None);
        assert!(matches!(
            manager.load_config(),
            Err(LinkError::Config { .. })
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("nested").join("config.toml");
        let manager = ConfigManager::with_paths(&global, None);

        let mut config = LinkConfig::default();
        config.server.port = 4242;
        manager.save_config(&config).unwrap();

        let loaded = manager.load_config_from_path(&global).unwrap();
        assert_eq!(loaded.server.port, 4242);
    }

    #[test]
    fn test_init_project_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("global.toml"), None);

        let created = manager.init_project_config(temp_dir.path()).unwrap();
        assert_eq!(created, temp_dir.path().join(".tcplink").join("config.toml"));

        let content = fs::read_to_string(&created).unwrap();
        let config: LinkConfig = toml::from_str(&content).unwrap();
        assert_eq!(config.global.buffer_size, 1024);

        assert!(manager.init_project_config(temp_dir.path()).is_err());
    }

    #[test]
    fn test_project_discovery_walks_up() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join(".tcplink").join("config.toml");
        write(&config_file, "");
        let nested = temp_dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_config_from(&nested), Some(config_file));
    }
}
