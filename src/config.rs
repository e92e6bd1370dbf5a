use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub caselink: CaselinkConfig,
}

/// Caselink-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaselinkConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory holding the numbered .sql migration files.
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in CASELINK_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional; ignore errors
        let _ = dotenv::dotenv();

        let config_path = std::env::var("CASELINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str).context("Failed to parse config.toml")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.caselink.log_level.as_str()) {
            anyhow::bail!(
                "caselink.log_level must be one of {:?}, got '{}'",
                LOG_LEVELS,
                self.caselink.log_level
            );
        }

        if self.caselink.db_path.as_os_str().is_empty() {
            anyhow::bail!("caselink.db_path must not be empty");
        }

        if let Some(parent) = self.caselink.db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                anyhow::bail!(
                    "Parent directory of caselink.db_path does not exist: {}",
                    parent.display()
                );
            }
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.caselink.db_path
    }

    /// Get migrations directory
    pub fn migrations_dir(&self) -> &Path {
        &self.caselink.migrations_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn create_test_config(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("caselink.db");
        let db_path_str = db_path.to_str().unwrap().replace('\\', "\\\\");
        format!(
            r#"
[caselink]
db_path = "{}"
log_level = "debug"
"#,
            db_path_str
        )
    }

    fn with_config_env(config_path: &std::path::Path, f: impl FnOnce()) {
        let original = std::env::var("CASELINK_CONFIG").ok();
        std::env::set_var("CASELINK_CONFIG", config_path.to_str().unwrap());
        f();
        std::env::remove_var("CASELINK_CONFIG");
        if let Some(val) = original {
            std::env::set_var("CASELINK_CONFIG", val);
        }
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, create_test_config(&temp_dir)).unwrap();
        with_config_env(&config_path, || {
            let config = Config::load();
            assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
            let config = config.unwrap();
            assert_eq!(config.caselink.log_level, "debug");
            assert_eq!(config.migrations_dir(), Path::new("migrations"));
        });
    }

    #[test]
    fn test_config_rejects_bad_log_level() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("caselink.db");
        let content = format!(
            "[caselink]\ndb_path = \"{}\"\nlog_level = \"loud\"\n",
            db_path.to_str().unwrap().replace('\\', "\\\\")
        );
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, content).unwrap();
        with_config_env(&config_path, || {
            let config = Config::load();
            assert!(config.is_err());
            assert!(config.unwrap_err().to_string().contains("log_level"));
        });
    }

    #[test]
    fn test_config_rejects_missing_db_parent() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("no-such-dir").join("caselink.db");
        let content = format!(
            "[caselink]\ndb_path = \"{}\"\n",
            db_path.to_str().unwrap().replace('\\', "\\\\")
        );
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, content).unwrap();
        with_config_env(&config_path, || {
            let config = Config::load();
            assert!(config.is_err());
        });
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        with_config_env(Path::new("nonexistent.toml"), || {
            let config = Config::load();
            assert!(config.is_err());
        });
    }
}
