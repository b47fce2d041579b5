use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_PORT: u16 = 6702;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Prepends a trace directive to every remote script.
    pub debug: bool,
    /// Interpreter used to run generated commands.
    pub shell: String,
    pub notify_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let database_url = crate::paths::data_dir()
            .map(|dir| format!("sqlite:{}", dir.join("deployer.db").display()))
            .unwrap_or_else(|_| "sqlite:deployer.db".to_string());
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            debug: false,
            shell: "bash".to_string(),
            notify_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = Self::from_conf_file()? {
            config.apply_file(file_config);
        }

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse().unwrap_or(DEFAULT_PORT);
        }

        if let Ok(debug) = std::env::var("DEPLOYER_DEBUG") {
            config.debug = matches!(debug.trim(), "1" | "true" | "yes");
        }

        if let Ok(shell) = std::env::var("DEPLOYER_SHELL") {
            config.shell = shell;
        }

        if let Ok(url) = std::env::var("DEPLOYER_NOTIFY_URL") {
            config.notify_url = Some(url).filter(|url| !url.trim().is_empty());
        }

        config.normalize_database_url()?;
        config.validate()?;
        Ok(config)
    }

    fn from_conf_file() -> Result<Option<FileConfig>> {
        let path = crate::paths::conf_dir()?.join("config.json");
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file_config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(Some(file_config))
    }

    fn apply_file(&mut self, file_config: FileConfig) {
        if let Some(database_url) = file_config.database_url {
            self.database_url = database_url;
        }
        if let Some(host) = file_config.host {
            self.host = host;
        }
        if let Some(port) = file_config.port {
            self.port = port;
        }
        if let Some(debug) = file_config.debug {
            self.debug = debug;
        }
        if let Some(shell) = file_config.shell {
            self.shell = shell;
        }
        if let Some(notify_url) = file_config.notify_url {
            self.notify_url = Some(notify_url);
        }
    }

    fn normalize_database_url(&mut self) -> Result<()> {
        let Some(path_str) = self.database_url.strip_prefix("sqlite:") else {
            return Ok(());
        };

        let path = Path::new(path_str);
        if path.is_absolute() {
            return Ok(());
        }

        if path
            .components()
            .any(|component| matches!(component, std::path::Component::ParentDir))
        {
            anyhow::bail!("SQLite database path cannot contain '..'");
        }

        let root = crate::paths::install_root()?;
        let absolute = root.join(path);
        self.database_url = format!("sqlite:{}", absolute.display());
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.shell.trim().is_empty() {
            anyhow::bail!("shell in config cannot be empty");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    database_url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    debug: Option<bool>,
    shell: Option<String>,
    notify_url: Option<String>,
}
