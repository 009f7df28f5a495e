use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = ".gatorconfig.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// sqlx connection string for the SQLite database
    #[serde(default = "default_db_url")]
    pub db_url: String,
    /// Name of the user commands run as, set by `register` and `login`
    #[serde(default)]
    pub current_user_name: Option<String>,
}

fn default_db_url() -> String {
    "sqlite:gator.db?mode=rwc".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_url: default_db_url(),
            current_user_name: None,
        }
    }
}

/// `~/.gatorconfig.json`
pub fn default_path() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| anyhow::anyhow!("HOME environment variable not set"))?;
    Ok(PathBuf::from(home).join(CONFIG_FILE_NAME))
}

impl Config {
    /// Reads the config file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Self::from_str(&content)
    }

    /// Parse config from a JSON string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sets the current user and writes the whole config back to `path`.
    pub fn set_user<P: AsRef<Path>>(&mut self, username: &str, path: P) -> anyhow::Result<()> {
        self.current_user_name = Some(username.to_string());
        self.save(path)
    }
}
