// Configuration management for spotify-snapshot
// One small TOML file: where the snapshot repo lives, where it pushes, how often it runs

use crate::error::{Result, SnapshotError};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::info;

const CONFIG_FILE_NAME: &str = "spotify-snapshot.toml";
const DEFAULT_INTERVAL_HOURS: u32 = 8;
const TEST_REPO_DIR_NAME: &str = "SPOTIFY-VERSION-SNAPSHOTS-TEST-REPO";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Remote the snapshot repo is cloned from and pushed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_remote_url: Option<String>,
    /// Kept unexpanded so `$HOME` style paths survive a save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<String>,
    #[serde(default = "default_interval")]
    pub backup_interval_hours: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<String>,
}

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_HOURS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            git_remote_url: None,
            backup_dir: Some(default_backup_dir()),
            backup_interval_hours: DEFAULT_INTERVAL_HOURS,
            ssh_key_path: None,
        }
    }
}

impl Config {
    /// Loads the config, creating it (interactively when possible) if missing.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::create_initial()?;
            config.save_to(&config_path)?;
            info!("Config file created at {}", config_path.display());
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SnapshotError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let dir = config_dir().ok_or_else(|| SnapshotError::Config {
            path: PathBuf::from(CONFIG_FILE_NAME),
            reason: "could not determine the user config directory".to_string(),
        })?;

        Ok(dir.join(CONFIG_FILE_NAME))
    }

    /// Asks for each setting; falls back to defaults when nobody is at the terminal (cron).
    fn create_initial() -> Result<Self> {
        let defaults = Config::default();
        if !std::io::stdin().is_terminal() {
            info!("No config file found and no terminal attached, writing defaults");
            return Ok(defaults);
        }

        println!("No config file found. Let's create one!\n");

        let remote = inquire::Text::new("Git remote URL (optional, press Enter to skip):")
            .prompt()?;
        let backup_dir =
            inquire::Text::new("Backup directory (environment variables like $HOME are fine):")
                .with_default(&default_backup_dir())
                .prompt()?;
        let interval = inquire::CustomType::<u32>::new("Backup interval in hours:")
            .with_default(DEFAULT_INTERVAL_HOURS)
            .prompt()?;

        let remote = remote.trim();
        Ok(Self {
            git_remote_url: (!remote.is_empty()).then(|| remote.to_string()),
            backup_dir: Some(backup_dir),
            backup_interval_hours: interval.max(1),
            ssh_key_path: None,
        })
    }

    /// Where this run writes its snapshot repo.
    pub fn target_dir(&self, prod_run: bool) -> Result<PathBuf> {
        if !prod_run {
            return Ok(std::env::temp_dir().join(TEST_REPO_DIR_NAME));
        }

        let raw = self.backup_dir.clone().unwrap_or_else(default_backup_dir);
        expand_path(&raw)
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.git_remote_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Candidate private keys for pushing, most specific first.
    pub fn ssh_key_candidates(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.ssh_key_path {
            return expand_path(path).into_iter().collect();
        }

        let ssh_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("~"))
            .join(".ssh");
        vec![ssh_dir.join("id_ed25519"), ssh_dir.join("id_rsa")]
    }
}

fn default_backup_dir() -> String {
    if std::env::var_os("XDG_DATA_HOME").is_some() {
        "$XDG_DATA_HOME/spotify-snapshots".to_string()
    } else {
        "$HOME/.local/share/spotify-snapshots".to_string()
    }
}

fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).map_err(|e| SnapshotError::Config {
        path: PathBuf::from(raw),
        reason: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Opens the config file in the user's editor, creating it first if needed.
pub fn edit_config() -> Result<()> {
    let config_path = Config::config_path()?;
    if !config_path.exists() {
        Config::load()?;
    }

    let editor = std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .unwrap_or_else(|_| "vi".to_string());

    let status = std::process::Command::new(&editor)
        .arg(&config_path)
        .status()?;
    if !status.success() {
        return Err(SnapshotError::Config {
            path: config_path,
            reason: format!("{} exited with {}", editor, status),
        });
    }

    // Catch typos before the next cron run does
    Config::load_from(&config_path)?;
    Ok(())
}
