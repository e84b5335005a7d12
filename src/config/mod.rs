use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Notedesk";
const APP_NAME: &str = "notedesk";

pub const CONFIG_ENV: &str = "NOTEDESK_CONFIG";
pub const DATA_ENV: &str = "NOTEDESK_DATA";

const CONFIG_FILE_NAME: &str = "config.toml";
const MIB: u64 = 1024 * 1024;
const CONFIG_HEADER: &str = "# notedesk configuration. Sizes are in bytes.\n\n";

/// Resolves [`ConfigPaths`] and reads or bootstraps `config.toml`.
pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        ConfigPaths::discover().map(Self::with_paths)
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    /// Creates the data layout, then loads the config file, writing one with
    /// default values first if none exists.
    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if self.paths.config_file.exists() {
            return self.load();
        }
        let mut defaults = AppConfig::default();
        defaults.post_load();
        self.write_default_config(&defaults)?;
        tracing::info!(path = %self.paths.config_file.display(), "wrote default config");
        Ok(defaults)
    }

    pub fn load(&self) -> Result<AppConfig> {
        let path = &self.paths.config_file;
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.post_load();
        Ok(config)
    }

    fn write_default_config(&self, config: &AppConfig) -> Result<()> {
        let path = &self.paths.config_file;
        let body = toml::to_string_pretty(config).context("serializing default config")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(path, format!("{CONFIG_HEADER}{body}"))
            .with_context(|| format!("writing config {}", path.display()))
    }
}

/// Every on-disk location the application touches.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub notes_dir: PathBuf,
    pub folders_file: PathBuf,
    pub calendar_file: PathBuf,
    pub backup_dir: PathBuf,
}

impl ConfigPaths {
    /// Platform directories, overridden by `NOTEDESK_CONFIG` (a config file
    /// or a directory holding `config.toml`) and `NOTEDESK_DATA`.
    pub fn discover() -> Result<Self> {
        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving platform project directories")?;
        let data_root = env::var_os(DATA_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| project_dirs.data_dir().to_path_buf());

        let mut paths = Self::rooted_at(&data_root);
        match env::var_os(CONFIG_ENV).map(PathBuf::from) {
            Some(dir) if dir.is_dir() => {
                paths.config_file = dir.join(CONFIG_FILE_NAME);
                paths.config_dir = dir;
            }
            Some(file) => {
                paths.config_dir = file
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                paths.config_file = file;
            }
            None => {
                paths.config_dir = project_dirs.config_dir().to_path_buf();
                paths.config_file = paths.config_dir.join(CONFIG_FILE_NAME);
            }
        }
        Ok(paths)
    }

    /// Lays out every path underneath a single root, config included.
    pub fn rooted_at(root: &Path) -> Self {
        let config_dir = root.join("config");
        Self {
            config_file: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
            data_dir: root.to_path_buf(),
            notes_dir: root.join("notes"),
            folders_file: root.join("folders.json"),
            calendar_file: root.join("calendar.json"),
            backup_dir: root.join("backups"),
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.notes_dir,
            &self.backup_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageOptions,
    pub import: ImportOptions,
}

impl AppConfig {
    fn post_load(&mut self) {
        let rate = self.storage.backup_sample_rate;
        if !(0.0..=1.0).contains(&rate) || rate.is_nan() {
            tracing::warn!(rate, "backup_sample_rate outside 0..=1, clamping");
            self.storage.backup_sample_rate = if rate.is_nan() {
                StorageOptions::default().backup_sample_rate
            } else {
                rate.clamp(0.0, 1.0)
            };
        }
        if self.storage.backup_retention == 0 {
            tracing::warn!("backup_retention of 0 would discard every snapshot, using 1");
            self.storage.backup_retention = 1;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Probability that a successful write also lands in the backup journal.
    pub backup_sample_rate: f64,
    /// Snapshots kept per backup category.
    pub backup_retention: usize,
    pub max_note_bytes: u64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            backup_sample_rate: 0.1,
            backup_retention: 10,
            max_note_bytes: 10 * MIB,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub max_file_bytes: u64,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            max_file_bytes: 5 * MIB,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_or_init_writes_defaults_on_first_run() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        let loader = ConfigLoader::with_paths(paths.clone());

        let cfg = loader.load_or_init()?;
        assert!(paths.config_file.exists());
        assert!(paths.notes_dir.is_dir());
        assert!(paths.backup_dir.is_dir());
        assert_eq!(cfg.storage.backup_retention, 10);
        assert_eq!(cfg.import.max_file_bytes, 5 * MIB);
        Ok(())
    }

    #[test]
    fn out_of_range_sample_rate_is_clamped() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            "[storage]\nbackup_sample_rate = 4.0\nbackup_retention = 0\n",
        )?;

        let cfg = ConfigLoader::with_paths(paths).load()?;
        assert_eq!(cfg.storage.backup_sample_rate, 1.0);
        assert_eq!(cfg.storage.backup_retention, 1);
        assert_eq!(cfg.storage.max_note_bytes, 10 * MIB);
        Ok(())
    }
}
