#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::GwfleetError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub fleet: FleetConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    /// Parent directory for every managed worktree, one subdirectory
    /// per repository.
    #[serde(alias = "basedir")]
    pub base_dir: String,
    pub auto_mkdir: bool,
    /// Store document name, resolved under `base_dir`.
    pub state_file: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            base_dir: "~/worktrees".to_owned(),
            auto_mkdir: true,
            state_file: "fleet.json".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// How long a success indicator stays up before clearing itself.
    pub success_clear_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            success_clear_secs: 8,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), GwfleetError> {
        if self.fleet.base_dir.trim().is_empty() {
            return Err(GwfleetError::Config(
                "fleet.base_dir must not be empty".to_owned(),
            ));
        }
        let state_file = self.fleet.state_file.trim();
        if state_file.is_empty() {
            return Err(GwfleetError::Config(
                "fleet.state_file must not be empty".to_owned(),
            ));
        }
        if state_file.contains('/') || state_file.contains('\\') || state_file.contains("..") {
            return Err(GwfleetError::Config(
                "fleet.state_file must be a plain file name".to_owned(),
            ));
        }
        if self.fetch.success_clear_secs == 0 {
            return Err(GwfleetError::Config(
                "fetch.success_clear_secs must be >= 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// Absolute base directory for managed worktrees.
    pub fn worktree_base(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.fleet.base_dir)
    }

    /// Absolute path of the store document.
    pub fn state_path(&self) -> anyhow::Result<PathBuf> {
        Ok(self.worktree_base()?.join(self.fleet.state_file.trim()))
    }
}

impl FetchConfig {
    #[must_use]
    pub fn success_clear(&self) -> Duration {
        Duration::from_secs(self.success_clear_secs)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_file: PathBuf,
}

pub fn default_paths() -> anyhow::Result<ConfigPaths> {
    let unix = home_config_path_unix();
    if !cfg!(windows) {
        return Ok(ConfigPaths { config_file: unix });
    }

    // Windows: prefer the Unix-style path if present for portability.
    if unix.exists() {
        return Ok(ConfigPaths { config_file: unix });
    }

    let proj = ProjectDirs::from("com", "gwfleet", "gwfleet")
        .context("failed to determine platform config directory")?;
    Ok(ConfigPaths {
        config_file: proj.config_dir().join("config.toml"),
    })
}

fn home_config_path_unix() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".config").join("gwfleet").join("config.toml")
}

fn home_dir() -> Option<PathBuf> {
    if let Some(v) = std::env::var_os("HOME") {
        return Some(PathBuf::from(v));
    }
    if let Some(v) = std::env::var_os("USERPROFILE") {
        return Some(PathBuf::from(v));
    }
    let drive = std::env::var_os("HOMEDRIVE");
    let path = std::env::var_os("HOMEPATH");
    match (drive, path) {
        (Some(d), Some(p)) => Some(PathBuf::from(d).join(PathBuf::from(p))),
        _ => None,
    }
}

pub fn load() -> anyhow::Result<(Config, ConfigPaths)> {
    let paths = default_paths()?;
    let cfg = load_from_file(&paths.config_file)?;
    cfg.validate()?;
    Ok((cfg, paths))
}

pub fn load_from_file(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(cfg)
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest).to_string_lossy().to_string();
    }
    input.to_owned()
}

pub fn expand_path(input: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_env_vars(&expand_tilde(input));
    let p = PathBuf::from(expanded);
    if p.is_absolute() {
        return Ok(p);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(p))
}

fn expand_env_vars(input: &str) -> String {
    // Expand $VAR and ${VAR}. Leave unknown vars untouched.
    let re = regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")
        .unwrap_or_else(|_| regex::Regex::new("$^").unwrap());
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        std::env::var(key).unwrap_or_else(|_| caps[0].to_owned())
    })
    .to_string()
}
