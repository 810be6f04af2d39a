//! Application configuration and environment overrides.
//!
//! The application config (`boost.toml`) tells the binary where the project
//! registry file and the model store live, how acquisition behaves, and how
//! the HTTP server binds. It is separate from the project registry itself,
//! which is managed by [`crate::projects`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable selecting the active project.
pub const ENV_PROJECT: &str = "BOOST_PROJECT";
/// Environment variable selecting the model name served at startup.
pub const ENV_MODEL_NAME: &str = "MODEL_NAME";
/// Environment variable selecting the model version served at startup.
pub const ENV_MODEL_VERSION: &str = "MODEL_VERSION";
/// GPU device selection; any value other than empty or `-1` requests a GPU.
pub const ENV_GPU_DEVICES: &str = "CUDA_VISIBLE_DEVICES";
/// CPU thread count used for prediction.
pub const ENV_THREADS: &str = "OMP_NUM_THREADS";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub acquire: AcquireConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("config/projects.toml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("models")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AcquireConfig {
    /// Directory for downloaded archives. A temporary directory is used when unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Line width used when rendering markup to text.
    #[serde(default = "default_text_width")]
    pub text_width: usize,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            user_agent: default_user_agent(),
            text_width: default_text_width(),
        }
    }
}

fn default_user_agent() -> String {
    concat!("boost-harness/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_text_width() -> usize {
    120
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    #[default]
    InProcess,
    Subprocess,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrainingConfig {
    #[serde(default = "default_num_rounds")]
    pub num_rounds: usize,
    #[serde(default)]
    pub executor: ExecutorKind,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_rounds: default_num_rounds(),
            executor: ExecutorKind::default(),
        }
    }
}

fn default_num_rounds() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Configuration used when no config file exists.
    pub fn minimal() -> Self {
        Self {
            registry: RegistryConfig::default(),
            store: StoreConfig::default(),
            acquire: AcquireConfig::default(),
            training: TrainingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.training.num_rounds == 0 {
        anyhow::bail!("training.num_rounds must be > 0");
    }

    if config.acquire.text_width < 20 {
        anyhow::bail!("acquire.text_width must be >= 20");
    }

    if config.server.timeout_secs == 0 {
        anyhow::bail!("server.timeout_secs must be > 0");
    }

    Ok(config)
}

/// Loads the config at `path`, or the minimal config when the file is missing.
/// A file that exists but is invalid is still an error.
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

/// Snapshot of the environment variables the service consumes.
///
/// Read once at startup and passed explicitly so tests can build their own.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub project: Option<String>,
    pub model_name: Option<String>,
    pub model_version: Option<String>,
    pub gpu_devices: Option<String>,
    pub threads: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            project: read(ENV_PROJECT),
            model_name: read(ENV_MODEL_NAME),
            model_version: read(ENV_MODEL_VERSION),
            gpu_devices: std::env::var(ENV_GPU_DEVICES).ok(),
            threads: read(ENV_THREADS),
        }
    }
}
