use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.json";
const ENV_CONFIG: &str = "RVC_GATEWAY_CONFIG";
const ENV_BIND: &str = "RVC_GATEWAY_BIND";
const ENV_PORT: &str = "RVC_GATEWAY_PORT";
const ENV_WEIGHTS_DIR: &str = "RVC_GATEWAY_WEIGHTS_DIR";
const ENV_DATASET_DIR: &str = "RVC_GATEWAY_DATASET_DIR";
const ENV_TOOL: &str = "RVC_GATEWAY_TOOL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySettings {
    pub bind: String,
    pub port: u16,
    pub weights_dir: PathBuf,
    pub dataset_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub weights_suffix: String,
    pub dataset_suffix: String,
    pub lock_policy: LockPolicy,
    pub tool: ToolSettings,
    pub drive: DriveSettings,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8000,
            weights_dir: PathBuf::from("/app/data/RVC_CLI/logs/weights"),
            dataset_dir: PathBuf::from("/app/data/RVC_CLI/datasets"),
            staging_dir: PathBuf::from("/app/data"),
            weights_suffix: ".pth".into(),
            dataset_suffix: ".wav".into(),
            lock_policy: LockPolicy::Wait,
            tool: ToolSettings::default(),
            drive: DriveSettings::default(),
        }
    }
}

/// What a request does when another request holds the same storage directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LockPolicy {
    Wait,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolSettings {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub max_capture_bytes: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            program: "python".into(),
            args: vec!["rvc.py".into()],
            working_dir: None,
            timeout_secs: 60 * 60,
            max_capture_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ToolSettings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DriveSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            base_url: "https://drive.google.com/uc".into(),
            timeout_secs: 600,
            attempts: 1,
            backoff_ms: 500,
        }
    }
}

impl DriveSettings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl GatewaySettings {
    /// Reads the config file (if any) and applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut settings = match resolve_config_path()? {
            Some(path) => load_settings(&path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address {:?}", self.bind))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(bind) = std::env::var(ENV_BIND) {
            self.bind = bind;
        }
        if let Ok(port) = std::env::var(ENV_PORT) {
            self.port = port
                .parse()
                .with_context(|| format!("{ENV_PORT} is not a port number: {port:?}"))?;
        }
        if let Ok(dir) = std::env::var(ENV_WEIGHTS_DIR) {
            self.weights_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var(ENV_DATASET_DIR) {
            self.dataset_dir = PathBuf::from(dir);
        }
        if let Ok(tool) = std::env::var(ENV_TOOL) {
            let mut parts = tool.split_whitespace().map(str::to_string);
            if let Some(program) = parts.next() {
                self.tool.program = program;
                self.tool.args = parts.collect();
            }
        }
        Ok(())
    }
}

fn resolve_config_path() -> Result<Option<PathBuf>> {
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        return Ok(Some(PathBuf::from(path)));
    }
    let Some(project_dirs) = ProjectDirs::from("com", "VoiceJobGateway", "VoiceJobGateway") else {
        return Ok(None);
    };
    let path = project_dirs.config_dir().join(CONFIG_FILE);
    Ok(path.exists().then_some(path))
}

pub fn load_settings(path: &Path) -> Result<GatewaySettings> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {path:?}"))?;
    serde_json::from_slice(&bytes).context("config json could not be parsed")
}
