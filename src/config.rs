use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::capture::CaptureOptions;
use crate::error::ConfigError;
use crate::mirror::{MirrorOptions, DEFAULT_MAX_FRAME_LEN};

const DEFAULT_CONFIG_PATH: &str = "/etc/netmirror.conf";
const DEFAULT_LOG_FILTER: &str = "info";

const KEYS: [&str; 5] = [
    "listen",
    "wait_timeout_ms",
    "max_frame_len",
    "restore_promiscuous",
    "log_filter",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Standalone listener address. `None` means inetd mode.
    pub listen: Option<SocketAddr>,
    pub wait_timeout: Option<Duration>,
    pub max_frame_len: usize,
    pub restore_promiscuous: bool,
    /// Used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: None,
            wait_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            restore_promiscuous: false,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AgentConfig {
    /// Load from `NETMIRROR_CONFIG` (or `/etc/netmirror.conf`), then apply
    /// `NETMIRROR_*` environment overrides. A missing file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("NETMIRROR_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Like [`AgentConfig::load`] with an explicit file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            config.apply_file(&content)?;
        }

        // Allow environment variable overrides
        for key in KEYS {
            let var = format!("NETMIRROR_{}", key.to_uppercase());
            if let Ok(value) = std::env::var(&var) {
                config.set(key, &value)?;
            }
        }

        Ok(config)
    }

    fn apply_file(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.set(key.trim(), value.trim())?;
            }
        }
        Ok(())
    }

    /// Set one key. Unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "listen" => {
                self.listen = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(|_| invalid())?)
                };
            }
            "wait_timeout_ms" => {
                let ms: u64 = value.parse().map_err(|_| invalid())?;
                // 0 keeps the indefinite wait
                self.wait_timeout = (ms > 0).then(|| Duration::from_millis(ms));
            }
            "max_frame_len" => {
                let len: usize = value.parse().map_err(|_| invalid())?;
                if len == 0 {
                    return Err(invalid());
                }
                self.max_frame_len = len;
            }
            "restore_promiscuous" => {
                self.restore_promiscuous = parse_bool(value).ok_or_else(invalid)?;
            }
            "log_filter" => self.log_filter = value.to_string(),
            _ => {}
        }
        Ok(())
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            restore_promiscuous: self.restore_promiscuous,
        }
    }

    /// Mirror engine settings; the shutdown signal is installed by the caller.
    pub fn mirror_options(&self) -> MirrorOptions {
        MirrorOptions {
            wait_timeout: self.wait_timeout,
            max_frame_len: self.max_frame_len,
            shutdown: None,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
