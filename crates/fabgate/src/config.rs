use std::path::{Path, PathBuf};
use std::time::Duration;

use fabgate_link::LinkConfig;
use serde::{Deserialize, Serialize};

use crate::svc::transfer::TransferConfig;

/// Printer models that ship without a camera.
const MODELS_WITHOUT_CAMERA: [&str; 1] = ["V8110"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One printer entry in the gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrinterProfile {
    pub name: String,
    pub model: String,
    pub device_id: String,
    /// Command channel address, `host:port`.
    pub command_addr: String,
    /// P2P session address, `host:port`.
    pub p2p_addr: String,
}

/// Link timing overrides, in whole seconds. Missing fields keep the
/// [`LinkConfig`] defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkSection {
    pub poll_interval_secs: Option<u64>,
    pub status_interval_secs: Option<u64>,
    pub stall_window_secs: Option<u64>,
    pub restart_backoff_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
}

/// File transfer tuning overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferSection {
    pub rate_limit_bps: Option<u64>,
    pub chunk_size: Option<usize>,
}

/// Gateway configuration, loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Bridge socket path.
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
    /// Index into `printers` selecting the active profile.
    #[serde(default)]
    pub printer: usize,
    #[serde(default)]
    pub printers: Vec<PrinterProfile>,
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub transfer: TransferSection,
}

fn default_socket() -> PathBuf {
    PathBuf::from("/run/fabgate.sock")
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            printer: 0,
            printers: Vec::new(),
            link: LinkSection::default(),
            transfer: TransferSection::default(),
        }
    }
}

impl GatewayConfig {
    /// Load and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// At least one printer entry exists. This is the session gate for
    /// every bridge topic.
    pub fn configured(&self) -> bool {
        !self.printers.is_empty()
    }

    /// The selected printer profile, `None` when the index is out of range.
    pub fn printer(&self) -> Option<&PrinterProfile> {
        self.printers.get(self.printer)
    }

    /// Whether the given model has a camera.
    pub fn video_supported(model: &str) -> bool {
        !MODELS_WITHOUT_CAMERA.contains(&model)
    }

    /// Camera support for the selected printer.
    pub fn camera_available(&self) -> bool {
        self.printer()
            .map(|printer| Self::video_supported(&printer.model))
            .unwrap_or(false)
    }

    /// Link timing with config overrides applied over the defaults.
    pub fn link_config(&self) -> LinkConfig {
        let mut config = LinkConfig::default();
        if let Some(secs) = self.link.poll_interval_secs {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.link.status_interval_secs {
            config.status_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.link.stall_window_secs {
            config.stall_window = Duration::from_secs(secs);
        }
        if let Some(secs) = self.link.restart_backoff_secs {
            config.restart_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = self.link.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.link.heartbeat_interval_secs {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        config
    }

    /// Transfer tuning with config overrides applied over the defaults.
    pub fn transfer_config(&self) -> TransferConfig {
        let mut config = TransferConfig::default();
        if let Some(bps) = self.transfer.rate_limit_bps {
            config.rate_limit_bps = bps;
        }
        if let Some(size) = self.transfer.chunk_size {
            config.chunk_size = size;
        }
        config
    }
}
