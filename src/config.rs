//! Layered configuration: compiled defaults, then an optional TOML file, then
//! `FLOORSENSE_*` environment variables. Command-line flags are applied on top
//! by the binary, which validates again afterwards.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core_modules::parameters::Parameters;
use crate::core_modules::tracker::{DEFAULT_MAX_DISTANCE, DEFAULT_PERSISTENCE};
use crate::error::{Result, TrackingError};
use crate::pipeline::PipelineConfig;
use crate::protocol::control::{DEFAULT_INBOUND_PREFIX, DEFAULT_OUTBOUND_PREFIX};

const DEFAULT_SEND_HOST: &str = "127.0.0.1";
const DEFAULT_SEND_PORT: u16 = 7000;
const DEFAULT_RECEIVE_HOST: &str = "0.0.0.0";
const DEFAULT_RECEIVE_PORT: u16 = 7001;
const DEFAULT_WIDTH: u32 = 512;
const DEFAULT_HEIGHT: u32 = 424;
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_VISITORS: usize = 2;
const DEFAULT_LEARNING_TIME: u32 = 300;
const DEFAULT_REFRESH_HZ: u32 = 30;

const ENV_PREFIX: &str = "FLOORSENSE_";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    network: Option<NetworkConfigFile>,
    source: Option<SourceConfigFile>,
    tracking: Option<TrackingConfigFile>,
    parameters: Option<Parameters>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NetworkConfigFile {
    send_host: Option<String>,
    send_port: Option<u16>,
    receive_host: Option<String>,
    receive_port: Option<u16>,
    outbound_prefix: Option<String>,
    inbound_prefix: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    kind: Option<SourceKind>,
    path: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    visitors: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackingConfigFile {
    persistence: Option<u32>,
    learning_time: Option<u32>,
    max_distance: Option<f64>,
    refresh_hz: Option<u32>,
}

/// Which `FrameSource` the binary builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Simulated depth scene.
    Synthetic,
    /// A directory of recorded images.
    Files,
    /// No device; the pipeline idles.
    None,
}

impl FromStr for SourceKind {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synthetic" => Ok(SourceKind::Synthetic),
            "files" => Ok(SourceKind::Files),
            "none" => Ok(SourceKind::None),
            other => Err(TrackingError::Config(format!("unknown source kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSettings {
    pub send_host: String,
    pub send_port: u16,
    pub receive_host: String,
    pub receive_port: u16,
    pub outbound_prefix: String,
    pub inbound_prefix: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// Image directory for `SourceKind::Files`.
    pub path: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    /// Capture rate of the device thread.
    pub fps: u32,
    /// Number of simulated visitors for `SourceKind::Synthetic`.
    pub visitors: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    pub persistence: u32,
    pub learning_time: u32,
    pub max_distance: f64,
    /// Tick rate of the processing loop.
    pub refresh_hz: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub network: NetworkSettings,
    pub source: SourceSettings,
    pub tracking: TrackingSettings,
    /// Initial values; clamped when the parameter store is built.
    pub parameters: Parameters,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

impl TrackingConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like `load`, with environment lookups going through `lookup`.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file);
        cfg.apply_env(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parses a TOML document on top of the defaults. No environment, no validation.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(raw).map_err(|e| TrackingError::Config(format!("invalid config: {}", e)))?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: ConfigFile) -> Self {
        let network = file.network.unwrap_or_default();
        let source = file.source.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        Self {
            network: NetworkSettings {
                send_host: network.send_host.unwrap_or_else(|| DEFAULT_SEND_HOST.to_string()),
                send_port: network.send_port.unwrap_or(DEFAULT_SEND_PORT),
                receive_host: network
                    .receive_host
                    .unwrap_or_else(|| DEFAULT_RECEIVE_HOST.to_string()),
                receive_port: network.receive_port.unwrap_or(DEFAULT_RECEIVE_PORT),
                outbound_prefix: network
                    .outbound_prefix
                    .unwrap_or_else(|| DEFAULT_OUTBOUND_PREFIX.to_string()),
                inbound_prefix: network
                    .inbound_prefix
                    .unwrap_or_else(|| DEFAULT_INBOUND_PREFIX.to_string()),
            },
            source: SourceSettings {
                kind: source.kind.unwrap_or(SourceKind::Synthetic),
                path: source.path,
                width: source.width.unwrap_or(DEFAULT_WIDTH),
                height: source.height.unwrap_or(DEFAULT_HEIGHT),
                fps: source.fps.unwrap_or(DEFAULT_SOURCE_FPS),
                visitors: source.visitors.unwrap_or(DEFAULT_VISITORS),
            },
            tracking: TrackingSettings {
                persistence: tracking.persistence.unwrap_or(DEFAULT_PERSISTENCE),
                learning_time: tracking.learning_time.unwrap_or(DEFAULT_LEARNING_TIME),
                max_distance: tracking.max_distance.unwrap_or(DEFAULT_MAX_DISTANCE),
                refresh_hz: tracking.refresh_hz.unwrap_or(DEFAULT_REFRESH_HZ),
            },
            parameters: file.parameters.unwrap_or_default(),
        }
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|value| !value.trim().is_empty())
        };

        if let Some(host) = var("SEND_HOST") {
            self.network.send_host = host;
        }
        if let Some(port) = var("SEND_PORT") {
            self.network.send_port = parse_port("FLOORSENSE_SEND_PORT", &port)?;
        }
        if let Some(host) = var("RECEIVE_HOST") {
            self.network.receive_host = host;
        }
        if let Some(port) = var("RECEIVE_PORT") {
            self.network.receive_port = parse_port("FLOORSENSE_RECEIVE_PORT", &port)?;
        }
        if let Some(kind) = var("SOURCE") {
            self.source.kind = kind.parse()?;
        }
        if let Some(path) = var("SOURCE_PATH") {
            self.source.path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(TrackingError::Config("sensor dimensions must be non-zero".into()));
        }
        if self.tracking.persistence == 0 {
            return Err(TrackingError::Config("persistence must be at least one frame".into()));
        }
        if self.tracking.learning_time == 0 {
            return Err(TrackingError::Config("learning time must be at least one frame".into()));
        }
        if self.tracking.refresh_hz == 0 {
            return Err(TrackingError::Config("refresh rate must be greater than zero".into()));
        }
        if self.source.fps == 0 {
            return Err(TrackingError::Config("source fps must be greater than zero".into()));
        }
        if !(self.tracking.max_distance.is_finite() && self.tracking.max_distance > 0.0) {
            return Err(TrackingError::Config("max distance must be positive".into()));
        }
        if self.source.kind == SourceKind::Files && self.source.path.is_none() {
            return Err(TrackingError::Config("a files source needs a path".into()));
        }
        for prefix in [&self.network.outbound_prefix, &self.network.inbound_prefix] {
            if !prefix.starts_with('/') {
                return Err(TrackingError::Config(format!(
                    "address prefix '{}' must start with '/'",
                    prefix
                )));
            }
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            persistence: self.tracking.persistence,
            learning_time: self.tracking.learning_time,
            max_distance: self.tracking.max_distance,
        }
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        TrackingError::Config(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&raw)
        .map_err(|e| TrackingError::Config(format!("invalid config file {}: {}", path.display(), e)))
}

fn parse_port(name: &str, value: &str) -> Result<u16> {
    value
        .trim()
        .parse()
        .map_err(|_| TrackingError::Config(format!("{} must be a port number, got '{}'", name, value)))
}
