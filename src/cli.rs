use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::{SourceKind, TrackingConfig};

#[derive(Parser, Debug)]
#[command(name = "floorsense")]
#[command(about = "Real-time floor tracking: depth frames in, contour polygons out over OSC")]
#[command(long_about = "Reads frames from a depth sensor, recording or simulation, learns the empty floor, tracks the blobs moving across it and streams their outlines to a renderer over UDP. Tuning parameters can be changed live by sending OSC messages to the control port.")]
pub struct Args {
    #[arg(
        short = 'c',
        long = "config",
        env = "FLOORSENSE_CONFIG",
        help = "Path to a TOML configuration file"
    )]
    pub config: Option<PathBuf>,

    #[arg(short = 's', long = "source", help = "Frame source to use")]
    pub source: Option<SourceArg>,

    #[arg(long = "source-path", help = "Image directory for the files source")]
    pub source_path: Option<PathBuf>,

    #[arg(long = "send-host", help = "Host receiving contour messages")]
    pub send_host: Option<String>,

    #[arg(long = "send-port", help = "Port receiving contour messages")]
    pub send_port: Option<u16>,

    #[arg(long = "receive-port", help = "Port to listen on for control messages")]
    pub receive_port: Option<u16>,

    #[arg(long = "refresh-hz", help = "Processing ticks per second")]
    pub refresh_hz: Option<u32>,

    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help = "Increase verbosity level (use multiple times for more verbose output)"
    )]
    pub verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum SourceArg {
    #[value(name = "synthetic")]
    Synthetic,
    #[value(name = "files")]
    Files,
    #[value(name = "none")]
    None,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Synthetic => SourceKind::Synthetic,
            SourceArg::Files => SourceKind::Files,
            SourceArg::None => SourceKind::None,
        }
    }
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Applies the flags that were given on top of `config`.
    pub fn apply_to(&self, config: &mut TrackingConfig) {
        if let Some(source) = self.source {
            config.source.kind = source.into();
        }
        if let Some(path) = &self.source_path {
            config.source.path = Some(path.clone());
        }
        if let Some(host) = &self.send_host {
            config.network.send_host = host.clone();
        }
        if let Some(port) = self.send_port {
            config.network.send_port = port;
        }
        if let Some(port) = self.receive_port {
            config.network.receive_port = port;
        }
        if let Some(hz) = self.refresh_hz {
            config.tracking.refresh_hz = hz;
        }
    }

    pub fn setup_logging(&self) -> anyhow::Result<()> {
        use tracing_subscriber::{EnvFilter, FmtSubscriber};

        let level = match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
            .with_target(false)
            .with_thread_ids(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| anyhow::anyhow!("failed to set tracing subscriber: {}", e))
    }
}
