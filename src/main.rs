use std::time::Duration;

use anyhow::Context;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use floorsense::cli::Args;
use floorsense::config::{SourceKind, SourceSettings, TrackingConfig};
use floorsense::core_modules::frame_source::{
    FileSequenceSource, FrameSource, NullSource, SyntheticSource, ThreadedSource,
};
use floorsense::core_modules::parameters::ParameterStore;
use floorsense::protocol::control::Transmitter;
use floorsense::protocol::transport::{spawn_receiver, OscReceiver, OscSender};
use floorsense::{TickReport, TrackingPipeline};

fn open_source(settings: &SourceSettings) -> floorsense::Result<Box<dyn FrameSource>> {
    let period = Duration::from_secs_f64(1.0 / settings.fps as f64);
    let source: Box<dyn FrameSource> = match settings.kind {
        SourceKind::Synthetic => {
            let sim = SyntheticSource::new(settings.width, settings.height, settings.visitors);
            Box::new(ThreadedSource::spawn(sim, period)?)
        }
        SourceKind::Files => {
            let dir = settings.path.as_deref().ok_or_else(|| {
                floorsense::TrackingError::Source("no image directory configured".into())
            })?;
            let files = FileSequenceSource::open(dir)?;
            Box::new(ThreadedSource::spawn(files, period)?)
        }
        SourceKind::None => Box::new(NullSource::new(settings.width, settings.height)),
    };
    Ok(source)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse_args();
    args.setup_logging()?;

    let mut config = TrackingConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.apply_to(&mut config);
    config.validate().context("validating command-line overrides")?;
    info!("Starting floorsense with {:?} source", config.source.kind);

    // A device that cannot be opened leaves the pipeline idle instead of exiting.
    let source: Box<dyn FrameSource> = match open_source(&config.source) {
        Ok(source) => source,
        Err(e) => {
            error!("Frame source unavailable, continuing without input: {}", e);
            Box::new(NullSource::new(config.source.width, config.source.height))
        }
    };
    let (width, height) = source.dimensions();
    if (width, height) != (config.source.width, config.source.height) {
        warn!(
            "Source delivers {}x{}, configured for {}x{}; normalising against the source",
            width, height, config.source.width, config.source.height
        );
    }

    let parameters = ParameterStore::with_values(width, height, config.parameters);
    let mut pipeline = TrackingPipeline::new(source, parameters, &config.pipeline_config());

    let network = &config.network;
    match OscSender::connect(&network.send_host, network.send_port).await {
        Ok(sender) => {
            let transmitter = Transmitter::new(Box::new(sender), &network.outbound_prefix, width, height);
            pipeline = pipeline.with_transmitter(transmitter);
        }
        Err(e) => error!("Outbound transport unavailable, contours will not be sent: {}", e),
    }

    let receiver_task = match OscReceiver::bind(&network.receive_host, network.receive_port).await {
        Ok(receiver) => Some(spawn_receiver(
            receiver,
            &network.inbound_prefix,
            pipeline.command_sender(),
        )),
        Err(e) => {
            error!("Control transport unavailable, parameters are fixed: {}", e);
            None
        }
    };

    let mut ticker = interval(Duration::from_secs_f64(1.0 / config.tracking.refresh_hz as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut processed: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let TickReport::Processed(_) = pipeline.tick() {
                    processed += 1;
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down after {} processed frames", processed);
    if let Some(task) = receiver_task {
        task.abort();
        let _ = task.await;
    }
    // Joins the capture thread and closes the outbound socket.
    drop(pipeline);
    Ok(())
}
