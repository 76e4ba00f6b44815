mod args;
mod publisher;

use args::Args;
use clap::Parser;
use emergent_camera::{
    controller::AcquisitionController,
    sdk::UIntParam,
    sim::{SimConfig, SimSdk},
    sink::ChannelSink,
};
use publisher::ImagePublisher;
use std::{error::Error, sync::Arc, time::Duration};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer};
use zenoh::config::Config;

/// Frames buffered between the frame pump and the zenoh publisher.
const FRAME_QUEUE: usize = 4;

fn init_tracing(args: &Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stdout_log = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(level);

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(level)),
        Err(_) => None,
    };

    let console = args.tokio_console.then(|| console_subscriber::spawn());

    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default().with_filter(level))
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(stdout_log)
        .with(journald)
        .with(console)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();
    init_tracing(&args)?;

    let session = zenoh::open(Config::try_from(&args)?).await?;

    let dims = args.dimensions();
    let sdk = Arc::new(SimSdk::new(SimConfig {
        serial_number: args.serial.clone(),
        frame_period: Duration::from_millis(args.sim_frame_period),
        width: dims.width,
        height: dims.height,
    }));
    let (sink, frames) = ChannelSink::new(args.requested_format(), FRAME_QUEUE);
    let controller = Arc::new(AcquisitionController::new(
        sdk,
        Arc::new(sink),
        args.controller_config(),
    ));
    info!(sdk = %controller.sdk_version(), "Emergent camera node");

    let device = controller.connect(&args.serial)?;
    info!("{device}");

    controller.set_u32(UIntParam::OffsetX, args.offset[0])?;
    controller.set_u32(UIntParam::OffsetY, args.offset[1])?;
    let optional = [
        (UIntParam::Exposure, args.exposure),
        (UIntParam::Gain, args.gain),
        (UIntParam::FrameRate, args.frame_rate),
    ];
    for (param, value) in optional {
        if let Some(value) = value {
            controller.set_u32(param, value)?;
        }
    }

    controller.start()?;

    let publisher = ImagePublisher::new(session, args.topic.clone(), args.frame_id.clone());
    let frames = frames.to_async();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut tick = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(img) => {
                    if let Err(e) = publisher.publish(img).await {
                        warn!("publish failed: {e}");
                    }
                }
                Err(_) => break,
            },
            _ = &mut ctrl_c => {
                info!("interrupted, stopping acquisition");
                break;
            }
            _ = tick.tick() => {
                if !controller.is_acquiring() && frames.is_empty() {
                    break;
                }
            }
        }
    }

    let ctrl = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || ctrl.disconnect()).await??;

    if let Some(report) = controller.last_report() {
        info!(
            published = report.frames_published,
            dropped = report.frames_dropped,
            outcome = ?report.outcome,
            "acquisition finished"
        );
    }
    Ok(())
}
