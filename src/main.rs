//! frameflow demo: synthetic peer connections feeding the conversion dispatcher

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use flume::{bounded, Sender};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use frameflow::texture::{HostBackend, TextureBackend};
use frameflow::{sink_fn, utils, BackendKind, Config, ConnectionId, DemoConfig, Dispatcher, Frame};

/// What the signaling layer hands to the host loop
enum DriverEvent {
    FrameArrived(ConnectionId, Frame),
    Disconnected(ConnectionId),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("frameflow=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("frameflow launching...");

    // Load configuration
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    frameflow::CONFIG.store(Arc::new(config.clone()));

    let backend: Arc<dyn TextureBackend> = match config.texture.backend {
        BackendKind::Host => Arc::new(HostBackend::new()),
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => Arc::new(frameflow::texture::WgpuBackend::new(config.texture.api)?),
        #[cfg(not(feature = "gpu"))]
        BackendKind::Gpu => return Err(eyre!("built without the gpu feature")),
    };

    let sink = sink_fn(|result| {
        debug!(
            connection = %result.connection,
            sequence = result.sequence,
            texture = %result.texture.id(),
            width = result.width,
            height = result.height,
            "frame ready"
        );
        Ok(())
    });
    let mut dispatcher = Dispatcher::new(config.pipeline.clone(), backend, sink)?;

    let demo = config.demo;
    if demo.connections == 0 || demo.fps == 0 {
        return Err(eyre!("demo needs at least one connection and a non-zero fps"));
    }

    // Set up tx/rx
    let (tx, rx) = bounded::<DriverEvent>(demo.connections * 4);
    for n in 0..demo.connections {
        let tx = tx.clone();
        let demo = demo.clone();
        tokio::spawn(async move { produce(n, demo, tx).await });
    }
    drop(tx);

    let mut ticker = tokio::time::interval(Duration::from_millis(demo.tick_ms.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = rx.recv_async() => match event {
                Ok(DriverEvent::FrameArrived(id, frame)) => {
                    if let Err(e) = dispatcher.submit(id, frame) {
                        warn!(error = %e, "frame not converted");
                    }
                }
                Ok(DriverEvent::Disconnected(id)) => {
                    dispatcher.teardown(&id);
                }
                Err(_) => {
                    info!("all connections closed");
                    break;
                }
            },
            _ = ticker.tick() => {
                for (id, e) in dispatcher.tick().failed {
                    error!(connection = %id, error = %e, "conversion failed on tick");
                }
            }
            _ = &mut shutdown => {
                info!("interrupt received");
                break;
            }
        }
    }

    dispatcher.teardown_all();
    let stats = dispatcher.stats();
    info!(
        submitted = stats.submitted,
        delivered = stats.delivered,
        dropped = stats.dropped,
        invalid = stats.invalid_input,
        evictions = stats.pool_evictions,
        "frameflow shutting down"
    );
    Ok(())
}

/// One synthetic peer: irregular frame rate, periodic format switches
async fn produce(n: usize, demo: DemoConfig, tx: Sender<DriverEvent>) {
    let id = ConnectionId::from(format!("peer-{n}"));
    let period = Duration::from_secs_f64(1.0 / demo.fps as f64) + Duration::from_millis(n as u64 * 5);
    let deadline = Instant::now() + Duration::from_secs(demo.duration_secs);
    let mut interval = tokio::time::interval(period);

    let mut sequence = 0u64;
    while Instant::now() < deadline {
        interval.tick().await;

        let built = if demo.formats.is_empty() {
            utils::native_pattern(frameflow::PixelFormat::Bgra, demo.width, demo.height, sequence)
        } else {
            let slot = (sequence / demo.switch_every.max(1)) as usize + n;
            utils::test_pattern(demo.formats[slot % demo.formats.len()], demo.width, demo.height, sequence)
        };
        let frame = match built {
            Ok(frame) => frame,
            Err(e) => {
                error!(connection = %id, error = %e, "failed to build frame");
                break;
            }
        };

        if let Err(e) = tx.send_async(DriverEvent::FrameArrived(id.clone(), frame)).await {
            error!("Failed to send frame: {}", e);
            return;
        }
        sequence += 1;
    }

    let _ = tx.send_async(DriverEvent::Disconnected(id)).await;
}
