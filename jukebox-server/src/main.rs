mod app;
mod logging;
mod session;
#[cfg(test)]
mod testing;

use crate::app::AppState;
use jukebox_analyzer::SpectralAnalyzer;
use jukebox_core::{
    CoreError, FrameStreamer, JukeboxConfig, LightShowGenerator, ManagerSettings, Pipeline,
    QueueManager, SessionBroadcaster, StripLayout, forward_sink_reports,
};
use jukebox_sinks::start_sinks;
use jukebox_ytdlp::YtDlp;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Serve(std::io::Error),
}

fn main() {
    let logs = logging::init_tracing();

    let config = match JukeboxConfig::load_or_create() {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            info!(
                "Created config template at {}; starting with built-in defaults",
                path.display()
            );
            JukeboxConfig::defaults()
        }
        Err(e) => {
            error!("{e} ({})", JukeboxConfig::config_path().display());
            std::process::exit(1);
        }
    };
    logs.apply(&config.logging);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    // Create shared cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {e}");
    }

    if let Err(e) = runtime.block_on(run(config, cancel_token)) {
        error!("{e}");
        std::process::exit(1);
    }
    info!("Shutdown complete");
}

async fn run(config: JukeboxConfig, cancel_token: CancellationToken) -> Result<(), ServerError> {
    let broadcaster = SessionBroadcaster::new(SessionBroadcaster::DEFAULT_CAPACITY);

    let ytdlp = Arc::new(YtDlp::new(&config.ytdlp, config.pipeline.download_dir()));
    let analyzer = Arc::new(SpectralAnalyzer::new(&config.analyzer));
    let generator = Arc::new(LightShowGenerator::new(
        StripLayout::new(&config.strips),
        config.lightshow.clone(),
    ));
    let max_song_duration = (config.pipeline.max_song_duration_secs > 0)
        .then(|| Duration::from_secs(config.pipeline.max_song_duration_secs));
    let pipeline = Pipeline::new(Arc::<YtDlp>::clone(&ytdlp), ytdlp, analyzer, generator)
        .with_max_concurrent(config.pipeline.max_concurrent)
        .with_max_song_duration(max_song_duration)
        .with_progress_interval(Duration::from_millis(config.pipeline.progress_interval_ms));

    let manager = QueueManager::new(
        ManagerSettings::from_config(&config),
        pipeline,
        Arc::clone(&broadcaster),
        Some(cancel_token.clone()),
    );
    let clock_task = Arc::clone(&manager).start();

    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let sinks = start_sinks(&config.sinks, &report_tx, &cancel_token).await;
    drop(report_tx);
    if sinks.sinks.is_empty() {
        warn!("No LED sinks configured; light shows will run without hardware");
    }
    let reports_task = tokio::spawn(forward_sink_reports(
        report_rx,
        Arc::clone(&broadcaster),
        cancel_token.clone(),
    ));

    let streamer = Arc::new(FrameStreamer::new(
        manager.subscribe_now_playing(),
        sinks.sinks.clone(),
        Duration::from_millis(config.streamer.tick_ms),
        Duration::from_millis(config.streamer.sink_timeout_ms),
        Some(cancel_token.clone()),
    ));
    let streamer_task = streamer.start();

    info!(
        "Strips: {} ({} LEDs), {} sink(s), {} fps",
        config.strips.len(),
        config.total_leds(),
        sinks.sinks.len(),
        config.lightshow.frame_rate
    );

    let state = AppState {
        manager: Arc::clone(&manager),
        sink_count: sinks.sinks.len(),
    };
    let router = app::router(state, config.server.serve_audio);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(source) => {
            cancel_token.cancel();
            manager.shutdown().await;
            return Err(ServerError::Bind { addr, source });
        }
    };
    info!("Listening on http://{addr}");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(cancel_token.clone().cancelled_owned())
        .await;

    // The server also stops on its own if the listener fails
    cancel_token.cancel();
    manager.shutdown().await;
    let _ = tokio::join!(clock_task, streamer_task, reports_task);
    sinks.join().await;

    served.map_err(ServerError::Serve)
}
