//! Frame sinks for LED controllers: TCP streams, UDP datagrams and device
//! nodes. Each sink keeps its own transport alive in a background task and
//! forwards back-channel lines as [`jukebox_core::SinkReport`]s.

mod device;
mod link;
mod tcp;
mod udp;

pub use device::DeviceSink;
pub use tcp::TcpSink;
pub use udp::UdpSink;

use jukebox_core::{FrameSink, SinkConfig, SinkKind, SinkReportSender};
use link::LOG_TARGET;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Started sinks and the tasks that supervise them
#[derive(Default)]
pub struct SinkSet {
    pub sinks: Vec<Arc<dyn FrameSink>>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl SinkSet {
    /// Wait for every supervisor after the token was cancelled
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Build and start every configured sink. A sink that cannot be set up
/// is logged and left out; the rest still run.
pub async fn start_sinks(
    configs: &[SinkConfig],
    reports: &SinkReportSender,
    cancel_token: &CancellationToken,
) -> SinkSet {
    let mut set = SinkSet::default();
    for config in configs {
        let name = config.display_name();
        let reports = Some(reports.clone());
        match config.kind {
            SinkKind::Tcp => {
                let sink = Arc::new(TcpSink::new(name, config.target.clone(), reports));
                set.tasks
                    .push(Arc::clone(&sink).start(cancel_token.clone()));
                set.sinks.push(sink);
            }
            SinkKind::Udp => match UdpSink::connect(name, &config.target, reports).await {
                Ok(sink) => {
                    let sink = Arc::new(sink);
                    set.tasks
                        .push(Arc::clone(&sink).start(cancel_token.clone()));
                    set.sinks.push(sink);
                }
                Err(e) => error!(target: LOG_TARGET, "skipping sink: {e}"),
            },
            SinkKind::Device => {
                let sink = Arc::new(DeviceSink::new(name, config.target.clone(), reports));
                set.tasks
                    .push(Arc::clone(&sink).start(cancel_token.clone()));
                set.sinks.push(sink);
            }
        }
    }
    info!(target: LOG_TARGET, configured = configs.len(), started = set.sinks.len(), "sinks started");
    set
}
