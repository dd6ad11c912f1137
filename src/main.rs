//! Local run mode: cpal capture relayed over the loopback transport, with
//! announcements and presence going to the log. Platform deployments swap
//! in gateway-backed implementations of the same traits.

use std::sync::Arc;

use voxbridge::audio::CpalBackend;
use voxbridge::media::mock::MockMediaSource;
use voxbridge::outbound::{TracingAnnouncer, TracingPresence};
use voxbridge::transport::LoopbackTransport;
use voxbridge::{config, RelayApp, RelayConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let path = config::default_path();
    let config = match RelayConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let app = RelayApp::new(
        &config,
        Arc::new(LoopbackTransport::new()),
        Arc::new(CpalBackend::new()),
        Arc::new(MockMediaSource::new()),
        Arc::new(TracingAnnouncer),
        Arc::new(TracingPresence),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    };

    app.run(shutdown).await;
}
