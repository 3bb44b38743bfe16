//! Wiring shared by the unit tests: the connection components bound to a
//! simulated observer, with every delay compressed.

use std::sync::Arc;
use std::time::Duration;

// ---

use tracelink_domain::ChannelTarget;
use tracelink_sim::TraceObserverSim;

// ---

use super::{
    // ---
    BackoffSettings,
    ChannelManager,
    ConnectionHeaders,
    ConnectionState,
    DisconnectionHandler,
    MetricRecorder,
};

// ---

pub(crate) struct Harness {
    // ---
    pub(crate) state: Arc<ConnectionState>,
    pub(crate) channel_manager: Arc<ChannelManager>,
    pub(crate) handler: Arc<DisconnectionHandler>,
    pub(crate) metrics: Arc<MetricRecorder>,
}

// ---

impl Harness {
    // ---
    /// One second of production delay becomes one millisecond.
    pub(crate) fn new(sim: &TraceObserverSim) -> Self {
        Self::with_unit(sim, Duration::from_millis(1))
    }

    pub(crate) fn with_unit(sim: &TraceObserverSim, unit: Duration) -> Self {
        // ---
        let settings = BackoffSettings::compressed(unit);
        let metrics = Arc::new(MetricRecorder::new());
        let target = ChannelTarget {
            host: "observer.test".into(),
            port: 443,
            use_plaintext: true,
            use_compression: false,
        };

        let state = Arc::new(ConnectionState::new(settings.connection_poll));
        let channel_manager = Arc::new(ChannelManager::new(
            sim.transport(),
            target,
            Arc::new(ConnectionHeaders::new("test-license", None)),
            metrics.clone(),
        ));
        let handler = DisconnectionHandler::bind(
            Arc::clone(&state),
            Arc::clone(&channel_manager),
            metrics.clone(),
            &settings,
        );

        Self {
            state,
            channel_manager,
            handler,
            metrics,
        }
    }
}
