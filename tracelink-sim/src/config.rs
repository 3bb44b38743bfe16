// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Configuration for the in-process trace observer.
///
/// All fields default to a healthy observer: connections accepted, streams
/// ready, no injected failures beyond what the `flaky` header asks for.
#[derive(Debug, Clone)]
pub struct SimConfig {
    // ---
    /// Refuse every `open_channel` until re-enabled through
    /// [`super::TraceObserverSim::set_refuse_connections`].
    pub refuse_connections: bool,

    /// Initial flow-control readiness of every stream.
    pub ready: bool,

    /// RNG seed for reproducible flaky-failure sequences. `None` = random.
    pub seed: Option<u64>,
}

// ---

impl Default for SimConfig {
    fn default() -> Self {
        // ---
        Self {
            refuse_connections: false,
            ready: true,
            seed: None,
        }
    }
}

// ---

impl SimConfig {
    // ---
    /// Healthy observer. Useful as a baseline.
    pub fn healthy() -> Self {
        Self::default()
    }

    // ---

    /// Observer that is down until the test brings it up.
    pub fn unreachable() -> Self {
        // ---
        Self {
            refuse_connections: true,
            ..Default::default()
        }
    }

    // ---

    /// Deterministic flaky-failure sequence.
    pub fn seeded(seed: u64) -> Self {
        // ---
        Self {
            seed: Some(seed),
            ..Default::default()
        }
    }
}
