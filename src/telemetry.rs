use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

/// In-process invocation counters for the monitoring display.
///
/// Owned by the composition root and injected into the API state — never a
/// module global, so tests get isolated instances. Advisory only; resets on
/// restart.
#[derive(Debug, Default)]
pub struct Telemetry {
    counters: DashMap<String, u64>,
}

impl Telemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, endpoint: &str) {
        *self.counters.entry(endpoint.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}
