use crate::config::types::AppConfig;
use crate::throttle::Throttler;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Instant;

/// Everything the listeners share: the parsed config, the per-server
/// throttlers, and the connection gauge the shutdown drain watches.
pub struct AppContext {
    pub config: Arc<AppConfig>,
    /// Throttlers keyed by server name; the control plane addresses them by
    /// this name, the data plane holds its own entry.
    pub throttlers: HashMap<String, Arc<Throttler>>,
    /// Live data-plane connections across all servers, read during drain.
    pub active_connections: AtomicUsize,
    pub start_time: Instant,
}

impl AppContext {
    pub fn new(config: Arc<AppConfig>, throttlers: HashMap<String, Arc<Throttler>>) -> Self {
        Self {
            config,
            throttlers,
            active_connections: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }
}
