use crate::health::HealthTracker;
use crate::registry::SharedHostRegistry;
use boost_core::{AllocationLedger, BoostConfig, CapacityTracker, Clock, Distributor, HostApi, StreamKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// État unique partagé par les handlers Axum et le poller health.
#[derive(Clone)]
pub struct AppState {
    pub distributor: Arc<Distributor>,
    pub registry: SharedHostRegistry,
    pub api: Arc<dyn HostApi>,
    pub cfg: Arc<BoostConfig>,
    pub clock: Arc<dyn Clock>,
    pub health_tracker: HealthTracker,
    pub stream_locks: Arc<StreamLocks>,
}

impl AppState {
    pub fn new(cfg: BoostConfig, registry: SharedHostRegistry, api: Arc<dyn HostApi>, clock: Arc<dyn Clock>) -> Self {
        let tracker = Arc::new(CapacityTracker::new(clock.clone(), &cfg.capacity));
        let distributor = Distributor::new(tracker, Arc::new(AllocationLedger::new()), cfg.capacity.clone());
        Self {
            distributor: Arc::new(distributor),
            registry,
            api,
            cfg: Arc::new(cfg),
            clock,
            health_tracker: HealthTracker::new(),
            stream_locks: Arc::new(StreamLocks::default()),
        }
    }
}

/// Un verrou async par stream : lecture du total alloué, appel au host et
/// écriture du ledger se font sans qu'un autre onglet s'intercale.
#[derive(Default)]
pub struct StreamLocks {
    locks: Mutex<HashMap<StreamKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl StreamLocks {
    pub async fn acquire(&self, key: &StreamKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            // un verrou que seule la map référence n'est ni tenu ni attendu
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }
}
