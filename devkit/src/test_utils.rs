/*!
Test Harness pour le sous-système d'allocation

Assemble un `Distributor` complet (tracker + ledger) sur une `ManualClock`
et un `MockHostApi`, pour écrire des scénarios sans réseau ni attente réelle.
*/

use crate::host_stub::MockHostApi;
use anyhow::Result;
use boost_core::{
    AddOutcome, AllocationLedger, CapacityConf, CapacityTracker, Distributor, HealthPoller, HostApi,
    ManualClock, RemovalReport, RemovalRequest, StreamKey,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const MB_PER_UNIT: f64 = 1024.0;

pub struct TestHarness {
    pub clock: ManualClock,
    pub api: MockHostApi,
    pub distributor: Distributor,
    hosts: Vec<String>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_capacity(CapacityConf::default())
    }

    pub fn with_capacity(conf: CapacityConf) -> Self {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();

        let clock = ManualClock::default();
        let tracker = Arc::new(CapacityTracker::new(Arc::new(clock.clone()), &conf));
        let distributor = Distributor::new(tracker, Arc::new(AllocationLedger::new()), conf);

        Self {
            clock,
            api: MockHostApi::new(),
            distributor,
            hosts: Vec::new(),
        }
    }

    /// Déclare un host candidat avec ses métriques (en unités) ; le mock sert
    /// le même report en MB.
    pub fn with_host(mut self, host: &str, total_units: f64, used_units: f64) -> Self {
        self.distributor
            .tracker()
            .ingest_health_report(host, total_units, used_units);
        self.api
            .set_report(host, total_units * MB_PER_UNIT, used_units * MB_PER_UNIT);
        self.hosts.push(host.to_string());
        self
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn tracker(&self) -> &Arc<CapacityTracker> {
        self.distributor.tracker()
    }

    pub fn ledger(&self) -> &Arc<AllocationLedger> {
        self.distributor.ledger()
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(time::Duration::seconds(secs));
    }

    pub async fn add(&self, key: &StreamKey, bots: u32) -> Result<AddOutcome> {
        Ok(self.distributor.add(key, &self.hosts, bots, &self.api).await?)
    }

    pub async fn remove(&self, key: &StreamKey, request: RemovalRequest) -> Result<RemovalReport> {
        Ok(self.distributor.remove(key, request, &self.api).await?)
    }

    /// Un tour de polling health sur les hosts déclarés.
    pub async fn poll_health(&self) -> usize {
        let api: Arc<dyn HostApi> = Arc::new(self.api.clone());
        let poller = HealthPoller::new(self.tracker().clone(), api, Duration::from_secs(30));
        poller.poll_once(&self.hosts).await
    }

    pub fn allocations(&self, key: &StreamKey) -> BTreeMap<String, u32> {
        self.ledger().get_allocations(key)
    }

    pub fn assert_allocations(&self, key: &StreamKey, expected: &[(&str, u32)]) -> Result<()> {
        let expected: BTreeMap<String, u32> = expected
            .iter()
            .map(|(host, count)| (host.to_string(), *count))
            .collect();
        let actual = self.allocations(key);
        if actual != expected {
            anyhow::bail!("allocations mismatch for {}: expected {:?}, got {:?}", key, expected, actual);
        }
        Ok(())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
