/**
 * ALLOCATION LEDGER - Placement des bots par (user, stream, host)
 *
 * RÔLE : Registre de ce qui est réellement placé sur chaque bot-server pour
 * un stream donné. Seules les opérations confirmées par le host (HTTP 2xx)
 * doivent y être reportées : le ledger reflète la vérité connue, pas l'intention.
 *
 * CYCLE DE VIE d'un triplet : absent → alloué(count > 0) → absent.
 * Un compteur à 0 est supprimé ; le compteur ne passe jamais sous 0.
 */

use crate::models::StreamKey;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct AllocationLedger {
    streams: RwLock<HashMap<StreamKey, BTreeMap<String, u32>>>,
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute `units` au compteur du triplet (créé si absent).
    pub fn record_allocation(&self, key: &StreamKey, host: &str, units: u32) {
        if units == 0 {
            return;
        }
        let mut streams = self.streams.write();
        let count = streams
            .entry(key.clone())
            .or_default()
            .entry(host.to_string())
            .or_insert(0);
        *count = count.saturating_add(units);
        debug!(stream = %key, host, units, total = *count, "allocation recorded");
    }

    /// Retire jusqu'à `units` ; retourne ce qui a vraiment été retiré.
    pub fn remove_allocation(&self, key: &StreamKey, host: &str, units: u32) -> u32 {
        let mut streams = self.streams.write();
        let Some(hosts) = streams.get_mut(key) else {
            return 0;
        };
        let Some(count) = hosts.get_mut(host) else {
            return 0;
        };

        let removed = units.min(*count);
        if removed < units {
            warn!(stream = %key, host, requested = units, available = *count, "removal clamped");
        }
        *count -= removed;

        if *count == 0 {
            hosts.remove(host);
        }
        if hosts.is_empty() {
            streams.remove(key);
        }
        removed
    }

    pub fn get_allocations(&self, key: &StreamKey) -> BTreeMap<String, u32> {
        self.streams.read().get(key).cloned().unwrap_or_default()
    }

    pub fn get_hosts_with_allocations(&self, key: &StreamKey) -> Vec<String> {
        self.streams
            .read()
            .get(key)
            .map(|hosts| {
                hosts
                    .iter()
                    .filter(|(_, count)| **count > 0)
                    .map(|(host, _)| host.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn total_allocated(&self, key: &StreamKey) -> u32 {
        self.streams
            .read()
            .get(key)
            .map(|hosts| hosts.values().fold(0u32, |acc, c| acc.saturating_add(*c)))
            .unwrap_or(0)
    }

    /// Nombre de bots placés par host, tous streams confondus.
    pub fn host_totals(&self) -> BTreeMap<String, u64> {
        let mut totals = BTreeMap::new();
        for hosts in self.streams.read().values() {
            for (host, count) in hosts {
                *totals.entry(host.clone()).or_insert(0u64) += *count as u64;
            }
        }
        totals
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BotKind;

    fn key() -> StreamKey {
        StreamKey::new("user-1", "https://twitch.tv/someone", BotKind::Viewer)
    }

    #[test]
    fn test_record_accumulates() {
        let ledger = AllocationLedger::new();
        ledger.record_allocation(&key(), "h1", 5);
        ledger.record_allocation(&key(), "h1", 3);
        ledger.record_allocation(&key(), "h2", 2);

        let allocs = ledger.get_allocations(&key());
        assert_eq!(allocs.get("h1"), Some(&8));
        assert_eq!(allocs.get("h2"), Some(&2));
        assert_eq!(ledger.total_allocated(&key()), 10);
    }

    #[test]
    fn test_zero_record_creates_nothing() {
        let ledger = AllocationLedger::new();
        ledger.record_allocation(&key(), "h1", 0);
        assert!(ledger.get_allocations(&key()).is_empty());
        assert_eq!(ledger.stream_count(), 0);
    }

    #[test]
    fn test_remove_clamps_and_prunes() {
        let ledger = AllocationLedger::new();
        ledger.record_allocation(&key(), "h1", 4);

        assert_eq!(ledger.remove_allocation(&key(), "h1", 10), 4);
        assert!(ledger.get_allocations(&key()).is_empty());
        assert!(ledger.get_hosts_with_allocations(&key()).is_empty());
        assert_eq!(ledger.stream_count(), 0);
        assert_eq!(ledger.remove_allocation(&key(), "h1", 1), 0);
    }

    #[test]
    fn test_kinds_are_separate_pools() {
        let ledger = AllocationLedger::new();
        let chatters = StreamKey::new("user-1", "https://twitch.tv/someone", BotKind::Chatter);
        ledger.record_allocation(&key(), "h1", 7);
        ledger.record_allocation(&chatters, "h1", 2);

        assert_eq!(ledger.total_allocated(&key()), 7);
        assert_eq!(ledger.total_allocated(&chatters), 2);
        assert_eq!(ledger.host_totals().get("h1"), Some(&9));
    }

    #[test]
    fn test_count_never_negative_over_sequence() {
        let ledger = AllocationLedger::new();
        let ops: [(bool, u32); 8] = [
            (true, 3), (false, 1), (false, 5), (true, 2),
            (false, 2), (true, 9), (false, 4), (false, 100),
        ];
        let mut model: u32 = 0;
        for (add, n) in ops {
            if add {
                ledger.record_allocation(&key(), "h", n);
                model += n;
            } else {
                let removed = ledger.remove_allocation(&key(), "h", n);
                assert_eq!(removed, n.min(model));
                model -= removed;
            }
            assert_eq!(ledger.total_allocated(&key()), model);
        }
        assert_eq!(model, 0);
    }
}
