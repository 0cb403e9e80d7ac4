/**
 * CAPACITY TRACKER - Modèle de ressources des bot-servers
 *
 * RÔLE : Pour chaque host connu, garde la capacité totale (RAM), l'usage reporté
 * par le dernier health check et les réservations provisoires posées au moment
 * d'un choix de host. Répond à "ce host peut-il prendre N unités" et
 * "quel host a le plus de marge".
 *
 * RÈGLES :
 * - usage effectif = usage reporté + somme des réservations vivantes
 * - une réservation vit tant que `now - created_at < ttl` ; les expirées sont
 *   exclues de tous les calculs, qu'elles aient été purgées ou non
 * - un host à `utilization >= plafond` (95% par défaut) n'est jamais choisi
 * - égalité de marge : le premier candidat dans l'ordre de la liste gagne
 */

use crate::clock::Clock;
use crate::config::CapacityConf;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone)]
struct Reservation {
    id: ReservationId,
    created_at: OffsetDateTime,
    amount: f64,
}

#[derive(Debug, Clone)]
struct HostMetrics {
    total_units: f64,
    used_units: f64,
    reservations: Vec<Reservation>,
    reported_at: OffsetDateTime,
    cpu_percent: Option<f32>,
}

/// Vue figée d'un host, pour l'admin et les logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSnapshot {
    pub host: String,
    pub total_units: f64,
    pub used_units: f64,
    pub reserved_units: f64,
    pub effective_usage: f64,
    pub utilization_percent: f64,
    pub available_units: f64,
    pub live_reservations: usize,
    pub cpu_percent: Option<f32>,
    #[serde(with = "time::serde::rfc3339")]
    pub reported_at: OffsetDateTime,
}

pub struct CapacityTracker {
    hosts: Mutex<HashMap<String, HostMetrics>>,
    clock: Arc<dyn Clock>,
    reservation_ttl: Duration,
    ceiling_percent: f64,
}

impl CapacityTracker {
    pub fn new(clock: Arc<dyn Clock>, conf: &CapacityConf) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            clock,
            reservation_ttl: Duration::seconds(conf.reservation_ttl_secs as i64),
            ceiling_percent: conf.utilization_ceiling_percent,
        }
    }

    /// Remplace les métriques de base d'un host (créé si absent).
    /// Les réservations encore vivantes sont conservées.
    pub fn ingest_health_report(&self, host: &str, total_units: f64, used_units: f64) {
        if !total_units.is_finite() || !used_units.is_finite() {
            warn!(host, total_units, used_units, "ignoring non-finite health report");
            return;
        }

        let now = self.clock.now();
        let ttl = self.reservation_ttl;
        let mut hosts = self.hosts.lock();
        let metrics = hosts.entry(host.to_string()).or_insert_with(|| HostMetrics {
            total_units,
            used_units,
            reservations: Vec::new(),
            reported_at: now,
            cpu_percent: None,
        });
        metrics.total_units = total_units;
        metrics.used_units = used_units;
        metrics.reported_at = now;
        // purge opportuniste, les calculs filtrent de toute façon
        metrics.reservations.retain(|r| is_live(r, now, ttl));
    }

    /// Charge CPU du dernier report, informative seulement (la sélection ne regarde que la RAM).
    pub fn record_cpu(&self, host: &str, cpu_percent: Option<f32>) {
        if let Some(metrics) = self.hosts.lock().get_mut(host) {
            metrics.cpu_percent = cpu_percent.filter(|c| c.is_finite());
        }
    }

    pub fn is_known(&self, host: &str) -> bool {
        self.hosts.lock().contains_key(host)
    }

    pub fn effective_usage(&self, host: &str) -> Option<f64> {
        let now = self.clock.now();
        self.hosts
            .lock()
            .get(host)
            .map(|m| effective_usage(m, now, self.reservation_ttl))
    }

    pub fn can_serve(&self, host: &str, requested_units: f64) -> bool {
        let now = self.clock.now();
        let hosts = self.hosts.lock();
        match hosts.get(host) {
            Some(m) => self.can_serve_metrics(m, now, requested_units),
            None => false,
        }
    }

    /// Host avec la plus grande marge parmi ceux qui peuvent servir la demande.
    pub fn select_best_host<S: AsRef<str>>(&self, candidates: &[S], requested_units: f64) -> Option<String> {
        let now = self.clock.now();
        let hosts = self.hosts.lock();
        self.select_locked(&hosts, candidates, requested_units, now)
    }

    /// Pose une réservation datée de maintenant. `None` si le host est inconnu.
    pub fn reserve(&self, host: &str, units: f64) -> Option<ReservationId> {
        let now = self.clock.now();
        let mut hosts = self.hosts.lock();
        let Some(metrics) = hosts.get_mut(host) else {
            warn!(host, units, "reserve on unknown host ignored");
            return None;
        };
        Some(push_reservation(metrics, now, units))
    }

    /// Choix + réservation sous le même verrou : deux ajouts concurrents ne
    /// peuvent pas viser la même dernière marge d'un host.
    pub fn select_and_reserve<S: AsRef<str>>(
        &self,
        candidates: &[S],
        requested_units: f64,
    ) -> Option<(String, ReservationId)> {
        let now = self.clock.now();
        let mut hosts = self.hosts.lock();
        let host = self.select_locked(&hosts, candidates, requested_units, now)?;
        let metrics = hosts.get_mut(&host)?;
        let id = push_reservation(metrics, now, requested_units);
        Some((host, id))
    }

    /// Annule une réservation avant son expiration. `false` si introuvable.
    pub fn release_reservation(&self, host: &str, id: ReservationId) -> bool {
        let mut hosts = self.hosts.lock();
        let Some(metrics) = hosts.get_mut(host) else {
            return false;
        };
        let before = metrics.reservations.len();
        metrics.reservations.retain(|r| r.id != id);
        before != metrics.reservations.len()
    }

    pub fn snapshot(&self, host: &str) -> Option<HostSnapshot> {
        let now = self.clock.now();
        self.hosts
            .lock()
            .get(host)
            .map(|m| self.to_snapshot(host, m, now))
    }

    pub fn snapshots(&self) -> Vec<HostSnapshot> {
        let now = self.clock.now();
        let hosts = self.hosts.lock();
        let mut list: Vec<HostSnapshot> = hosts
            .iter()
            .map(|(host, m)| self.to_snapshot(host, m, now))
            .collect();
        list.sort_by(|a, b| a.host.cmp(&b.host));
        list
    }

    pub fn live_reservation_count(&self) -> usize {
        let now = self.clock.now();
        self.hosts
            .lock()
            .values()
            .map(|m| m.reservations.iter().filter(|r| is_live(r, now, self.reservation_ttl)).count())
            .sum()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.lock().len()
    }

    fn select_locked<S: AsRef<str>>(
        &self,
        hosts: &HashMap<String, HostMetrics>,
        candidates: &[S],
        requested_units: f64,
        now: OffsetDateTime,
    ) -> Option<String> {
        let mut best: Option<(&str, f64)> = None;

        for candidate in candidates {
            let host = candidate.as_ref();
            let Some(metrics) = hosts.get(host) else {
                debug!(host, "candidate has no health report, skipped");
                continue;
            };
            if self.over_ceiling(metrics, now) {
                debug!(host, "candidate over utilization ceiling, skipped");
                continue;
            }

            let available = metrics.total_units - effective_usage(metrics, now, self.reservation_ttl);
            let better = best.map_or(true, |(_, best_available)| available > best_available);
            if better && self.can_serve_metrics(metrics, now, requested_units) {
                best = Some((host, available));
            }
        }

        if let Some((host, available)) = best {
            debug!(host, available, requested_units, "selected host");
        }
        best.map(|(host, _)| host.to_string())
    }

    fn can_serve_metrics(&self, metrics: &HostMetrics, now: OffsetDateTime, requested_units: f64) -> bool {
        if self.over_ceiling(metrics, now) {
            return false;
        }
        metrics.total_units - effective_usage(metrics, now, self.reservation_ttl) >= requested_units
    }

    fn over_ceiling(&self, metrics: &HostMetrics, now: OffsetDateTime) -> bool {
        utilization_percent(metrics, now, self.reservation_ttl) >= self.ceiling_percent
    }

    fn to_snapshot(&self, host: &str, m: &HostMetrics, now: OffsetDateTime) -> HostSnapshot {
        let reserved = live_reserved(m, now, self.reservation_ttl);
        let effective = m.used_units + reserved;
        HostSnapshot {
            host: host.to_string(),
            total_units: m.total_units,
            used_units: m.used_units,
            reserved_units: reserved,
            effective_usage: effective,
            utilization_percent: utilization_percent(m, now, self.reservation_ttl),
            available_units: m.total_units - effective,
            live_reservations: m.reservations.iter().filter(|r| is_live(r, now, self.reservation_ttl)).count(),
            cpu_percent: m.cpu_percent,
            reported_at: m.reported_at,
        }
    }
}

fn is_live(r: &Reservation, now: OffsetDateTime, ttl: Duration) -> bool {
    now - r.created_at < ttl
}

fn live_reserved(m: &HostMetrics, now: OffsetDateTime, ttl: Duration) -> f64 {
    m.reservations
        .iter()
        .filter(|r| is_live(r, now, ttl))
        .map(|r| r.amount)
        .sum()
}

fn effective_usage(m: &HostMetrics, now: OffsetDateTime, ttl: Duration) -> f64 {
    m.used_units + live_reserved(m, now, ttl)
}

// Capacité nulle ou négative : host considéré plein.
fn utilization_percent(m: &HostMetrics, now: OffsetDateTime, ttl: Duration) -> f64 {
    if m.total_units <= 0.0 {
        return f64::INFINITY;
    }
    effective_usage(m, now, ttl) / m.total_units * 100.0
}

fn push_reservation(metrics: &mut HostMetrics, now: OffsetDateTime, units: f64) -> ReservationId {
    let id = ReservationId::new();
    metrics.reservations.push(Reservation {
        id,
        created_at: now,
        amount: units,
    });
    id
}
