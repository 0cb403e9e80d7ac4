/**
 * DISTRIBUTOR - Répartition des ajouts/retraits de bots sur les hosts
 *
 * AJOUT : un seul host, celui qui a le plus de marge (délégué au tracker).
 * La réservation est posée sous le même verrou que le choix, avant tout appel
 * réseau, pour qu'une rafale d'ajouts ne vise pas le même host.
 *
 * RETRAIT : on vide d'abord les hosts les plus chargés pour ce stream
 * (tri décroissant, égalité → ordre alphabétique du host). Un retrait plus
 * grand que le total alloué vide tout ; le manque n'est pas une erreur.
 *
 * Le ledger n'est mis à jour que pour les hosts qui ont répondu 2xx.
 */

use crate::apply::{AddCommand, HostApi, RemoveCommand};
use crate::capacity::{CapacityTracker, ReservationId};
use crate::config::CapacityConf;
use crate::error::{BoostError, Result};
use crate::ledger::AllocationLedger;
use crate::models::{BotKind, StreamKey};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum AdditionPlan {
    Target {
        host: String,
        reservation: ReservationId,
        units: f64,
    },
    /// Aucun candidat ne peut servir la demande.
    Exhausted,
}

/// Retrait de N bots, ou de tout ce qui est alloué au stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalRequest {
    Units(u32),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalStep {
    pub host: String,
    pub amount: u32,
}

/// Étapes de retrait dans l'ordre d'application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalPlan {
    pub steps: Vec<RemovalStep>,
}

impl RemovalPlan {
    pub fn total(&self) -> u32 {
        self.steps.iter().map(|s| s.amount).sum()
    }

    pub fn as_map(&self) -> BTreeMap<String, u32> {
        self.steps.iter().map(|s| (s.host.clone(), s.amount)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AddOutcome {
    Applied { host: String, count: u32 },
    /// Le host choisi a refusé ou n'a pas répondu ; rien n'est enregistré.
    Failed { host: String, error: String },
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRemoval {
    pub host: String,
    pub amount: u32,
    pub applied: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    /// `None` pour un retrait total.
    pub requested: Option<u32>,
    pub removed_total: u32,
    pub hosts: Vec<HostRemoval>,
}

impl RemovalReport {
    pub fn fully_applied(&self) -> bool {
        self.hosts.iter().all(|h| h.applied)
    }

    pub fn failed_hosts(&self) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|h| !h.applied)
            .map(|h| h.host.as_str())
            .collect()
    }
}

pub struct Distributor {
    tracker: Arc<CapacityTracker>,
    ledger: Arc<AllocationLedger>,
    capacity: CapacityConf,
}

impl Distributor {
    pub fn new(tracker: Arc<CapacityTracker>, ledger: Arc<AllocationLedger>, capacity: CapacityConf) -> Self {
        Self {
            tracker,
            ledger,
            capacity,
        }
    }

    pub fn tracker(&self) -> &Arc<CapacityTracker> {
        &self.tracker
    }

    pub fn ledger(&self) -> &Arc<AllocationLedger> {
        &self.ledger
    }

    /// Choisit et réserve un host pour `bots` bots du type donné.
    pub fn plan_addition<S: AsRef<str>>(&self, candidates: &[S], kind: BotKind, bots: u32) -> Result<AdditionPlan> {
        if bots == 0 {
            return Err(BoostError::InvalidRequest("cannot add zero bots".into()));
        }
        let units = self.capacity.units_for(kind, bots);
        Ok(match self.tracker.select_and_reserve(candidates, units) {
            Some((host, reservation)) => AdditionPlan::Target { host, reservation, units },
            None => AdditionPlan::Exhausted,
        })
    }

    pub fn plan_removal(&self, key: &StreamKey, total_to_remove: u32) -> RemovalPlan {
        let mut hosts: Vec<(String, u32)> = self
            .ledger
            .get_allocations(key)
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .collect();
        // tri stable : à égalité l'ordre alphabétique du BTreeMap est conservé
        hosts.sort_by(|a, b| b.1.cmp(&a.1));

        let mut remaining = total_to_remove;
        let mut steps = Vec::new();
        for (host, count) in hosts {
            if remaining == 0 {
                break;
            }
            let amount = remaining.min(count);
            steps.push(RemovalStep { host, amount });
            remaining -= amount;
        }
        RemovalPlan { steps }
    }

    /// Hosts qui portent encore des bots pour ce stream.
    pub fn plan_full_removal(&self, key: &StreamKey) -> Vec<String> {
        self.ledger.get_hosts_with_allocations(key)
    }

    pub fn plan_for(&self, key: &StreamKey, request: RemovalRequest) -> RemovalPlan {
        match request {
            RemovalRequest::Units(n) => self.plan_removal(key, n),
            RemovalRequest::All => {
                let allocations = self.ledger.get_allocations(key);
                let steps = self
                    .plan_full_removal(key)
                    .into_iter()
                    .filter_map(|host| {
                        let amount = *allocations.get(&host)?;
                        Some(RemovalStep { host, amount })
                    })
                    .collect();
                RemovalPlan { steps }
            }
        }
    }

    /// Validation préalable côté appelant : refuse un retrait supérieur au total alloué.
    pub fn check_removal(&self, key: &StreamKey, requested: u32) -> Result<()> {
        let available = self.ledger.total_allocated(key);
        if requested > available {
            return Err(BoostError::InsufficientAllocation { requested, available });
        }
        Ok(())
    }

    /// Choisit un host, envoie la commande, enregistre l'allocation si 2xx.
    pub async fn add<S: AsRef<str>>(
        &self,
        key: &StreamKey,
        candidates: &[S],
        bots: u32,
        api: &dyn HostApi,
    ) -> Result<AddOutcome> {
        key.validate()?;
        let (host, reservation) = match self.plan_addition(candidates, key.kind, bots)? {
            AdditionPlan::Target { host, reservation, .. } => (host, reservation),
            AdditionPlan::Exhausted => {
                warn!(stream = %key, bots, "no host can take the request");
                return Ok(AddOutcome::Exhausted);
            }
        };

        match api.add(&host, &AddCommand::new(key, bots)).await {
            Ok(()) => {
                self.ledger.record_allocation(key, &host, bots);
                info!(stream = %key, host = %host, bots, "bots added");
                Ok(AddOutcome::Applied { host, count: bots })
            }
            Err(e) => {
                warn!(stream = %key, host = %host, error = %e, "add failed on host");
                if self.capacity.release_reservations_on_failure {
                    self.tracker.release_reservation(&host, reservation);
                }
                Ok(AddOutcome::Failed { host, error: e.to_string() })
            }
        }
    }

    /// Applique un plan de retrait host par host ; un échec n'arrête pas les suivants.
    pub async fn remove(&self, key: &StreamKey, request: RemovalRequest, api: &dyn HostApi) -> Result<RemovalReport> {
        key.validate()?;
        if request == RemovalRequest::Units(0) {
            return Err(BoostError::InvalidRequest("cannot remove zero bots".into()));
        }

        let plan = self.plan_for(key, request);
        let mut report = RemovalReport {
            requested: match request {
                RemovalRequest::Units(n) => Some(n),
                RemovalRequest::All => None,
            },
            ..Default::default()
        };

        for step in plan.steps {
            let cmd = RemoveCommand::new(key, step.amount);
            match api.remove(&step.host, &cmd).await {
                Ok(()) => {
                    let removed = self.ledger.remove_allocation(key, &step.host, step.amount);
                    report.removed_total += removed;
                    report.hosts.push(HostRemoval {
                        host: step.host,
                        amount: removed,
                        applied: true,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(stream = %key, host = %step.host, error = %e, "remove failed on host");
                    report.hosts.push(HostRemoval {
                        host: step.host,
                        amount: step.amount,
                        applied: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            stream = %key,
            removed = report.removed_total,
            failed = report.failed_hosts().len(),
            "removal applied"
        );
        Ok(report)
    }
}
