/*!
# Boost Core - Allocation des bots sur la flotte de serveurs

Deux composants coopèrent :
- [`CapacityTracker`] : modèle de ressources par host (capacité totale, usage
  reporté, réservations à durée limitée) et choix du meilleur host.
- [`AllocationLedger`] + [`Distributor`] : combien de bots sont placés sur chaque
  host pour un (user, stream), et comment répartir un ajout ou un retrait.

Le reste (registry des hosts, limites de plans, poller health) est fourni en
entrée par la couche applicative.
*/

pub mod apply;
pub mod capacity;
pub mod clock;
pub mod config;
pub mod distributor;
pub mod error;
pub mod health;
pub mod ledger;
pub mod models;
pub mod plans;

pub use apply::{AddCommand, HostApi, HttpHostApi, RemoveCommand};
pub use capacity::{CapacityTracker, HostSnapshot, ReservationId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BoostConfig, CapacityConf};
pub use distributor::{
    AddOutcome, AdditionPlan, Distributor, HostRemoval, RemovalPlan, RemovalReport, RemovalRequest, RemovalStep,
};
pub use error::{ApplyError, BoostError};
pub use health::{HealthPoller, HealthReport, MemoryReport};
pub use ledger::AllocationLedger;
pub use models::{BotKind, StreamKey};
pub use plans::{PlanLimits, PlanTable};
