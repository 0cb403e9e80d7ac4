/*!
# Boost DevKit - Doubles de test pour le sous-système d'allocation

Bibliothèque facilitant les tests sans bot-server réel :
- `MockHostApi` : enregistre les commandes add/remove/health, pannes simulées
- `TestHarness` : tracker + ledger + distributor sur une horloge manuelle
*/

pub mod host_stub;
pub mod test_utils;

pub use host_stub::{MockHostApi, RecordedCall};
pub use test_utils::TestHarness;
