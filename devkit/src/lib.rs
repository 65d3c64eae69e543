/*!
# Farm DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant les tests du coordinateur de ferme avec:
- Mock RemoteController pour tests sans SSH
- Sorties de commandes Mochimo prêtes à l'emploi
- Builders pour descripteurs, snapshots et configurations
- Harness de test
*/

pub mod fleet_helpers;
pub mod remote_stub;
pub mod test_utils;

pub use fleet_helpers::{fleet, fleet_config, worker_entry, DescriptorBuilder, SnapshotBuilder};
pub use remote_stub::{MinerOutput, MockRemoteController, RecordedCall, Reply};
pub use test_utils::{init_tracing, TestHarness};
