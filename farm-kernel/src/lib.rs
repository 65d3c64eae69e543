/*!
# Farm Kernel - Coordinateur de ferme de mineurs

- Scheduler de statistiques : rafraîchissement périodique, un job en vol par worker
- Pool de rafraîchissement borné, jobs isolés sous timeout
- Registry de la flotte : commandes start/stop et agrégats
- Configuration JSON avec champs sensibles chiffrés (AES-256-CBC)
- Surface HTTP Axum pour le dashboard
*/

pub mod cipher;
pub mod config;
pub mod http;
pub mod logging;
pub mod models;
pub mod pending;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod snapshots;
pub mod state;

pub use cipher::{CryptoError, FieldCipher};
pub use config::{load_fleet, ConfigError};
pub use http::{build_router, AppState};
pub use models::{FleetAggregate, Roster};
pub use pool::{Completion, RefreshError, RefreshPool};
pub use registry::{DispatchError, FleetCommand, FleetRegistry};
pub use scheduler::{SchedulerConfig, SnapshotCollector, StatisticsScheduler};
