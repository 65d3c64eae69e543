/**
 * REGISTRY DE LA FLOTTE - Point d'entrée unique pour l'API
 *
 * RÔLE : Posséder les descripteurs de workers, exécuter les commandes start/stop
 * et exposer les statistiques (par worker et agrégées) à la surface HTTP.
 *
 * FONCTIONNEMENT :
 * - Roster partagé en lecture seule avec le scheduler
 * - `dispatch_command` construit un handle worker à la demande; en cas de succès le
 *   snapshot du worker est réinitialisé pour forcer une revérification immédiate
 */

use farm_remote::{RemoteError, Snapshot, WorkerDescriptor, WorkerFactory};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

use crate::models::{FleetAggregate, Roster};
use crate::scheduler::StatisticsScheduler;

/// Commande opérateur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetCommand {
    Start,
    Stop,
}

impl FromStr for FleetCommand {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(DispatchError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for FleetCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Miner not found")]
    UnknownWorker(String),
    #[error("Command not found")]
    UnknownCommand(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub struct FleetRegistry {
    roster: Roster,
    scheduler: Arc<StatisticsScheduler>,
    factory: WorkerFactory,
}

impl FleetRegistry {
    pub fn new(roster: Roster, scheduler: Arc<StatisticsScheduler>, factory: WorkerFactory) -> Self {
        Self {
            roster,
            scheduler,
            factory,
        }
    }

    pub fn scheduler(&self) -> &Arc<StatisticsScheduler> {
        &self.scheduler
    }

    pub fn get_worker(&self, id: &str) -> Option<&WorkerDescriptor> {
        self.roster.get(id)
    }

    pub fn list_workers(&self) -> Vec<WorkerDescriptor> {
        self.roster.iter().cloned().collect()
    }

    /// Exécute start/stop; Ok(true) si l'état attendu est atteint
    pub async fn dispatch_command(&self, id: &str, command: FleetCommand) -> Result<bool, DispatchError> {
        let descriptor = self
            .get_worker(id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownWorker(id.to_string()))?;

        info!("[{}] Dispatching {}", id, command);
        let worker = self.factory.build(descriptor);
        let done = match command {
            FleetCommand::Start => worker.start().await,
            FleetCommand::Stop => worker.stop().await,
        }
        .map_err(|e| {
            error!("[{}] {} failed: {}", id, command, e);
            e
        })?;

        if done {
            // un job déjà en vol peut encore écraser ce snapshot périmé : la re-vérification
            // forcée attend alors le heartbeat suivant
            self.scheduler.init_statistics(id);
        } else {
            error!("[{}] {} did not reach the expected state", id, command);
        }
        Ok(done)
    }

    pub fn get_statistics(&self, id: &str) -> Option<Snapshot> {
        self.scheduler.get_statistics(id)
    }

    /// Remet le snapshot du worker à l'état périmé
    pub fn clear_statistics(&self, id: &str) -> Snapshot {
        self.scheduler.init_statistics(id)
    }

    /// Agrégat sur tous les workers du roster ayant un snapshot
    pub fn get_aggregate_statistics(&self) -> FleetAggregate {
        let farm = self
            .roster
            .iter()
            .filter_map(|d| self.scheduler.get_statistics(&d.id))
            .collect();
        FleetAggregate::from_snapshots(farm)
    }

    pub fn get_pending_ids(&self) -> Vec<String> {
        self.scheduler.get_pending_ids()
    }
}
