//! Worker descriptors and the remote handle built from them
//!
//! A `WorkerDescriptor` is plain data, cloned freely into refresh jobs. A `Worker` pairs a
//! descriptor with the transport and the extractor and runs the status, start and stop
//! sequences against the host.

use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::execution::{CommandOutput, ConnectionDescriptor, RemoteController, RemoteError};
use crate::metrics::{MetricsExtractor, RawStatus, Snapshot};

/// Commands configured for one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplates {
    pub start: String,
    pub stop: Option<String>,
    pub log: Option<String>,
}

/// Identity and connection metadata of one fleet member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescriptor {
    pub id: String,
    pub connection: ConnectionDescriptor,
    pub commands: CommandTemplates,
}

/// Timing and matching knobs shared by every worker handle
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Bound on every single remote command
    pub command_timeout: Duration,
    /// Pause between a start/stop command and the running-state check
    pub settle: Duration,
    /// Name fragment used to find the miner processes (`ps faux | grep <pattern>`)
    pub process_pattern: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(20),
            settle: Duration::from_secs(3),
            process_pattern: "mochi".to_string(),
        }
    }
}

/// Builds worker handles from descriptors
#[derive(Clone)]
pub struct WorkerFactory {
    controller: Arc<dyn RemoteController>,
    extractor: Arc<dyn MetricsExtractor>,
    settings: WorkerSettings,
}

impl WorkerFactory {
    pub fn new(
        controller: Arc<dyn RemoteController>,
        extractor: Arc<dyn MetricsExtractor>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            controller,
            extractor,
            settings,
        }
    }

    pub fn build(&self, descriptor: WorkerDescriptor) -> Worker {
        Worker {
            descriptor,
            controller: self.controller.clone(),
            extractor: self.extractor.clone(),
            settings: self.settings.clone(),
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }
}

/// Live handle on one remote worker
pub struct Worker {
    descriptor: WorkerDescriptor,
    controller: Arc<dyn RemoteController>,
    extractor: Arc<dyn MetricsExtractor>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &WorkerDescriptor {
        &self.descriptor
    }

    fn status_query(&self) -> String {
        format!("ps faux | grep {}", self.settings.process_pattern)
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.controller
            .execute(&self.descriptor.connection, command, self.settings.command_timeout)
            .await
    }

    /// Gathers cpu load, process list and log metrics into a fresh snapshot
    pub async fn statistics(&self) -> Result<Snapshot, RemoteError> {
        debug!("[{}] Computing statistics", self.id());

        let top = self.run("top -bcn1").await?;
        let processes = self.run(&self.status_query()).await?;
        let log = match &self.descriptor.commands.log {
            Some(command) => Some(self.run(command).await?),
            None => None,
        };

        let extraction = self
            .extractor
            .extract(&RawStatus { top, processes }, log.as_ref());
        for error in &extraction.errors {
            warn!("[{}] Error while parsing {}", self.id(), error);
        }

        let connection = &self.descriptor.connection;
        Ok(Snapshot::from_extraction(self.id(), OffsetDateTime::now_utc(), extraction)
            .with_origin(&connection.host, &connection.user))
    }

    /// Ids of the miner processes currently running on the host
    pub async fn process_ids(&self) -> Result<Vec<u32>, RemoteError> {
        let listing = self.run(&self.status_query()).await?;
        if listing.has_error() {
            return Err(RemoteError::Execution {
                host: self.descriptor.connection.host.clone(),
                stderr: listing.stderr.trim().to_string(),
            });
        }

        self.extractor
            .process_ids(&listing.stdout)
            .map_err(|e| RemoteError::Execution {
                host: self.descriptor.connection.host.clone(),
                stderr: e.to_string(),
            })
    }

    /// Starts the miner unless it already runs; true if processes run afterwards
    pub async fn start(&self) -> Result<bool, RemoteError> {
        if !self.process_ids().await?.is_empty() {
            info!("[{}] Already running", self.id());
            return Ok(true);
        }

        info!("[{}] Starting", self.id());
        self.run(&self.descriptor.commands.start).await?;
        tokio::time::sleep(self.settings.settle).await;
        Ok(!self.process_ids().await?.is_empty())
    }

    /// Stops the miner; true if no process remains afterwards
    ///
    /// Without a configured stop command every process matching the status query is
    /// killed. The match is name based: an unrelated process whose command line contains
    /// the pattern would be killed too.
    pub async fn stop(&self) -> Result<bool, RemoteError> {
        match &self.descriptor.commands.stop {
            Some(command) => {
                info!("[{}] Stopping", self.id());
                self.run(command).await?;
            }
            None => {
                let pids = self.process_ids().await?;
                info!("[{}] Stopping with kill sequence over {} process(es)", self.id(), pids.len());
                self.run(&kill_sequence(&pids)).await?;
            }
        }

        tokio::time::sleep(self.settings.settle).await;
        Ok(self.process_ids().await?.is_empty())
    }
}

/// `date && kill <pid> && kill <pid> ...`, a no-op chain when `pids` is empty
pub fn kill_sequence(pids: &[u32]) -> String {
    pids.iter()
        .fold("date".to_string(), |acc, pid| format!("{} && kill {}", acc, pid))
}
