//! Farm Remote - the worker side of the miner farm
//!
//! Everything the coordinator needs to talk to a miner host:
//! - SSH command execution with timeout (`execution`)
//! - Metrics record, snapshots and the Mochimo line grammar (`metrics`)
//! - Worker descriptors and the statistics/start/stop sequences (`worker`)

pub mod execution;
pub mod metrics;
pub mod worker;

pub use execution::{CommandOutput, ConnectionDescriptor, Credential, RemoteController, RemoteError, SshController};
pub use metrics::{
    Extraction, GrammarVersion, MetricsExtractor, MinerMetrics, MochimoExtractor, ParseError, RawStatus, Snapshot,
};
pub use worker::{CommandTemplates, Worker, WorkerDescriptor, WorkerFactory, WorkerSettings};
