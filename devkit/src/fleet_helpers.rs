/*!
Helpers pour construire des flottes de test

Builders pour descripteurs de workers, snapshots et fichiers de configuration JSON
au format attendu par le coordinateur.
*/

use farm_remote::{CommandTemplates, ConnectionDescriptor, Credential, MinerMetrics, Snapshot, WorkerDescriptor};
use serde_json::{json, Value};
use time::OffsetDateTime;

/// Builder pour descripteurs de workers
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    id: String,
    host: String,
    user: String,
    credential: Credential,
    commands: CommandTemplates,
}

impl DescriptorBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            host: format!("{}.farm.local", id),
            user: "miner".to_string(),
            credential: Credential::Password("secret".to_string()),
            commands: CommandTemplates {
                start: "cd mochimo/bin && ./gomochi d -n".to_string(),
                stop: None,
                log: Some("tail -n 20 mochimo/bin/d/mochi.log".to_string()),
            },
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn private_key(mut self, path: &str) -> Self {
        self.credential = Credential::PrivateKey(path.into());
        self
    }

    pub fn stop_command(mut self, command: &str) -> Self {
        self.commands.stop = Some(command.to_string());
        self
    }

    pub fn without_log(mut self) -> Self {
        self.commands.log = None;
        self
    }

    pub fn build(self) -> WorkerDescriptor {
        WorkerDescriptor {
            id: self.id,
            connection: ConnectionDescriptor::new(&self.host, None, &self.user, self.credential),
            commands: self.commands,
        }
    }
}

/// Flotte de `count` workers nommés `rig-1`..`rig-N`
pub fn fleet(count: usize) -> Vec<WorkerDescriptor> {
    (1..=count)
        .map(|i| DescriptorBuilder::new(&format!("rig-{}", i)).build())
        .collect()
}

/// Builder pour snapshots
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    worker_id: String,
    captured_at: OffsetDateTime,
    metrics: MinerMetrics,
    error: Option<String>,
}

impl SnapshotBuilder {
    pub fn new(worker_id: &str) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            captured_at: OffsetDateTime::now_utc(),
            metrics: MinerMetrics::default(),
            error: None,
        }
    }

    pub fn captured_at(mut self, at: OffsetDateTime) -> Self {
        self.captured_at = at;
        self
    }

    pub fn hps(mut self, hps: f64) -> Self {
        self.metrics.hps = Some(hps);
        self
    }

    pub fn solved(mut self, solved: u64) -> Self {
        self.metrics.solved = Some(solved);
        self
    }

    pub fn solving(mut self, solving: bool) -> Self {
        self.metrics.solving = Some(solving);
        self
    }

    pub fn error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn build(self) -> Snapshot {
        let mut snapshot = Snapshot::captured(&self.worker_id, self.captured_at, self.metrics);
        snapshot.error = self.error;
        snapshot
    }
}

/// Entrée de configuration en clair pour un worker
pub fn worker_entry(id: &str) -> Value {
    json!({
        "id": id,
        "host": format!("{}.farm.local", id),
        "user": "miner",
        "password": "secret",
        "startCommand": "cd mochimo/bin && ./gomochi d -n",
        "logCommand": "tail -n 20 mochimo/bin/d/mochi.log"
    })
}

/// Document de configuration complet `{"miners": [...]}`
pub fn fleet_config(ids: &[&str]) -> Value {
    json!({ "miners": ids.iter().map(|id| worker_entry(id)).collect::<Vec<_>>() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let descriptor = DescriptorBuilder::new("rig-7")
            .host("10.0.0.7:2200")
            .private_key("/keys/rig7")
            .stop_command("pkill gomochi")
            .build();

        assert_eq!(descriptor.id, "rig-7");
        assert_eq!(descriptor.connection.host, "10.0.0.7");
        assert_eq!(descriptor.connection.port, 2200);
        assert_eq!(descriptor.commands.stop.as_deref(), Some("pkill gomochi"));
        assert!(matches!(descriptor.connection.credential, Credential::PrivateKey(_)));
    }

    #[test]
    fn test_fleet_ids() {
        let ids: Vec<String> = fleet(3).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["rig-1", "rig-2", "rig-3"]);
    }

    #[test]
    fn test_snapshot_builder() {
        let snapshot = SnapshotBuilder::new("rig-1").hps(10.0).solving(true).error("log: boom").build();
        assert_eq!(snapshot.metrics.hps, Some(10.0));
        assert_eq!(snapshot.metrics.solving, Some(true));
        assert_eq!(snapshot.error.as_deref(), Some("log: boom"));
    }

    #[test]
    fn test_fleet_config_shape() {
        let config = fleet_config(&["a", "b"]);
        assert_eq!(config["miners"].as_array().map(Vec::len), Some(2));
        assert_eq!(config["miners"][1]["id"], "b");
    }
}
