use farm_remote::{Snapshot, WorkerDescriptor};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::ConfigError;

/// Liste figée des workers, partagée en lecture seule entre registry et scheduler
#[derive(Debug, Clone)]
pub struct Roster(Arc<Vec<WorkerDescriptor>>);

impl Roster {
    /// Refuse les ids dupliqués
    pub fn new(descriptors: Vec<WorkerDescriptor>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.id.as_str()) {
                return Err(ConfigError::DuplicateId(descriptor.id.clone()));
            }
        }
        Ok(Self(Arc::new(descriptors)))
    }

    pub fn get(&self, id: &str) -> Option<&WorkerDescriptor> {
        self.0.iter().find(|d| d.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WorkerDescriptor> {
        self.0.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.0.iter().map(|d| d.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Vue agrégée de la ferme, calculée à la demande
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetAggregate {
    #[serde(rename = "totalHPS")]
    pub total_hps: f64,
    #[serde(rename = "totalSolved")]
    pub total_solved: u64,
    /// Pourcentage de workers en `solving`, arrondi à 2 décimales
    #[serde(rename = "solvingRate")]
    pub solving_rate: f64,
    #[serde(rename = "hpsReporting")]
    pub hps_reporting: usize,
    pub farm: Vec<Snapshot>,
}

impl FleetAggregate {
    /// Sommes sur les métriques présentes; le dénominateur du taux est le nombre de snapshots
    pub fn from_snapshots(farm: Vec<Snapshot>) -> Self {
        let mut total_hps = 0.0;
        let mut total_solved = 0;
        let mut hps_reporting = 0;
        let mut solving = 0;

        for snapshot in &farm {
            if let Some(hps) = snapshot.metrics.hps {
                total_hps += hps;
                hps_reporting += 1;
            }
            total_solved += snapshot.metrics.solved.unwrap_or(0);
            if snapshot.metrics.solving.unwrap_or(false) {
                solving += 1;
            }
        }

        let solving_rate = if farm.is_empty() {
            0.0
        } else {
            (10_000.0 * solving as f64 / farm.len() as f64).round() / 100.0
        };

        Self {
            total_hps,
            total_solved,
            solving_rate,
            hps_reporting,
            farm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_devkit::{fleet, DescriptorBuilder, SnapshotBuilder};

    #[test]
    fn test_roster_rejects_duplicates() {
        let descriptors = vec![
            DescriptorBuilder::new("rig-1").build(),
            DescriptorBuilder::new("rig-2").build(),
            DescriptorBuilder::new("rig-1").host("10.0.0.9").build(),
        ];
        assert!(matches!(Roster::new(descriptors), Err(ConfigError::DuplicateId(id)) if id == "rig-1"));
    }

    #[test]
    fn test_roster_lookup() {
        let roster = Roster::new(fleet(3)).unwrap();
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.ids(), vec!["rig-1", "rig-2", "rig-3"]);
        assert!(roster.get("rig-2").is_some());
        assert!(roster.get("rig-9").is_none());
    }

    #[test]
    fn test_aggregate_arithmetic() {
        let aggregate = FleetAggregate::from_snapshots(vec![
            SnapshotBuilder::new("a").hps(10.0).solving(true).solved(2).build(),
            SnapshotBuilder::new("b").hps(20.0).solving(false).build(),
            SnapshotBuilder::new("c").solving(true).solved(1).build(),
        ]);

        assert_eq!(aggregate.total_hps, 30.0);
        assert_eq!(aggregate.total_solved, 3);
        assert_eq!(aggregate.hps_reporting, 2);
        assert_eq!(aggregate.solving_rate, 66.67);
        assert_eq!(aggregate.farm.len(), 3);
    }

    #[test]
    fn test_empty_aggregate() {
        let aggregate = FleetAggregate::from_snapshots(Vec::new());
        assert_eq!(aggregate.solving_rate, 0.0);
        assert_eq!(aggregate.total_hps, 0.0);
    }

    #[test]
    fn test_aggregate_json_keys() {
        let aggregate = FleetAggregate::from_snapshots(vec![SnapshotBuilder::new("a").hps(1.5).build()]);
        let json = serde_json::to_value(&aggregate).unwrap();
        assert_eq!(json["totalHPS"], 1.5);
        assert_eq!(json["totalSolved"], 0);
        assert_eq!(json["solvingRate"], 0.0);
        assert_eq!(json["hpsReporting"], 1);
        assert_eq!(json["farm"][0]["workerId"], "a");
    }
}
