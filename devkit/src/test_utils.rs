/*!
Test Harness pour le coordinateur de ferme

Facilite l'écriture de tests avec:
- Mock RemoteController préconfiguré comme une ferme saine
- WorkerFactory sans délai de stabilisation
- Flotte de descripteurs prête à l'emploi
*/

use crate::fleet_helpers::fleet;
use crate::remote_stub::MockRemoteController;
use farm_remote::{MochimoExtractor, WorkerDescriptor, WorkerFactory, WorkerSettings};
use std::sync::Arc;
use std::time::Duration;

/// Init logging pour tests (idempotent)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Harness de test complet pour le coordinateur
pub struct TestHarness {
    pub remote: MockRemoteController,
    pub descriptors: Vec<WorkerDescriptor>,
    settings: WorkerSettings,
}

impl TestHarness {
    /// Ferme saine de `workers` mineurs
    pub fn new(workers: usize) -> Self {
        init_tracing();

        Self {
            remote: MockRemoteController::healthy_farm(),
            descriptors: fleet(workers),
            settings: WorkerSettings {
                command_timeout: Duration::from_secs(5),
                settle: Duration::ZERO,
                ..WorkerSettings::default()
            },
        }
    }

    /// Remplace la flotte par des descripteurs donnés
    pub fn with_descriptors(mut self, descriptors: Vec<WorkerDescriptor>) -> Self {
        self.descriptors = descriptors;
        self
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Factory branchée sur le mock
    pub fn factory(&self) -> WorkerFactory {
        WorkerFactory::new(
            Arc::new(self.remote.clone()),
            Arc::new(MochimoExtractor::new()),
            self.settings.clone(),
        )
    }

    pub fn descriptor(&self, id: &str) -> Option<&WorkerDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    /// Attend qu'une condition devienne vraie (polling 10ms)
    pub async fn wait_for<F>(&self, limit: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_stub::Reply;

    #[tokio::test]
    async fn test_harness_statistics_over_mock() {
        let harness = TestHarness::new(2);
        let descriptor = harness.descriptor("rig-2").cloned().unwrap();

        let snapshot = harness.factory().build(descriptor).statistics().await.unwrap();
        assert_eq!(snapshot.worker_id, "rig-2");
        assert_eq!(snapshot.metrics.cpu, Some(42.5));
        assert_eq!(snapshot.metrics.hps, Some(1500.0));
        assert_eq!(snapshot.metrics.solved, Some(3));
        assert_eq!(snapshot.metrics.solving, Some(true));
        assert_eq!(harness.remote.count_matching("rig-2.farm.local", "top"), 1);
    }

    #[tokio::test]
    async fn test_harness_unreachable_worker() {
        let harness = TestHarness::new(1);
        harness
            .remote
            .on_host("rig-1.farm.local", "top", Reply::Unreachable("refused".into()));
        let descriptor = harness.descriptor("rig-1").cloned().unwrap();

        assert!(harness.factory().build(descriptor).statistics().await.is_err());
    }

    #[tokio::test]
    async fn test_wait_for() {
        let harness = TestHarness::new(0);
        assert!(harness.wait_for(Duration::from_millis(50), || true).await);
        assert!(!harness.wait_for(Duration::from_millis(30), || false).await);
    }
}
