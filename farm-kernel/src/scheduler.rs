/**
 * SCHEDULER DE STATISTIQUES - Cœur du coordinateur de ferme
 *
 * RÔLE : Décider pour chaque worker quand un rafraîchissement est dû, garantir au plus
 * un job en vol par worker, et fusionner les résultats dans la table des snapshots.
 *
 * FONCTIONNEMENT :
 * - Boucle de monitoring : à chaque tick, parcourt le roster; tout worker non en attente
 *   dont le snapshot a plus d'un heartbeat est soumis au pool
 * - Handler de complétion : tâche unique qui applique les résultats du pool
 *   (succès → remplace le snapshot puis retire l'id; échec → retire l'id;
 *   job perdu → vide tout le PendingSet)
 * - `stop` : arrêt coopératif, puis drain du pool sans rien annuler
 *
 * VERROUS : SnapshotTable et PendingSet ont chacun leur verrou, jamais imbriqués,
 * jamais tenus à travers un `.await`.
 */

use async_trait::async_trait;
use farm_remote::{Snapshot, WorkerDescriptor, WorkerFactory};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::models::Roster;
use crate::pending::PendingSet;
use crate::pool::{Completion, RefreshError, RefreshPool};
use crate::snapshots::SnapshotTable;

/// Produit un snapshot frais pour un worker (exécuté dans le pool)
#[async_trait]
pub trait SnapshotCollector: Send + Sync {
    async fn collect(&self, descriptor: &WorkerDescriptor) -> Result<Snapshot, RefreshError>;
}

#[async_trait]
impl SnapshotCollector for WorkerFactory {
    async fn collect(&self, descriptor: &WorkerDescriptor) -> Result<Snapshot, RefreshError> {
        Ok(self.build(descriptor.clone()).statistics().await?)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Taille du pool de rafraîchissement
    pub parallelism: usize,
    /// Âge maximal d'un snapshot avant rafraîchissement
    pub heartbeat: Duration,
    /// Période de la boucle; `max(1s, heartbeat / 10)` si absent
    pub tick: Option<Duration>,
    /// Timeout dur d'un job dans le pool
    pub job_timeout: Duration,
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        self.tick
            .unwrap_or_else(|| (self.heartbeat / 10).max(Duration::from_secs(1)))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: 3,
            heartbeat: Duration::from_secs(30),
            tick: None,
            job_timeout: Duration::from_secs(120),
        }
    }
}

pub struct StatisticsScheduler {
    roster: Roster,
    collector: Arc<dyn SnapshotCollector>,
    config: SchedulerConfig,
    snapshots: SnapshotTable,
    pending: PendingSet,
    stop_requested: AtomicBool,
    wake: Notify,
    pool: OnceLock<Arc<RefreshPool>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl StatisticsScheduler {
    pub fn new(roster: Roster, collector: Arc<dyn SnapshotCollector>, config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            roster,
            collector,
            config,
            snapshots: SnapshotTable::new(),
            pending: PendingSet::new(),
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
            pool: OnceLock::new(),
            monitor: Mutex::new(None),
            handler: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Crée le pool et lance la boucle de monitoring et le handler de complétion
    pub fn start(self: &Arc<Self>) {
        let (pool, mut completions) = RefreshPool::new(self.config.parallelism, self.config.job_timeout);
        let pool = Arc::new(pool);
        if self.pool.set(pool.clone()).is_err() {
            warn!("Statistics scheduler already started");
            return;
        }

        let this = self.clone();
        let handler_pool = pool.clone();
        let handler = tokio::spawn(async move {
            while let Some(completion) = completions.recv().await {
                this.on_completion(completion);
                handler_pool.job_done();
            }
        });
        *self.handler.lock() = Some(handler);

        let this = self.clone();
        let monitor = tokio::spawn(async move { this.monitor_loop().await });
        *self.monitor.lock() = Some(monitor);

        info!(
            "Statistics scheduler started ({} worker(s), parallelism {}, heartbeat {:?})",
            self.roster.len(),
            pool.parallelism(),
            self.config.heartbeat
        );
    }

    /// Arrêt coopératif : attend la fin de la boucle puis le drain du pool
    pub async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();

        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            if let Err(e) = monitor.await {
                error!("Statistics monitor ended abnormally: {}", e);
            }
        }

        if let Some(pool) = self.pool.get() {
            pool.shutdown().await;
        }

        let handler = self.handler.lock().take();
        if let Some(handler) = handler {
            handler.abort();
        }
        info!("Statistics scheduler stopped");
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn get_statistics(&self, worker_id: &str) -> Option<Snapshot> {
        self.snapshots.get(worker_id)
    }

    /// Écrit le snapshot périmé par défaut : le worker sera revérifié au prochain tick
    pub fn init_statistics(&self, worker_id: &str) -> Snapshot {
        self.snapshots.init(worker_id)
    }

    pub fn get_pending_ids(&self) -> Vec<String> {
        self.pending.ids()
    }

    /// Soumet un job si le worker n'est pas déjà en attente; false sinon
    pub fn request_refresh(&self, descriptor: &WorkerDescriptor) -> bool {
        if self.is_stopping() {
            return false;
        }
        let Some(pool) = self.pool.get() else {
            warn!("[{}] Refresh requested before scheduler start", descriptor.id);
            return false;
        };
        if !self.pending.try_insert(&descriptor.id) {
            return false;
        }

        let collector = self.collector.clone();
        let job_descriptor = descriptor.clone();
        let accepted = pool.submit(descriptor.id.clone(), async move {
            collector.collect(&job_descriptor).await
        });

        if accepted {
            debug!("[{}] Statistics job submitted", descriptor.id);
        } else {
            self.pending.remove(&descriptor.id);
        }
        accepted
    }

    /// Un passage de la boucle sur tout le roster; retourne le nombre de jobs soumis
    pub fn scan_once(&self) -> usize {
        self.scan_at(OffsetDateTime::now_utc())
    }

    /// Passage de la boucle avec une horloge donnée
    pub fn scan_at(&self, now: OffsetDateTime) -> usize {
        let mut submitted = 0;

        for descriptor in self.roster.iter() {
            if self.is_stopping() {
                break;
            }
            if self.pending.contains(&descriptor.id) {
                continue;
            }

            let snapshot = match self.snapshots.get(&descriptor.id) {
                Some(snapshot) => snapshot,
                None => self.init_statistics(&descriptor.id),
            };
            if snapshot.age(now) <= self.config.heartbeat {
                continue;
            }

            if self.request_refresh(descriptor) {
                submitted += 1;
            }
        }

        submitted
    }

    async fn monitor_loop(&self) {
        let tick = self.config.tick();
        debug!("Statistics monitor running every {:?}", tick);

        loop {
            if self.is_stopping() {
                break;
            }
            self.scan_once();

            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = self.wake.notified() => {}
            }
        }

        debug!("Statistics monitor exited");
    }

    /// Applique le résultat d'un job
    pub fn on_completion(&self, completion: Completion) {
        match completion {
            Completion::Lost { reason } => {
                error!("Refresh job lost ({}). Clearing all pending statistics", reason);
                self.pending.clear();
            }
            Completion::Finished {
                worker_id,
                result: Err(e),
            } => {
                error!("[{}] Statistics refresh failed: {}", worker_id, e);
                self.pending.remove(&worker_id);
            }
            Completion::Finished {
                worker_id,
                result: Ok(mut snapshot),
            } => {
                if snapshot.worker_id != worker_id {
                    warn!(
                        "[{}] Collector returned a snapshot for '{}', stored under '{}'",
                        worker_id, snapshot.worker_id, worker_id
                    );
                    snapshot.worker_id = worker_id.clone();
                }
                debug!("[{}] Statistics updated", worker_id);
                self.snapshots.put(snapshot);
                self.pending.remove(&worker_id);
            }
        }
    }
}
