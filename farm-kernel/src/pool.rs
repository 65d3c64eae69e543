/**
 * POOL DE RAFRAÎCHISSEMENT - Exécution isolée des jobs de statistiques
 *
 * RÔLE : Exécuter au plus P jobs en parallèle, chacun dans sa propre tâche tokio
 * (frontière de panic) sous un timeout dur, et publier un résultat explicite pour
 * chaque job accepté.
 *
 * FONCTIONNEMENT :
 * - `submit` ne bloque jamais : un superviseur attend un permit du sémaphore
 * - Résultats envoyés sur un canal vers le handler de complétion
 * - `job_done` est appelé par le handler une fois le résultat appliqué
 * - `shutdown` ferme le pool puis attend que tous les jobs acceptés soient terminés
 */

use farm_remote::{RemoteError, Snapshot};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, warn};

/// Échec d'un job attribuable à un worker
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("refresh timed out after {0:?}")]
    TimedOut(Duration),
    #[error("refresh pool closed")]
    PoolClosed,
}

/// Résultat d'un job tel que vu par le handler de complétion
#[derive(Debug)]
pub enum Completion {
    Finished {
        worker_id: String,
        result: Result<Snapshot, RefreshError>,
    },
    /// La tâche du job est morte (panic) : aucun id exploitable
    Lost { reason: String },
}

pub struct RefreshPool {
    permits: Arc<Semaphore>,
    parallelism: usize,
    job_timeout: Duration,
    completions: mpsc::UnboundedSender<Completion>,
    in_flight: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    closed: AtomicBool,
}

impl RefreshPool {
    pub fn new(parallelism: usize, job_timeout: Duration) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let parallelism = parallelism.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = Self {
            permits: Arc::new(Semaphore::new(parallelism)),
            parallelism,
            job_timeout,
            completions: tx,
            in_flight: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        };
        (pool, rx)
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Jobs acceptés dont le résultat n'a pas encore été appliqué
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Accepte un job; false si le pool est fermé
    pub fn submit<F>(&self, worker_id: String, job: F) -> bool
    where
        F: Future<Output = Result<Snapshot, RefreshError>> + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            self.job_done();
            return false;
        }

        let permits = self.permits.clone();
        let job_timeout = self.job_timeout;
        let completions = self.completions.clone();
        let in_flight = self.in_flight.clone();
        let drained = self.drained.clone();

        tokio::spawn(async move {
            let completion = match permits.acquire_owned().await {
                Ok(_permit) => {
                    debug!("[{}] Refresh job started", worker_id);
                    let mut handle = tokio::spawn(job);
                    match tokio::time::timeout(job_timeout, &mut handle).await {
                        Ok(Ok(result)) => Completion::Finished { worker_id, result },
                        Ok(Err(e)) => Completion::Lost {
                            reason: format!("refresh task of {} died: {}", worker_id, e),
                        },
                        Err(_) => {
                            handle.abort();
                            Completion::Finished {
                                worker_id,
                                result: Err(RefreshError::TimedOut(job_timeout)),
                            }
                        }
                    }
                }
                Err(_) => Completion::Finished {
                    worker_id,
                    result: Err(RefreshError::PoolClosed),
                },
            };

            if completions.send(completion).is_err() {
                warn!("Completion handler gone, dropping refresh result");
                release(&in_flight, &drained);
            }
        });

        true
    }

    /// Marque un résultat comme appliqué
    pub fn job_done(&self) {
        release(&self.in_flight, &self.drained);
    }

    /// Ferme le pool et attend que tous les jobs acceptés soient appliqués
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        loop {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

fn release(in_flight: &AtomicUsize, drained: &Notify) {
    if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
        drained.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_devkit::SnapshotBuilder;

    async fn explode() -> Result<Snapshot, RefreshError> {
        panic!("extractor exploded")
    }

    /// Applique les complétions comme le ferait le scheduler
    fn spawn_handler(
        pool: Arc<RefreshPool>,
        mut rx: mpsc::UnboundedReceiver<Completion>,
    ) -> Arc<parking_lot::Mutex<Vec<Completion>>> {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        tokio::spawn(async move {
            while let Some(completion) = rx.recv().await {
                sink.lock().push(completion);
                pool.job_done();
            }
        });
        seen
    }

    #[tokio::test]
    async fn test_results_are_delivered() {
        let (pool, rx) = RefreshPool::new(2, Duration::from_secs(5));
        let pool = Arc::new(pool);
        let seen = spawn_handler(pool.clone(), rx);

        assert!(pool.submit("a".into(), async { Ok(SnapshotBuilder::new("a").hps(1.0).build()) }));
        pool.shutdown().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], Completion::Finished { worker_id, result: Ok(_) } if worker_id == "a"));
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let (pool, rx) = RefreshPool::new(2, Duration::from_secs(5));
        let pool = Arc::new(pool);
        let seen = spawn_handler(pool.clone(), rx);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            let id = format!("w{}", i);
            pool.submit(id.clone(), async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(SnapshotBuilder::new(&id).build())
            });
        }
        pool.shutdown().await;

        assert_eq!(seen.lock().len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.parallelism(), 2);
    }

    #[tokio::test]
    async fn test_timeout_becomes_explicit_result() {
        let (pool, rx) = RefreshPool::new(1, Duration::from_millis(30));
        let pool = Arc::new(pool);
        let seen = spawn_handler(pool.clone(), rx);

        pool.submit("slow".into(), async {
            std::future::pending::<()>().await;
            Ok(SnapshotBuilder::new("slow").build())
        });
        pool.shutdown().await;

        let seen = seen.lock();
        assert!(matches!(
            &seen[0],
            Completion::Finished { result: Err(RefreshError::TimedOut(_)), .. }
        ));
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_lost() {
        let (pool, rx) = RefreshPool::new(1, Duration::from_secs(5));
        let pool = Arc::new(pool);
        let seen = spawn_handler(pool.clone(), rx);

        pool.submit("boom".into(), explode());
        pool.submit("next".into(), async { Ok(SnapshotBuilder::new("next").build()) });
        pool.shutdown().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().any(|c| matches!(c, Completion::Lost { .. })));
        assert!(seen
            .iter()
            .any(|c| matches!(c, Completion::Finished { worker_id, result: Ok(_) } if worker_id == "next")));
    }

    #[tokio::test]
    async fn test_submit_refused_after_shutdown() {
        let (pool, _rx) = RefreshPool::new(1, Duration::from_secs(5));
        pool.shutdown().await;

        assert!(!pool.submit("late".into(), async { Ok(SnapshotBuilder::new("late").build()) }));
        assert_eq!(pool.in_flight(), 0);
    }
}
