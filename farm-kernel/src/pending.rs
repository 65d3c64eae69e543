/**
 * PENDING SET - Workers en cours de rafraîchissement
 *
 * RÔLE : Un workerId est présent entre la soumission de son job et son callback,
 * jamais pour deux jobs qui se chevauchent. `try_insert` est le test-and-set atomique
 * qui garantit la déduplication.
 */

use std::collections::HashSet;
use tracing::debug;

use crate::state::TrackedLock;

pub struct PendingSet {
    ids: TrackedLock<HashSet<String>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self {
            ids: TrackedLock::new("pending", HashSet::new()),
        }
    }

    /// Ajoute l'id s'il est absent; false s'il était déjà en attente
    pub fn try_insert(&self, worker_id: &str) -> bool {
        let (inserted, size) = self.ids.with(|ids| (ids.insert(worker_id.to_string()), ids.len()));
        if inserted {
            debug!("Statistics job queue size -> {}", size);
        }
        inserted
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.ids.with(|ids| ids.contains(worker_id))
    }

    pub fn remove(&self, worker_id: &str) -> bool {
        let (removed, size) = self.ids.with(|ids| (ids.remove(worker_id), ids.len()));
        if removed {
            debug!("Statistics job queue size -> {}", size);
        }
        removed
    }

    pub fn clear(&self) {
        self.ids.with(|ids| ids.clear());
        debug!("Statistics job queue size -> 0");
    }

    /// Copie triée des ids en attente
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids.with(|ids| ids.iter().cloned().collect());
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.ids.with(|ids| ids.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingSet {
    fn default() -> Self {
        Self::new()
    }
}
