/**
 * TABLE DES SNAPSHOTS - Dernier état connu de chaque worker
 *
 * RÔLE : Map workerId → Snapshot, remplacement par id, pas d'historique.
 * Écrite par le handler de complétion et les appels init, lue par la boucle de
 * monitoring et par l'API HTTP.
 *
 * Toutes les méthodes copient en entrée et en sortie : aucune référence vers le
 * contenu protégé ne sort du verrou.
 */

use farm_remote::Snapshot;
use std::collections::HashMap;

use crate::state::TrackedLock;

pub struct SnapshotTable {
    entries: TrackedLock<HashMap<String, Snapshot>>,
}

impl SnapshotTable {
    pub fn new() -> Self {
        Self {
            entries: TrackedLock::new("snapshots", HashMap::new()),
        }
    }

    pub fn get(&self, worker_id: &str) -> Option<Snapshot> {
        self.entries.with(|entries| entries.get(worker_id).cloned())
    }

    /// Remplace le snapshot du worker
    pub fn put(&self, snapshot: Snapshot) {
        self.entries.with(|entries| {
            entries.insert(snapshot.worker_id.clone(), snapshot);
        });
    }

    /// Écrit le snapshot "jamais rafraîchi" et le retourne
    pub fn init(&self, worker_id: &str) -> Snapshot {
        let snapshot = Snapshot::stale(worker_id);
        self.put(snapshot.clone());
        snapshot
    }

    pub fn len(&self) -> usize {
        self.entries.with(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copie de tous les snapshots, triée par id
    pub fn all(&self) -> Vec<Snapshot> {
        let mut all: Vec<Snapshot> = self.entries.with(|entries| entries.values().cloned().collect());
        all.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        all
    }
}

impl Default for SnapshotTable {
    fn default() -> Self {
        Self::new()
    }
}
