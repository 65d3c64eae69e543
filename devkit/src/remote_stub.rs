/*!
Mock RemoteController pour développement sans machines distantes

Permet de tester le scheduler et la registry sans SSH réel.
Enregistre toutes les commandes exécutées et répond selon des règles scriptées
(sortie, erreur de connexion, délai, blocage, panic).
*/

use async_trait::async_trait;
use farm_remote::{CommandOutput, ConnectionDescriptor, RemoteController, RemoteError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Réponse scriptée pour une commande
#[derive(Debug, Clone)]
pub enum Reply {
    /// Sortie immédiate
    Output(CommandOutput),
    /// Sortie après un délai
    Delayed(Duration, CommandOutput),
    /// Erreur de connectivité
    Unreachable(String),
    /// Ne répond jamais (ni timeout côté mock)
    Hang,
    /// Panic dans la tâche appelante
    Panic(String),
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub host: String,
    pub command: String,
}

/// Règle scriptée : les réponses sont servies dans l'ordre, la dernière se répète
#[derive(Debug, Clone)]
struct Rule {
    host: Option<String>,
    fragment: String,
    replies: Vec<Reply>,
    served: usize,
}

impl Rule {
    fn matches(&self, host: &str, command: &str) -> bool {
        self.host.as_deref().map_or(true, |h| h == host) && command.contains(&self.fragment)
    }

    fn next_reply(&mut self) -> Reply {
        let index = self.served.min(self.replies.len().saturating_sub(1));
        self.served += 1;
        self.replies
            .get(index)
            .cloned()
            .unwrap_or(Reply::Output(CommandOutput::default()))
    }
}

/// Mock RemoteController qui simule un parc de mineurs
#[derive(Clone, Default)]
pub struct MockRemoteController {
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// Décrémente le compteur in-flight même si l'appel est abandonné (timeout, panic)
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockRemoteController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock préconfiguré : chaque hôte répond comme un mineur sain
    pub fn healthy_farm() -> Self {
        let mock = Self::new();
        mock.on("top -bcn1", Reply::Output(MinerOutput::top(42.5)));
        mock.on("ps faux", Reply::Output(MinerOutput::processes(true, &["listen", "solving"])));
        mock.on("tail", Reply::Output(MinerOutput::log(1500.0, 3, 29, "0x00ab12")));
        mock
    }

    /// Règle valable pour tous les hôtes; la dernière règle ajoutée l'emporte
    pub fn on(&self, fragment: &str, reply: Reply) -> &Self {
        self.push_rule(None, fragment, vec![reply])
    }

    /// Règle limitée à un hôte
    pub fn on_host(&self, host: &str, fragment: &str, reply: Reply) -> &Self {
        self.push_rule(Some(host), fragment, vec![reply])
    }

    /// Réponses successives pour une même commande (ex: listing avant/après un kill)
    pub fn on_sequence(&self, fragment: &str, replies: Vec<Reply>) -> &Self {
        self.push_rule(None, fragment, replies)
    }

    fn push_rule(&self, host: Option<&str>, fragment: &str, replies: Vec<Reply>) -> &Self {
        self.rules.lock().push(Rule {
            host: host.map(String::from),
            fragment: fragment.to_string(),
            replies,
            served: 0,
        });
        self
    }

    fn reply_for(&self, host: &str, command: &str) -> Reply {
        self.rules
            .lock()
            .iter_mut()
            .rev()
            .find(|r| r.matches(host, command))
            .map(|r| r.next_reply())
            .unwrap_or(Reply::Output(CommandOutput::default()))
    }

    /// Toutes les commandes reçues (pour assertions de tests)
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Commandes reçues pour un hôte contenant un fragment donné
    pub fn count_matching(&self, host: &str, fragment: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.host == host && c.command.contains(fragment))
            .count()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Pic d'appels simultanés observé
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Reset des règles et de l'historique
    pub fn clear(&self) {
        self.rules.lock().clear();
        self.calls.lock().clear();
    }
}

#[async_trait]
impl RemoteController for MockRemoteController {
    async fn execute(
        &self,
        target: &ConnectionDescriptor,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        self.calls.lock().push(RecordedCall {
            host: target.host.clone(),
            command: command.to_string(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(self.in_flight.clone());

        tracing::debug!("[MOCK] {} <- {}", target.host, command);

        match self.reply_for(&target.host, command) {
            Reply::Output(output) => Ok(output),
            Reply::Delayed(delay, output) => {
                tokio::time::sleep(delay).await;
                Ok(output)
            }
            Reply::Unreachable(reason) => Err(RemoteError::Connectivity {
                host: target.host.clone(),
                reason,
            }),
            Reply::Hang => std::future::pending().await,
            Reply::Panic(message) => panic!("{}", message),
        }
    }
}

/// Helper pour créer des sorties de commandes au format des outils Mochimo
pub struct MinerOutput;

impl MinerOutput {
    /// Sortie `top -bcn1` avec une charge CPU donnée (somme hors idle)
    pub fn top(busy: f64) -> CommandOutput {
        CommandOutput::stdout(format!(
            "top - 10:00:00 up 1 day,  1 user,  load average: 1.00, 1.00, 1.00\n\
%Cpu(s): {:.1} us,  0.0 sy,  0.0 ni, {:.1} id,  0.0 wa,  0.0 hi,  0.0 si,  0.0 st\n",
            busy,
            100.0 - busy
        ))
    }

    /// Sortie `ps faux | grep mochi` avec les processus donnés
    pub fn processes(gomochi: bool, names: &[&str]) -> CommandOutput {
        let mut lines = Vec::new();
        let mut pid = 1200;
        if gomochi {
            lines.push(format!("miner {} 0.0 0.0 1 1 ? S 09:00 0:00 /bin/bash ./gomochi d -n", pid));
        }
        for name in names {
            pid += 1;
            lines.push(format!("miner {} 1.0 0.1 1 1 ? S 09:00 0:10  \\_ mochimo {}", pid, name));
        }
        lines.push("miner 9999 0.0 0.0 1 1 pts/0 S+ 10:00 0:00 grep mochi".to_string());
        CommandOutput::stdout(lines.join("\n"))
    }

    /// Extrait de log du mineur
    pub fn log(hps: f64, solved: u64, difficulty: u32, block: &str) -> CommandOutput {
        CommandOutput::stdout(format!(
            "Block:  {}  accepted\nSolved:  {}  Haiku/second:  {}  Difficulty:  {}\n",
            block, solved, hps, difficulty
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_remote::Credential;

    fn target(host: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::new(host, None, "miner", Credential::Password("pw".into()))
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let mock = MockRemoteController::healthy_farm();
        let out = mock.execute(&target("rig1"), "top -bcn1", Duration::from_secs(1)).await.unwrap();

        assert!(out.stdout.contains("Cpu(s)"));
        assert_eq!(mock.calls().len(), 1);
        assert_eq!(mock.count_matching("rig1", "top"), 1);
        assert_eq!(mock.in_flight(), 0);
        assert_eq!(mock.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_host_rules_override_global_rules() {
        let mock = MockRemoteController::healthy_farm();
        mock.on_host("rig2", "top", Reply::Unreachable("no route".into()));

        assert!(mock.execute(&target("rig1"), "top -bcn1", Duration::from_secs(1)).await.is_ok());
        assert!(matches!(
            mock.execute(&target("rig2"), "top -bcn1", Duration::from_secs(1)).await,
            Err(RemoteError::Connectivity { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_command_returns_empty_output() {
        let mock = MockRemoteController::new();
        let out = mock.execute(&target("rig1"), "uptime", Duration::from_secs(1)).await.unwrap();
        assert_eq!(out, CommandOutput::default());
    }

    #[tokio::test]
    async fn test_sequence_repeats_last_reply() {
        let mock = MockRemoteController::new();
        mock.on_sequence(
            "ps",
            vec![
                Reply::Output(CommandOutput::stdout("first")),
                Reply::Output(CommandOutput::stdout("second")),
            ],
        );

        let mut seen = Vec::new();
        for _ in 0..3 {
            let out = mock.execute(&target("rig1"), "ps faux", Duration::from_secs(1)).await.unwrap();
            seen.push(out.stdout);
        }
        assert_eq!(seen, vec!["first", "second", "second"]);
    }

    #[test]
    fn test_output_builders() {
        let ps = MinerOutput::processes(true, &["listen"]);
        assert!(ps.stdout.contains("gomochi"));
        assert!(ps.stdout.contains("mochimo listen"));

        let log = MinerOutput::log(10.0, 1, 20, "0xff");
        assert!(log.stdout.contains("Haiku/second:"));
    }
}
