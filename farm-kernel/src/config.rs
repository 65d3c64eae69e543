/**
 * CONFIGURATION DE LA FERME
 *
 * RÔLE : Charger le document JSON `{"miners": [...]}` et produire les descripteurs
 * de workers, champs sensibles résolus.
 *
 * FONCTIONNEMENT :
 * - Chaque champ sensible est lu en clair, sinon depuis sa variante `encrypted<Champ>`
 * - Le chiffreur n'est construit qu'au premier champ chiffré rencontré (passphrase
 *   fournie, sinon demandée une seule fois)
 * - Ids dupliqués, champ requis ou credential manquant : erreur fatale
 * - Outils `encrypt_document` / `decrypt_document` pour `farm-crypt`
 */

use farm_remote::{CommandTemplates, ConnectionDescriptor, Credential, WorkerDescriptor};
use dialoguer::{theme::ColorfulTheme, Password};
use serde::Deserialize;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cipher::{CryptoError, FieldCipher};

/// Champs chiffrables de chaque worker (`id` reste en clair)
pub const SENSITIVE_FIELDS: [&str; 7] = [
    "host",
    "user",
    "password",
    "privateKeyPath",
    "startCommand",
    "stopCommand",
    "logCommand",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid farm document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("farm document has no 'miners' list")]
    NoWorkerList,
    #[error("miner id {0} already exists")]
    DuplicateId(String),
    #[error("miner {id}: missing '{field}'")]
    MissingField { id: String, field: &'static str },
    #[error("miner {0}: neither 'password' nor 'privateKeyPath' configured")]
    MissingCredential(String),
    #[error("miner {id}: no passphrase to decrypt '{field}'")]
    NoPassphrase { id: String, field: String },
    #[error("miner {id}: cannot decrypt '{field}': {source}")]
    Crypto {
        id: String,
        field: String,
        #[source]
        source: CryptoError,
    },
}

/// `password` → `encryptedPassword`
pub fn encrypted_name(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => format!("encrypted{}{}", first.to_uppercase(), chars.as_str()),
        None => "encrypted".to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct FarmDocument {
    #[serde(alias = "workers")]
    miners: Vec<WorkerEntry>,
}

/// Entrée brute d'un worker telle qu'écrite dans le fichier
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerEntry {
    pub id: String,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub encrypted_host: Option<String>,
    pub user: Option<String>,
    pub encrypted_user: Option<String>,
    pub password: Option<String>,
    pub encrypted_password: Option<String>,
    pub private_key_path: Option<String>,
    pub encrypted_private_key_path: Option<String>,
    pub start_command: Option<String>,
    pub encrypted_start_command: Option<String>,
    pub stop_command: Option<String>,
    pub encrypted_stop_command: Option<String>,
    pub log_command: Option<String>,
    pub encrypted_log_command: Option<String>,
}

/// Chiffreur construit à la demande
struct LazyCipher<P> {
    passphrase: Option<String>,
    prompt: P,
    cipher: Option<FieldCipher>,
}

impl<P> LazyCipher<P>
where
    P: FnMut() -> Option<String>,
{
    fn get(&mut self, id: &str, field: &str) -> Result<&FieldCipher, ConfigError> {
        if self.cipher.is_none() {
            let passphrase = match self.passphrase.take() {
                Some(passphrase) => passphrase,
                None => (self.prompt)().ok_or_else(|| ConfigError::NoPassphrase {
                    id: id.to_string(),
                    field: field.to_string(),
                })?,
            };
            self.cipher = Some(FieldCipher::new(&passphrase));
        }

        self.cipher.as_ref().ok_or_else(|| ConfigError::NoPassphrase {
            id: id.to_string(),
            field: field.to_string(),
        })
    }

    fn resolve(
        &mut self,
        id: &str,
        field: &'static str,
        plain: Option<String>,
        encrypted: Option<String>,
    ) -> Result<Option<String>, ConfigError> {
        if plain.is_some() {
            return Ok(plain);
        }
        let Some(encrypted) = encrypted else {
            return Ok(None);
        };

        let cipher = self.get(id, field)?;
        cipher
            .decrypt(&encrypted)
            .map(Some)
            .map_err(|source| ConfigError::Crypto {
                id: id.to_string(),
                field: field.to_string(),
                source,
            })
    }
}

fn required(id: &str, field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField {
        id: id.to_string(),
        field,
    })
}

fn build_descriptor<P>(entry: WorkerEntry, cipher: &mut LazyCipher<P>) -> Result<WorkerDescriptor, ConfigError>
where
    P: FnMut() -> Option<String>,
{
    let id = entry.id;
    let host = cipher.resolve(&id, "host", entry.host, entry.encrypted_host)?;
    let user = cipher.resolve(&id, "user", entry.user, entry.encrypted_user)?;
    let password = cipher.resolve(&id, "password", entry.password, entry.encrypted_password)?;
    let private_key = cipher.resolve(&id, "privateKeyPath", entry.private_key_path, entry.encrypted_private_key_path)?;
    let start = cipher.resolve(&id, "startCommand", entry.start_command, entry.encrypted_start_command)?;
    let stop = cipher.resolve(&id, "stopCommand", entry.stop_command, entry.encrypted_stop_command)?;
    let log = cipher.resolve(&id, "logCommand", entry.log_command, entry.encrypted_log_command)?;

    let host = required(&id, "host", host)?;
    let user = required(&id, "user", user)?;
    let start = required(&id, "startCommand", start)?;

    let credential = match (private_key, password) {
        (Some(path), _) => Credential::PrivateKey(PathBuf::from(path)),
        (None, Some(password)) => Credential::Password(password),
        (None, None) => return Err(ConfigError::MissingCredential(id)),
    };

    Ok(WorkerDescriptor {
        connection: ConnectionDescriptor::new(&host, entry.port, &user, credential),
        commands: CommandTemplates { start, stop, log },
        id,
    })
}

/// Parse le document et résout les champs sensibles
///
/// `prompt` n'est appelé que si un champ chiffré est rencontré sans passphrase fournie.
pub fn parse_fleet<P>(text: &str, passphrase: Option<String>, prompt: P) -> Result<Vec<WorkerDescriptor>, ConfigError>
where
    P: FnMut() -> Option<String>,
{
    let document: FarmDocument = serde_json::from_str(text)?;
    let mut cipher = LazyCipher {
        passphrase,
        prompt,
        cipher: None,
    };

    let mut descriptors = Vec::with_capacity(document.miners.len());
    for entry in document.miners {
        if descriptors.iter().any(|d: &WorkerDescriptor| d.id == entry.id) {
            return Err(ConfigError::DuplicateId(entry.id));
        }
        let descriptor = build_descriptor(entry, &mut cipher)?;
        debug!("[{}] Loaded worker {}", descriptor.id, descriptor.connection.destination());
        descriptors.push(descriptor);
    }

    Ok(descriptors)
}

/// Charge le fichier de ferme
pub async fn load_fleet<P>(path: &Path, passphrase: Option<String>, prompt: P) -> Result<Vec<WorkerDescriptor>, ConfigError>
where
    P: FnMut() -> Option<String>,
{
    let text = tokio::fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let descriptors = parse_fleet(&text, passphrase, prompt)?;
    info!("Loaded {} worker(s) from {}", descriptors.len(), path.display());
    Ok(descriptors)
}

/// Demande la passphrase au terminal (saisie masquée)
pub fn prompt_passphrase() -> Option<String> {
    let input = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Farm configuration file password")
        .allow_empty_password(true)
        .interact()
        .map_err(|e| warn!("Passphrase prompt failed: {}", e))
        .ok()?;
    non_empty(input)
}

fn non_empty(input: String) -> Option<String> {
    if input.is_empty() {
        None
    } else {
        Some(input)
    }
}

fn entries_mut(document: &mut Value) -> Result<&mut Vec<Value>, ConfigError> {
    let key = if document.get("miners").is_some() { "miners" } else { "workers" };
    document
        .get_mut(key)
        .and_then(Value::as_array_mut)
        .ok_or(ConfigError::NoWorkerList)
}

fn entry_id(entry: &Value) -> String {
    entry.get("id").and_then(Value::as_str).unwrap_or("?").to_string()
}

/// Chiffre chaque champ sensible en clair qui n'a pas déjà sa variante chiffrée
pub fn encrypt_document(document: &mut Value, cipher: &FieldCipher) -> Result<usize, ConfigError> {
    let mut count = 0;
    for entry in entries_mut(document)? {
        let Some(object) = entry.as_object_mut() else { continue };
        for field in SENSITIVE_FIELDS {
            let encrypted_field = encrypted_name(field);
            if object.contains_key(&encrypted_field) {
                continue;
            }
            if let Some(Value::String(plain)) = object.get(field) {
                let encrypted = cipher.encrypt(plain);
                object.remove(field);
                object.insert(encrypted_field, Value::String(encrypted));
                count += 1;
            }
        }
    }
    Ok(count)
}

/// Inverse de `encrypt_document`
pub fn decrypt_document(document: &mut Value, cipher: &FieldCipher) -> Result<usize, ConfigError> {
    let mut count = 0;
    for entry in entries_mut(document)? {
        let id = entry_id(entry);
        let Some(object) = entry.as_object_mut() else { continue };
        for field in SENSITIVE_FIELDS {
            if object.contains_key(field) {
                continue;
            }
            let encrypted_field = encrypted_name(field);
            if let Some(Value::String(encrypted)) = object.get(&encrypted_field) {
                let plain = cipher.decrypt(encrypted).map_err(|source| ConfigError::Crypto {
                    id: id.clone(),
                    field: field.to_string(),
                    source,
                })?;
                object.remove(&encrypted_field);
                object.insert(field.to_string(), Value::String(plain));
                count += 1;
            }
        }
    }
    Ok(count)
}
