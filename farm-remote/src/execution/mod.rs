//! Remote command execution for farm workers
//!
//! Handles the transport between the coordinator and a miner host:
//! - Connection descriptor (host, port, user, one credential)
//! - `RemoteController` trait, the only seam the scheduler and registry see
//! - SSH implementation driving the system `ssh` client with a hard timeout

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Default SSH port when neither `port` nor `host:port` is configured
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Errors reported by a remote controller
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("cannot reach {host}: {reason}")]
    Connectivity { host: String, reason: String },
    #[error("command on {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },
    #[error("remote command failed on {host}: {stderr}")]
    Execution { host: String, stderr: String },
}

/// Authentication material for one worker
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    PrivateKey(PathBuf),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => write!(f, "Password(***)"),
            Self::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
        }
    }
}

/// Everything needed to open a session on a worker host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
}

impl ConnectionDescriptor {
    /// Builds a descriptor, splitting an optional `host:port` suffix
    pub fn new(host: &str, port: Option<u16>, user: &str, credential: Credential) -> Self {
        let (host, inline_port) = match host.rsplit_once(':') {
            Some((name, p)) => match p.trim().parse::<u16>() {
                Ok(p) => (name.trim().to_string(), Some(p)),
                Err(_) => (host.trim().to_string(), None),
            },
            None => (host.trim().to_string(), None),
        };

        Self {
            host,
            port: port.or(inline_port).unwrap_or(DEFAULT_SSH_PORT),
            user: user.to_string(),
            credential,
        }
    }

    /// `user@host` form used by ssh and in logs
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Raw output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Output with an empty error stream
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self::new(stdout, "")
    }

    pub fn has_error(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

/// Executes a command string on a worker host
///
/// Implementations must honour `timeout`: it is the only bound on a hung remote call
/// besides the refresh pool's own job timeout.
#[async_trait]
pub trait RemoteController: Send + Sync {
    async fn execute(
        &self,
        target: &ConnectionDescriptor,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError>;
}

/// Remote controller driving the system OpenSSH client
///
/// Password credentials go through `sshpass -e` (the password travels in the
/// `SSHPASS` environment variable, never on the command line).
#[derive(Debug, Clone)]
pub struct SshController {
    extra_options: Vec<String>,
    sshpass: PathBuf,
}

/// ssh exit code for connection-level failures
const SSH_CONNECTION_FAILURE: i32 = 255;
/// sshpass exit codes: login refused before the command ran
const SSHPASS_INVALID_PASSWORD: i32 = 5;
const SSHPASS_UNKNOWN_HOST_KEY: i32 = 6;

/// Why the session never reached the remote shell, if the exit code says so
fn connection_failure(credential: &Credential, code: Option<i32>) -> Option<&'static str> {
    match (credential, code?) {
        (_, SSH_CONNECTION_FAILURE) => Some("ssh connection failed"),
        (Credential::Password(_), SSHPASS_INVALID_PASSWORD) => Some("password rejected"),
        (Credential::Password(_), SSHPASS_UNKNOWN_HOST_KEY) => Some("host public key is unknown"),
        _ => None,
    }
}

impl SshController {
    pub fn new() -> Self {
        Self {
            extra_options: Vec::new(),
            sshpass: PathBuf::from("sshpass"),
        }
    }

    /// Extra ssh arguments, shell-word split (ex: `-o StrictHostKeyChecking=no`)
    pub fn with_options(options: &str) -> Result<Self, shell_words::ParseError> {
        Ok(Self {
            extra_options: shell_words::split(options)?,
            ..Self::new()
        })
    }

    #[cfg(test)]
    fn with_sshpass(mut self, program: PathBuf) -> Self {
        self.sshpass = program;
        self
    }

    fn build_command(&self, target: &ConnectionDescriptor, command: &str) -> AsyncCommand {
        let mut cmd = match &target.credential {
            Credential::Password(password) => {
                let mut cmd = AsyncCommand::new(&self.sshpass);
                cmd.arg("-e").arg("ssh").env("SSHPASS", password);
                cmd
            }
            Credential::PrivateKey(path) => {
                let mut cmd = AsyncCommand::new("ssh");
                cmd.arg("-i").arg(path).args(["-o", "BatchMode=yes"]);
                cmd
            }
        };

        cmd.args(["-p", &target.port.to_string()])
            .args(&self.extra_options)
            // client warnings ("Permanently added ...") would read as remote stderr
            .args(["-o", "LogLevel=ERROR"])
            .arg(target.destination())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for SshController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteController for SshController {
    async fn execute(
        &self,
        target: &ConnectionDescriptor,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        let start_time = Instant::now();
        debug!("Executing on {}: {} (timeout: {:?})", target.destination(), command, timeout);

        let output = tokio::time::timeout(timeout, self.build_command(target, command).output())
            .await
            .map_err(|_| RemoteError::Timeout {
                host: target.host.clone(),
                timeout,
            })?
            .map_err(|e| RemoteError::Connectivity {
                host: target.host.clone(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if let Some(failure) = connection_failure(&target.credential, output.status.code()) {
            let reason = match stderr.trim() {
                "" => failure.to_string(),
                message => format!("{}: {}", failure, message),
            };
            return Err(RemoteError::Connectivity {
                host: target.host.clone(),
                reason,
            });
        }

        debug!(
            "Command on {} finished in {}ms",
            target.destination(),
            start_time.elapsed().as_millis()
        );
        Ok(CommandOutput { stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Credential {
        Credential::PrivateKey(PathBuf::from("/home/farm/.ssh/id_rsa"))
    }

    #[test]
    fn test_host_port_parsing() {
        let plain = ConnectionDescriptor::new("10.0.0.5", None, "miner", key());
        assert_eq!(plain.host, "10.0.0.5");
        assert_eq!(plain.port, DEFAULT_SSH_PORT);

        let inline = ConnectionDescriptor::new("10.0.0.5:2222", None, "miner", key());
        assert_eq!(inline.host, "10.0.0.5");
        assert_eq!(inline.port, 2222);

        let explicit = ConnectionDescriptor::new("10.0.0.5:2222", Some(2200), "miner", key());
        assert_eq!(explicit.port, 2200);
        assert_eq!(explicit.destination(), "miner@10.0.0.5");
    }

    #[test]
    fn test_password_is_redacted() {
        let debug = format!("{:?}", Credential::Password("hunter2".into()));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_ssh_invocation() {
        let controller = SshController::with_options("-o StrictHostKeyChecking=no").unwrap();
        let target = ConnectionDescriptor::new("rig1:2022", None, "miner", key());
        let cmd = controller.build_command(&target, "ps faux | grep mochi");
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "ssh");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2022"));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"LogLevel=ERROR".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("ps faux | grep mochi"));
    }

    #[test]
    fn test_password_goes_through_sshpass() {
        let controller = SshController::new();
        let target = ConnectionDescriptor::new("rig1", None, "miner", Credential::Password("pw".into()));
        let cmd = controller.build_command(&target, "uptime");
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "sshpass");
        assert!(std_cmd
            .get_envs()
            .any(|(k, v)| k == "SSHPASS" && v.map(|v| v == "pw").unwrap_or(false)));
    }

    #[cfg(unix)]
    fn fake_sshpass(dir: &std::path::Path, name: &str, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sshpass_login_failures_are_connectivity_errors() {
        let dir = tempfile::tempdir().unwrap();
        let target = ConnectionDescriptor::new("rig1", None, "miner", Credential::Password("pw".into()));

        for code in [SSHPASS_INVALID_PASSWORD, SSHPASS_UNKNOWN_HOST_KEY] {
            let program = fake_sshpass(dir.path(), &format!("sshpass-{}", code), &format!("exit {}", code));
            let controller = SshController::new().with_sshpass(program);

            let result = controller
                .execute(&target, "ps faux | grep mochi", Duration::from_secs(5))
                .await;
            assert!(
                matches!(result, Err(RemoteError::Connectivity { ref host, .. }) if host == "rig1"),
                "exit {} gave {:?}",
                code,
                result
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remote_exit_codes_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        // grep exits 1 when nothing matches
        let program = fake_sshpass(dir.path(), "sshpass", "echo listing; exit 1");
        let controller = SshController::new().with_sshpass(program);
        let target = ConnectionDescriptor::new("rig1", None, "miner", Credential::Password("pw".into()));

        let output = controller
            .execute(&target, "ps faux | grep mochi", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output, CommandOutput::stdout("listing\n"));
    }

    #[test]
    fn test_exit_codes_by_credential() {
        let password = Credential::Password("pw".into());
        assert!(connection_failure(&password, Some(5)).is_some());
        assert!(connection_failure(&password, Some(6)).is_some());
        assert!(connection_failure(&password, Some(1)).is_none());
        assert!(connection_failure(&key(), Some(5)).is_none());
        assert!(connection_failure(&key(), Some(255)).is_some());
        assert!(connection_failure(&key(), None).is_none());
    }

    #[test]
    fn test_command_output_error_detection() {
        assert!(!CommandOutput::stdout("ok").has_error());
        assert!(!CommandOutput::new("ok", "  \n").has_error());
        assert!(CommandOutput::new("", "permission denied").has_error());
    }
}
