//! farm-crypt - encrypts and decrypts sensitive values of a farm file
//!
//! `farm-crypt field <value>` prints one encrypted value, `farm-crypt file farm.json out.json`
//! encrypts every sensitive field of every miner. `--decrypt` reverses both.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use farm_kernel::cipher::FieldCipher;
use farm_kernel::config::{decrypt_document, encrypt_document, prompt_passphrase};
use farm_kernel::logging;
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "farm-crypt", version, about = "Farm configuration encryption tool")]
struct Cli {
    /// Passphrase (prompted if absent)
    #[arg(long, global = true, env = "FARM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encrypt or decrypt a single value
    Field {
        #[arg(short, long)]
        decrypt: bool,
        input: String,
    },
    /// Encrypt or decrypt every sensitive field of a farm file
    File {
        #[arg(short, long)]
        decrypt: bool,
        config: PathBuf,
        output: PathBuf,
    },
}

fn main() {
    dotenvy::dotenv().ok();
    logging::init("INFO");

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let Some(passphrase) = cli.password.or_else(prompt_passphrase) else {
        bail!("a passphrase is required");
    };
    let cipher = FieldCipher::new(&passphrase);

    match cli.command {
        Command::Field { decrypt: false, input } => println!("{}", cipher.encrypt(&input)),
        Command::Field { decrypt: true, input } => println!("{}", cipher.decrypt(&input)?),
        Command::File { decrypt, config, output } => {
            let text = std::fs::read_to_string(&config)
                .with_context(|| format!("cannot read {}", config.display()))?;
            let mut document: Value = serde_json::from_str(&text).context("invalid farm file")?;

            let count = if decrypt {
                decrypt_document(&mut document, &cipher)?
            } else {
                encrypt_document(&mut document, &cipher)?
            };

            info!("Writing output file {} ({} field(s))", output.display(), count);
            std::fs::write(&output, serde_json::to_string_pretty(&document)?)
                .with_context(|| format!("cannot write {}", output.display()))?;

            if !decrypt {
                println!(
                    "####### DO NOT LEAVE SENSITIVE DATA IN PLAIN TEXT. DELETE {} IMMEDIATELY #######",
                    config.display()
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_devkit::fleet_config;

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("farm.json");
        let encrypted = dir.path().join("farm.enc.json");
        let restored = dir.path().join("farm.plain.json");
        std::fs::write(&plain, fleet_config(&["rig-1"]).to_string()).unwrap();

        let cli = |args: &[&str]| {
            let mut argv = vec!["farm-crypt", "--password", "pw"];
            argv.extend_from_slice(args);
            Cli::try_parse_from(argv).unwrap()
        };

        run(cli(&["file", plain.to_str().unwrap(), encrypted.to_str().unwrap()])).unwrap();
        let document: Value = serde_json::from_str(&std::fs::read_to_string(&encrypted).unwrap()).unwrap();
        assert!(document["miners"][0].get("encryptedPassword").is_some());
        assert!(document["miners"][0].get("password").is_none());

        run(cli(&["file", "--decrypt", encrypted.to_str().unwrap(), restored.to_str().unwrap()])).unwrap();
        let document: Value = serde_json::from_str(&std::fs::read_to_string(&restored).unwrap()).unwrap();
        assert_eq!(document, fleet_config(&["rig-1"]));
    }

    #[test]
    fn test_field_arguments() {
        let cli = Cli::try_parse_from(["farm-crypt", "field", "--decrypt", "abc", "--password", "pw"]).unwrap();
        assert_eq!(cli.password.as_deref(), Some("pw"));
        assert!(matches!(cli.command, Command::Field { decrypt: true, ref input } if input == "abc"));
    }
}
