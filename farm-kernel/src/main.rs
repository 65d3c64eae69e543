/**
 * FARM KERNEL - Point d'entrée principal du coordinateur
 *
 * RÔLE : Orchestration de tous les modules : config, SSH, scheduler, registry, HTTP.
 * Bootstrap du système complet avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : Scheduler de statistiques + pool de jobs isolés + API REST.
 * Toute erreur de configuration est fatale : rien n'est servi.
 */

use anyhow::{Context, Result};
use clap::Parser;
use farm_kernel::config::{load_fleet, prompt_passphrase};
use farm_kernel::http::{build_router, AppState};
use farm_kernel::{logging, FleetRegistry, Roster, SchedulerConfig, StatisticsScheduler};
use farm_remote::{MochimoExtractor, SshController, WorkerFactory, WorkerSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Mochimo farm manager
#[derive(Debug, Parser)]
#[command(name = "farm-kernel", version, about)]
struct Cli {
    /// Directory holding the dashboard HTML pages
    html_repository: PathBuf,

    /// Farm configuration file (JSON)
    farm_file: PathBuf,

    /// Passphrase for encrypted fields (prompted if needed and absent)
    #[arg(long = "password", env = "FARM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Address to bind
    #[arg(short, long, default_value = "127.0.0.1:80")]
    bind: String,

    /// Number of HTTP worker threads
    #[arg(long, default_value_t = 5)]
    http_parallelism: usize,

    /// Number of concurrent statistics jobs
    #[arg(long, default_value_t = 3)]
    stat_parallelism: usize,

    /// Seconds between two statistics refreshes of a worker
    #[arg(long, default_value_t = 30)]
    stat_heartbeat: u64,

    /// Log level (DEBUG, INFO, WARN, WARNING, ERROR)
    #[arg(long, default_value = "INFO")]
    log_level: String,

    /// Timeout of a single remote command, in seconds
    #[arg(long, default_value_t = 20)]
    command_timeout: u64,

    /// Hard timeout of a whole refresh job, in seconds
    #[arg(long, default_value_t = 120)]
    job_timeout: u64,

    /// Pause between start/stop and the process check, in seconds
    #[arg(long, default_value_t = 3)]
    settle: u64,

    /// Name fragment matching the miner processes
    #[arg(long, default_value = "mochi")]
    process_pattern: String,

    /// Extra ssh arguments (ex: "-o StrictHostKeyChecking=no")
    #[arg(long, env = "FARM_SSH_OPTIONS")]
    ssh_options: Option<String>,
}

fn main() {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.http_parallelism.max(1))
        .enable_all()
        .build();

    let result = runtime
        .context("failed to build tokio runtime")
        .and_then(|runtime| runtime.block_on(run(cli)));

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let descriptors = load_fleet(&cli.farm_file, cli.password.clone(), prompt_passphrase)
        .await
        .with_context(|| format!("cannot load farm file {}", cli.farm_file.display()))?;
    let roster = Roster::new(descriptors)?;

    let controller = match &cli.ssh_options {
        Some(options) => SshController::with_options(options).context("invalid --ssh-options")?,
        None => SshController::new(),
    };
    let settings = WorkerSettings {
        command_timeout: Duration::from_secs(cli.command_timeout),
        settle: Duration::from_secs(cli.settle),
        process_pattern: cli.process_pattern.clone(),
    };
    let factory = WorkerFactory::new(Arc::new(controller), Arc::new(MochimoExtractor::new()), settings);

    let scheduler = StatisticsScheduler::new(
        roster.clone(),
        Arc::new(factory.clone()),
        SchedulerConfig {
            parallelism: cli.stat_parallelism,
            heartbeat: Duration::from_secs(cli.stat_heartbeat),
            tick: None,
            job_timeout: Duration::from_secs(cli.job_timeout),
        },
    );
    let registry = Arc::new(FleetRegistry::new(roster, scheduler.clone(), factory));

    let app = build_router(AppState {
        registry,
        html_dir: Arc::new(cli.html_repository.clone()),
    });

    let listener = TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("cannot bind {}", cli.bind))?;

    scheduler.start();
    info!("Listening on http://{}", cli.bind);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown requested");
        })
        .await;

    scheduler.stop().await;
    info!("HTTP server stopped");
    served.context("HTTP server failed")
}
