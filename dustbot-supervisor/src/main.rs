//! The worker supervisor: owns the configured worker processes, reacts to
//! `command.system` from the broadcaster and to live/offline signals, and
//! re-execs itself through the host service manager for self-update.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use dustbot_bus::{BusClient, Delivery};
use dustbot_common::envelope::Envelope;
use dustbot_common::error::{Error, Result};
use dustbot_common::topics;
use dustbot_core::caller;
use dustbot_core::logging::{BusLogLevel, BusLogger, init_tracing};

use dustbot_supervisor::control::{self, ServiceAction, SystemCommand};
use dustbot_supervisor::table::{StartOutcome, WorkerTable};
use dustbot_supervisor::workers;

const DEFAULT_WORKERS: &[&str] = &[
    "system_logger",
    "chat_logger",
    "command_logger",
    "gamble",
    "invest",
    "collect",
    "fight",
    "accept",
];

const REAP_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "dustbot-supervisor")]
#[command(author, version, about = "dustbot worker supervisor")]
struct Args {
    /// Bus broker address, also passed to every spawned worker.
    #[arg(long, default_value = "127.0.0.1:7379")]
    bus: String,

    /// Comma-separated worker names overriding the built-in list.
    #[arg(long)]
    workers: Option<String>,

    /// Root of the commands source tree used for worker registration.
    #[arg(long, default_value = "dustbot-commands/commands")]
    commands_dir: PathBuf,

    /// Service-manager unit that runs this supervisor (self-restart target).
    #[arg(long, default_value = "dustbot-manager.service")]
    unit: String,

    /// Assume the stream is offline at startup and leave workers stopped.
    #[arg(long, default_value = "false")]
    start_offline: bool,
}

struct Supervisor {
    bus: BusClient,
    logger: BusLogger,
    table: WorkerTable,
    unit: String,
    is_live: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let names: Vec<String> = match &args.workers {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        None => DEFAULT_WORKERS.iter().map(|s| s.to_string()).collect(),
    };

    let bus = BusClient::connect(&args.bus).await?;
    let logger = BusLogger::new(bus.clone(), "supervisor", BusLogLevel::Info);
    let launcher = workers::default_launcher(args.bus.clone(), args.commands_dir.clone());
    let table = WorkerTable::new(&names, launcher);

    let mut supervisor = Supervisor {
        bus: bus.clone(),
        logger,
        table,
        unit: args.unit.clone(),
        is_live: !args.start_offline,
    };

    let mut sub = bus
        .subscribe(&[
            topics::COMMAND_SYSTEM,
            topics::SYSTEM_USER_LIVE,
            topics::SYSTEM_USER_OFFLINE,
        ])
        .await?;

    supervisor
        .logger
        .log(BusLogLevel::Startup, "supervisor is online", caller!())
        .await;

    if supervisor.is_live {
        info!("assuming live on startup, starting all workers");
        supervisor.start_all().await;
    } else {
        info!("starting offline, workers stay stopped");
    }

    let mut reap_timer = tokio::time::interval(REAP_INTERVAL);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                delivery = sub.recv() => {
                    match delivery {
                        Some(delivery) => supervisor.handle_delivery(delivery).await,
                        None => {
                            error!("bus subscription closed, exiting");
                            break;
                        }
                    }
                }
                _ = reap_timer.tick() => supervisor.reap().await,
                _ = sigint.recv() => {
                    info!("SIGINT received");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received");
                    break;
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        loop {
            tokio::select! {
                delivery = sub.recv() => {
                    match delivery {
                        Some(delivery) => supervisor.handle_delivery(delivery).await,
                        None => break,
                    }
                }
                _ = reap_timer.tick() => supervisor.reap().await,
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    // every tracked child must be gone before we return
    info!("shutting down, stopping all workers");
    supervisor.stop_all().await;
    supervisor
        .logger
        .log(BusLogLevel::Info, "supervisor shut down", caller!())
        .await;
    if let Err(e) = bus.unsubscribe_all().await {
        warn!("unsubscribe on exit failed: {:?}", e);
    }
    Ok(())
}

impl Supervisor {
    async fn handle_delivery(&mut self, delivery: Delivery) {
        match delivery.topic.as_str() {
            topics::SYSTEM_USER_LIVE => {
                info!("stream went live, starting all workers");
                self.is_live = true;
                self.start_all().await;
            }
            topics::SYSTEM_USER_OFFLINE => {
                info!("stream went offline, stopping all workers");
                self.is_live = false;
                self.stop_all().await;
            }
            topics::COMMAND_SYSTEM => {
                let envelope =
                    match Envelope::decode_lenient(&delivery.topic, &delivery.payload) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            error!("malformed system command envelope: {:?}", e);
                            self.logger
                                .log(
                                    BusLogLevel::Error,
                                    format!("malformed system command: {e}"),
                                    caller!(),
                                )
                                .await;
                            return;
                        }
                    };
                self.handle_system_command(envelope).await;
            }
            other => {
                warn!("unexpected delivery on '{}'", other);
            }
        }
    }

    async fn handle_system_command(&mut self, envelope: Envelope) {
        let is_broadcaster = envelope
            .author
            .as_ref()
            .is_some_and(|author| author.broadcaster);
        if !is_broadcaster {
            self.reply("🚨 Only the broadcaster can use this command 🚨")
                .await;
            return;
        }

        let Some(command) = control::parse(&envelope.content) else {
            self.reply(&format!(
                "Unknown system command: {}",
                envelope.content.trim()
            ))
            .await;
            return;
        };

        match command {
            SystemCommand::Status => self.report_status().await,
            SystemCommand::GitPull => self.self_update().await,
            SystemCommand::SetLive => {
                self.is_live = true;
                self.logger
                    .log(BusLogLevel::Info, "manual override: set live", caller!())
                    .await;
                self.start_all().await;
            }
            SystemCommand::SetOffline => {
                self.is_live = false;
                self.logger
                    .log(BusLogLevel::Info, "manual override: set offline", caller!())
                    .await;
                self.stop_all().await;
            }
            SystemCommand::Service { action, target } => {
                self.apply_service_action(action, &target).await;
            }
        }
    }

    async fn apply_service_action(&mut self, action: ServiceAction, target: &str) {
        match target {
            "manager" => {
                self.logger
                    .log(
                        BusLogLevel::Info,
                        "stopping all workers before manager restart",
                        caller!(),
                    )
                    .await;
                self.stop_all().await;
                self.restart_manager().await;
            }
            "all" => match action {
                ServiceAction::Start => self.start_all().await,
                ServiceAction::Stop => self.stop_all().await,
                ServiceAction::Restart => {
                    self.stop_all().await;
                    self.start_all().await;
                }
            },
            name if self.table.is_configured(name) => match action {
                ServiceAction::Start => self.start_worker(name).await,
                ServiceAction::Stop => self.stop_worker(name).await,
                ServiceAction::Restart => {
                    self.stop_worker(name).await;
                    self.start_worker(name).await;
                }
            },
            unknown => {
                self.reply(&format!("Unknown worker: {unknown}")).await;
            }
        }
    }

    async fn start_worker(&mut self, name: &str) {
        self.logger
            .log(BusLogLevel::Info, format!("start {name}"), caller!())
            .await;
        match self.table.start(name).await {
            Ok(StartOutcome::Started(pid)) => {
                self.logger
                    .log(
                        BusLogLevel::Info,
                        format!("worker {name} started (pid {pid})"),
                        caller!(),
                    )
                    .await;
            }
            Ok(StartOutcome::AlreadyRunning(pid)) => {
                info!("worker '{}' already running (pid {})", name, pid);
            }
            Err(e) => {
                error!("failed to start '{}': {:?}", name, e);
                self.logger
                    .log(
                        BusLogLevel::Error,
                        format!("failed to start {name}: {e}"),
                        caller!(),
                    )
                    .await;
            }
        }
    }

    async fn stop_worker(&mut self, name: &str) {
        self.logger
            .log(BusLogLevel::Info, format!("stop {name}"), caller!())
            .await;
        if let Err(e) = self.table.stop(name).await {
            error!("failed to stop '{}': {:?}", name, e);
            self.logger
                .log(
                    BusLogLevel::Error,
                    format!("failed to stop {name}: {e}"),
                    caller!(),
                )
                .await;
        }
    }

    async fn start_all(&mut self) {
        for (name, outcome) in self.table.start_all().await {
            if let Err(e) = outcome {
                error!("failed to start '{}': {:?}", name, e);
                self.logger
                    .log(
                        BusLogLevel::Error,
                        format!("failed to start {name}: {e}"),
                        caller!(),
                    )
                    .await;
            }
        }
        self.logger
            .log(BusLogLevel::Info, "all workers started", caller!())
            .await;
    }

    async fn stop_all(&mut self) {
        for (name, outcome) in self.table.stop_all().await {
            if let Err(e) = outcome {
                error!("failed to stop '{}': {:?}", name, e);
            }
        }
        self.logger
            .log(BusLogLevel::Info, "all workers stopped", caller!())
            .await;
    }

    async fn reap(&mut self) {
        for (name, status) in self.table.reap() {
            warn!("worker '{}' exited unsupervised: {}", name, status);
            self.logger
                .log(
                    BusLogLevel::Warning,
                    format!("worker {name} exited unsupervised: {status}"),
                    caller!(),
                )
                .await;
        }
    }

    async fn report_status(&mut self) {
        let git = match git_status().await {
            Ok(status) => status,
            Err(e) => format!("git status failed: {e}"),
        };
        let workers: Vec<String> = self
            .table
            .statuses()
            .into_iter()
            .map(|status| match status.pid {
                Some(pid) => format!("{} {} (pid {})", status.name, status.state.as_str(), pid),
                None => format!("{} {}", status.name, status.state.as_str()),
            })
            .collect();
        self.reply(&format!("Git: {git}")).await;
        self.reply(&format!("Workers: {}", workers.join(", "))).await;
    }

    /// Pull, rebuild, stop every child, then hand control to the service
    /// manager. Child cleanup must complete before the re-exec signal or the
    /// next instance sees orphans.
    async fn self_update(&mut self) {
        self.logger
            .log(BusLogLevel::Info, "self-update: git pull", caller!())
            .await;
        match git_pull().await {
            Ok(output) => {
                self.reply(&format!("Pulled: {output}")).await;
            }
            Err(e) => {
                error!("git pull failed: {:?}", e);
                self.logger
                    .log(BusLogLevel::Error, format!("git pull failed: {e}"), caller!())
                    .await;
                self.reply("git pull failed, staying on the current build").await;
                return;
            }
        }
        if let Err(e) = sync_dependencies().await {
            error!("workspace rebuild failed: {:?}", e);
            self.logger
                .log(
                    BusLogLevel::Error,
                    format!("workspace rebuild failed: {e}"),
                    caller!(),
                )
                .await;
            self.reply("rebuild failed, staying on the current build").await;
            return;
        }
        self.logger
            .log(
                BusLogLevel::Info,
                "stopping all workers before restart",
                caller!(),
            )
            .await;
        self.stop_all().await;
        self.restart_manager().await;
    }

    /// Detached `systemctl restart` so the new instance does not inherit
    /// our lifetime.
    async fn restart_manager(&mut self) {
        let spawned = tokio::process::Command::new("systemctl")
            .arg("restart")
            .arg(&self.unit)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(_) => {
                info!("restart command issued for '{}'", self.unit);
            }
            Err(e) => {
                error!("failed to issue restart for '{}': {:?}", self.unit, e);
                self.logger
                    .log(
                        BusLogLevel::Error,
                        format!("failed to restart {}: {e}", self.unit),
                        caller!(),
                    )
                    .await;
            }
        }
    }

    async fn reply(&self, text: &str) {
        if let Err(e) = self.bus.publish(topics::CHAT_SEND, text).await {
            error!("failed to send chat reply: {:?}", e);
        }
    }
}

async fn git_status() -> Result<String> {
    let output = tokio::process::Command::new("git")
        .args(["status", "--short", "--branch"])
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::Process(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn git_pull() -> Result<String> {
    let output = tokio::process::Command::new("git")
        .args(["pull", "--ff-only"])
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::Process(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// "Sync deps" for a Rust workspace means rebuilding the worker binaries
/// the new supervisor will spawn.
async fn sync_dependencies() -> Result<()> {
    let output = tokio::process::Command::new("cargo")
        .args(["build", "--workspace", "--release"])
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::Process(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(())
}
