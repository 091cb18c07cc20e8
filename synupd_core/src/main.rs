/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::main
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Entry point for Syn-Upd Core. Checks the update server for a
    newer build of the tracked application, shows its change
    log, downloads the artifact, and runs periodic checks.

  Security / Safety Notes:
    Operates within user privileges. Performs HTTPS GET requests
    and runs only the operator-configured argv commands.

  Dependencies:
    clap for CLI parsing, chrono for timestamps, tokio runtime.

  Operational Scope:
    Invoked interactively or as a long-running user service
    (`daemon`).

  Revision History:
    2025-11-12 COD  Authored Syn-Upd update checker.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling with deterministic exits
    - Structured logging following Synavera cadence
    - Configurable execution via CLI and config file
============================================================*/

mod changelog;
mod check;
mod client;
mod config;
mod decision;
mod download;
mod error;
mod installed;
mod logger;
mod manifest;
mod notify;
mod schedule;
mod state;
mod version;

use std::path::{Path, PathBuf};
use std::process::{ExitCode, Stdio};
use std::sync::Arc;

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use check::Checker;
use client::{ArtifactSource, ManifestSource, UpdateClient};
use config::SynupdConfig;
use decision::{Channel, UpdateStatus};
use download::DownloadTask;
use error::{Result, SynupdError};
use installed::{map_spawn_error, InstalledSource};
use logger::Logger;
use notify::notifier_for;
use schedule::{register, run_periodic, Registration, SchedulePolicy};
use state::StateStore;

/// Command-line arguments for Syn-Upd-Core.
#[derive(Debug, Parser)]
#[command(
    name = "Syn-Upd-Core",
    version,
    author = "Synavera Systems",
    about = "Update checker and artifact fetcher for a tracked application"
)]
struct Cli {
    /// Override configuration file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Release channel: stable, beta or both.
    #[arg(long, global = true, value_name = "CHANNEL")]
    channel: Option<Channel>,
    /// Treat this string as the installed version.
    #[arg(long, global = true, value_name = "VERSION")]
    installed: Option<String>,
    /// Explicit log file path.
    #[arg(long, global = true, value_name = "PATH")]
    log: Option<PathBuf>,
    /// Enable verbose logging to stderr.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Compare the installed build with the advertised one.
    Check,
    /// Print release notes for the advertised build.
    Changelog,
    /// Download the advertised build.
    Download {
        /// Download even when the installed build is current.
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
        /// Run the configured install command on the downloaded file.
        #[arg(long, action = ArgAction::SetTrue)]
        install: bool,
    },
    /// Run periodic checks until interrupted.
    Daemon,
    /// Register the periodic schedule and report whether it changed.
    Schedule,
}

/// Per-invocation collaborators.
struct Session {
    config: SynupdConfig,
    channel: Channel,
    installed: InstalledSource,
    client: UpdateClient,
    store: StateStore,
    logger: Arc<Logger>,
}

impl Session {
    fn checker(&self) -> Checker {
        Checker::new(
            self.installed.clone(),
            Arc::new(self.client.clone()),
            self.channel,
            notifier_for(&self.config.notify.command, self.logger.clone()),
            self.logger.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) if err.is_cancelled() => err.exit_code(),
        Err(err) => {
            eprintln!("[Syn-Upd-Core] {}", err);
            err.exit_code()
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = SynupdConfig::load_from_optional_path(cli.config.as_deref())?;

    let session_stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let log_path = cli
        .log
        .clone()
        .unwrap_or_else(|| config.log_dir().join(format!("core_{session_stamp}.log")));
    let logger = Arc::new(Logger::new(Some(log_path), cli.verbose)?);
    logger.info("INIT", "Syn-Upd Core awakening.");

    let channel = cli.channel.unwrap_or(config.channel);
    let installed = InstalledSource::resolve(cli.installed.as_deref(), &config.installed);
    let client = UpdateClient::new(&config.http, &config.endpoints, logger.clone())?;
    let store = StateStore::new(config.state_file());
    let session = Session {
        config,
        channel,
        installed,
        client,
        store,
        logger: logger.clone(),
    };

    let outcome = match cli.command {
        Cmd::Check => run_check(&session).await,
        Cmd::Changelog => run_changelog(&session).await,
        Cmd::Download { force, install } => run_download(&session, force, install).await,
        Cmd::Daemon => run_daemon(&session).await,
        Cmd::Schedule => run_schedule(&session),
    };

    match &outcome {
        Ok(_) => logger.info("COMPLETE", "Session complete."),
        Err(err) if err.is_cancelled() => logger.info("CANCEL", "Cancelled by operator."),
        Err(err) => logger.error("FAILED", err.to_string()),
    }
    logger.finalize()?;
    outcome
}

async fn run_check(session: &Session) -> Result<ExitCode> {
    let checker = session.checker();
    let report = checker.run().await?;
    println!(
        "→ Installed {} · Available ({}) {} · {}",
        report.installed,
        session.channel,
        report.available.describe(),
        report.status
    );
    if let Some(notes) = checker.release_notes(&report).await {
        print_changelog(&notes);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_changelog(notes: &str) {
    if notes.is_empty() {
        println!("(no change log published)");
    } else {
        println!("{notes}");
    }
}

async fn run_changelog(session: &Session) -> Result<ExitCode> {
    let available = session.client.fetch_available(session.channel).await?;
    if available.is_none() {
        println!("→ No release is currently advertised.");
        return Ok(ExitCode::SUCCESS);
    }
    let notes = session.client.fetch_changelog(&available).await;
    println!("→ {}", available.describe());
    print_changelog(&notes);
    Ok(ExitCode::SUCCESS)
}

async fn run_download(session: &Session, force: bool, install: bool) -> Result<ExitCode> {
    let report = session.checker().run().await?;
    match report.status {
        UpdateStatus::NoData => {
            println!("→ Nothing to download ({}).", report.status);
            return Ok(ExitCode::SUCCESS);
        }
        UpdateStatus::UpToDate if !force => {
            println!("→ Installed build {} is current.", report.installed);
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let source: Arc<dyn ArtifactSource> = Arc::new(session.client.clone());
    let task = DownloadTask::start(
        source,
        session.store.clone(),
        report.available.clone(),
        &session.config.endpoints.download_base,
        &session.config.cache_dir(),
        session.logger.clone(),
    )?;
    println!(
        "→ Downloading {} to {}",
        task.version().format(),
        task.save_path().display()
    );

    let mut progress = task.progress();
    let mut state = task.state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                task.cancel();
                break;
            }
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *progress.borrow_and_update();
                match current.percent() {
                    Some(percent) => eprint!("\r   {percent:>3}% ({} bytes)", current.bytes_done),
                    None => eprint!("\r   {} bytes", current.bytes_done),
                }
            }
            changed = state.changed() => {
                if changed.is_err() || state.borrow_and_update().is_terminal() {
                    break;
                }
            }
        }
    }
    eprintln!();

    let outcome = task.wait().await?;
    println!(
        "→ Saved {} ({} bytes)",
        outcome.path.display(),
        outcome.bytes
    );

    if install {
        run_install(session, &outcome.path).await?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_install(session: &Session, artifact: &Path) -> Result<()> {
    let argv = &session.config.install.command;
    let Some((program, args)) = argv.split_first() else {
        println!("→ No install command configured; install {} manually.", artifact.display());
        return Ok(());
    };

    session
        .logger
        .info("INSTALL", format!("Running {program} on {}", artifact.display()));
    let output = Command::new(program)
        .args(args)
        .arg(artifact)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|err| map_spawn_error(err, program))?;

    if !output.status.success() {
        return Err(SynupdError::CommandFailure {
            command: argv.join(" "),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    session.logger.info("INSTALL", "Install command finished");
    Ok(())
}

async fn run_daemon(session: &Session) -> Result<ExitCode> {
    let check = &session.config.check;
    if !check.enabled {
        session
            .logger
            .info("DAEMON", "Periodic checks disabled by configuration");
        return Ok(ExitCode::SUCCESS);
    }

    let now_ms = Utc::now().timestamp_millis();
    let registration = register(&session.store, check.interval_minutes, now_ms)?;
    report_registration(session, registration);

    let policy = SchedulePolicy::from_config(
        check,
        Some(session.config.endpoints.stable_manifest_url()),
    )
    .resume(registration, now_ms);
    if !policy.first_run.is_zero() {
        session.logger.info(
            "DAEMON",
            format!("First check in {} min", policy.first_run.as_secs() / 60),
        );
    }
    let trigger = Arc::new(Notify::new());
    let shutdown = CancellationToken::new();
    spawn_signal_listeners(trigger.clone(), shutdown.clone(), session.logger.clone());

    run_periodic(
        session.checker(),
        policy,
        session.logger.clone(),
        trigger,
        shutdown,
    )
    .await?;
    Ok(ExitCode::SUCCESS)
}

fn run_schedule(session: &Session) -> Result<ExitCode> {
    let registration = register(
        &session.store,
        session.config.check.interval_minutes,
        Utc::now().timestamp_millis(),
    )?;
    report_registration(session, registration);
    let record = match registration {
        Registration::Kept(record) | Registration::Registered(record) => record,
    };
    let verb = match registration {
        Registration::Kept(_) => "kept",
        Registration::Registered(_) => "registered",
    };
    println!(
        "→ Schedule {verb}: every {} min (set {}) in {}",
        record.interval_minutes,
        chrono::DateTime::from_timestamp_millis(record.set_at_ms)
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| record.set_at_ms.to_string()),
        session.store.path().display()
    );
    Ok(ExitCode::SUCCESS)
}

fn report_registration(session: &Session, registration: Registration) {
    match registration {
        Registration::Kept(record) => session.logger.debug(
            "SCHEDULE",
            format!("Existing schedule kept ({} min)", record.interval_minutes),
        ),
        Registration::Registered(record) => session.logger.info(
            "SCHEDULE",
            format!("Schedule registered ({} min)", record.interval_minutes),
        ),
    }
}

/// Ctrl-C stops the daemon; SIGUSR1 requests an immediate check.
fn spawn_signal_listeners(trigger: Arc<Notify>, shutdown: CancellationToken, logger: Arc<Logger>) {
    let stop = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut user1 = match signal(SignalKind::user_defined1()) {
            Ok(stream) => stream,
            Err(err) => {
                logger.warn("SIGNAL", format!("SIGUSR1 unavailable: {err}"));
                return;
            }
        };
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = user1.recv() => {
                    if received.is_none() {
                        break;
                    }
                    trigger.notify_one();
                }
            }
        }
    });

    #[cfg(not(unix))]
    let _ = (trigger, logger);
}
