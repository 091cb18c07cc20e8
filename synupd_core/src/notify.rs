/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::notify
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Raise and clear the operator-facing "update available"
    notification.

  Security / Safety Notes:
    The optional notification command receives the title and
    version as separate argv entries; no shell interpolation.

  Dependencies:
    async-trait for the notifier seam, tokio::process.

  Operational Scope:
    Invoked by the check job after every decision.

  Revision History:
    2025-11-12 COD  Added notifier abstraction.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Notification failures are logged, never fatal
============================================================*/

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::logger::Logger;
use crate::manifest::AvailableVersion;

pub const NOTIFICATION_TITLE: &str = "Update available";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, version: &AvailableVersion);
    async fn cancel(&self);
}

/// Prints to stdout and records the event in the session log.
pub struct ConsoleNotifier {
    logger: Arc<Logger>,
}

impl ConsoleNotifier {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn show(&self, version: &AvailableVersion) {
        println!("→ {NOTIFICATION_TITLE}: {}", version.describe());
        self.logger
            .info("NOTIFY", format!("Shown for {}", version.format()));
    }

    async fn cancel(&self) {
        self.logger.debug("NOTIFY", "Cleared");
    }
}

/// Runs `argv + [title, version]`, e.g. `notify-send`.
pub struct CommandNotifier {
    argv: Vec<String>,
    logger: Arc<Logger>,
}

impl CommandNotifier {
    pub fn new(argv: Vec<String>, logger: Arc<Logger>) -> Self {
        Self { argv, logger }
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn show(&self, version: &AvailableVersion) {
        let Some((program, args)) = self.argv.split_first() else {
            return;
        };
        let status = Command::new(program)
            .args(args)
            .arg(NOTIFICATION_TITLE)
            .arg(version.format())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => self
                .logger
                .info("NOTIFY", format!("Shown for {}", version.format())),
            Ok(status) => self
                .logger
                .warn("NOTIFY", format!("{program} exited with {status}")),
            Err(err) => self
                .logger
                .warn("NOTIFY", format!("Failed to run {program}: {err}")),
        }
    }

    async fn cancel(&self) {
        // Desktop notifications expire on their own.
        self.logger.debug("NOTIFY", "Cleared");
    }
}

/// Pick the notifier for the configured command, falling back to the console.
pub fn notifier_for(argv: &[String], logger: Arc<Logger>) -> Arc<dyn Notifier> {
    if argv.is_empty() {
        Arc::new(ConsoleNotifier::new(logger))
    } else {
        Arc::new(CommandNotifier::new(argv.to_vec(), logger))
    }
}
