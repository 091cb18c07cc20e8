/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::installed
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Determine which build of the tracked application is
    currently installed, either from a literal or by asking an
    external tool (e.g. `adb shell dumpsys package ...`).

  Security / Safety Notes:
    Executes the configured argv with user privileges only; no
    shell is involved and no privilege escalation is attempted.

  Dependencies:
    tokio::process for async command execution.

  Operational Scope:
    First step of every update check.

  Revision History:
    2025-11-12 COD  Replaced pacman inventory with installed-version query.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic command invocation with explicit checks
    - "Not installed" is data, a missing tool is an error
============================================================*/

use std::io;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::InstalledConfig;
use crate::error::{Result, SynupdError};
use crate::version::Version;

/// Marker printed by `dumpsys package` before the version name.
const VERSION_NAME_KEY: &str = "versionName=";

/// How the installed version is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstalledSource {
    Literal(String),
    Command(Vec<String>),
    Unknown,
}

impl InstalledSource {
    /// CLI literal wins over configured literal, which wins over a command.
    pub fn resolve(cli_literal: Option<&str>, config: &InstalledConfig) -> Self {
        if let Some(text) = cli_literal {
            return InstalledSource::Literal(text.to_string());
        }
        if let Some(text) = &config.version {
            return InstalledSource::Literal(text.clone());
        }
        if !config.command.is_empty() {
            return InstalledSource::Command(config.command.clone());
        }
        InstalledSource::Unknown
    }

    /// Installed version, or [`Version::NONE`] when the application is absent.
    pub async fn installed_version(&self) -> Result<Version> {
        match self {
            InstalledSource::Literal(text) => Ok(Version::parse(text)),
            InstalledSource::Command(argv) => query_command(argv).await,
            InstalledSource::Unknown => Ok(Version::NONE),
        }
    }
}

async fn query_command(argv: &[String]) -> Result<Version> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| SynupdError::Config("installed.command is empty".into()))?;

    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|err| map_spawn_error(err, program))?;

    // A failing query means the package is not present.
    if !output.status.success() {
        return Ok(Version::NONE);
    }

    let stdout = String::from_utf8(output.stdout).map_err(|err| {
        SynupdError::Serialization(format!("{program} emitted invalid UTF-8: {err}"))
    })?;
    Ok(version_from_output(&stdout))
}

/// Accept either a bare version string or `dumpsys`-style
/// `versionName=...` output.
fn version_from_output(stdout: &str) -> Version {
    for line in stdout.lines() {
        if let Some((_, rest)) = line.split_once(VERSION_NAME_KEY) {
            let candidate = rest.split_whitespace().next().unwrap_or_default();
            return Version::parse(candidate);
        }
    }
    Version::parse(stdout)
}

pub(crate) fn map_spawn_error(err: io::Error, command: &str) -> SynupdError {
    if err.kind() == io::ErrorKind::NotFound {
        SynupdError::CommandMissing {
            command: command.into(),
        }
    } else {
        SynupdError::Runtime(format!("Failed to spawn {command}: {err}"))
    }
}
