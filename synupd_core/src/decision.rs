/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::decision
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Decide whether the installed build is current, and merge
    manifests when both release channels are tracked.

  Security / Safety Notes:
    Pure functions; no I/O performed in this module.

  Dependencies:
    serde for channel (de)serialisation in configuration.

  Operational Scope:
    Shared by the foreground check, the scheduled check and the
    download command.

  Revision History:
    2025-11-12 COD  Authored update decision rules.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Missing data is a verdict of its own, not an error
    - Deterministic precedence between channels
============================================================*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::manifest::AvailableVersion;
use crate::version::Version;

/// Outcome of comparing the installed build against a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
    UpToDate,
    UpdateAvailable,
    NoData,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdateStatus::UpToDate => "up to date",
            UpdateStatus::UpdateAvailable => "update available",
            UpdateStatus::NoData => "no data",
        };
        f.write_str(label)
    }
}

pub fn decide(installed: &Version, available: &AvailableVersion) -> UpdateStatus {
    if installed.is_none() || available.is_none() {
        UpdateStatus::NoData
    } else if available.is_newer_than(installed) {
        UpdateStatus::UpdateAvailable
    } else {
        UpdateStatus::UpToDate
    }
}

/// Release track whose manifest is consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stable,
    #[default]
    #[serde(alias = "dev")]
    Beta,
    Both,
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stable" => Ok(Channel::Stable),
            "beta" | "dev" => Ok(Channel::Beta),
            "both" => Ok(Channel::Both),
            other => Err(format!("unknown channel `{other}` (expected stable, beta or both)")),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Channel::Stable => "stable",
            Channel::Beta => "beta",
            Channel::Both => "both",
        };
        f.write_str(label)
    }
}

/// Pick between beta and stable manifests for [`Channel::Both`].
///
/// Beta wins when it is strictly newer or when stable is unavailable.
pub fn merge_channels(beta: AvailableVersion, stable: AvailableVersion) -> AvailableVersion {
    if stable.is_none() || beta.is_newer_than(&stable.version) {
        beta
    } else {
        stable
    }
}
