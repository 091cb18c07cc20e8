/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::manifest
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Decode the tab-separated version manifest published per
    update channel and derive artifact / changelog locations
    from the advertised build.

  Security / Safety Notes:
    Manifest text is untrusted; malformed records collapse to
    the NONE sentinel and artifact names are percent-encoded
    before they are joined onto a base URL.

  Dependencies:
    chrono for publish-time display, urlencoding for segments.

  Operational Scope:
    Consumed by the HTTP client, the update decision and the
    download pipeline.

  Revision History:
    2025-11-12 COD  Replaced package manifest with version manifest.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Unusable records are discarded whole, never half-trusted
    - Artifact names validated before URL construction
============================================================*/

use chrono::{Local, TimeZone};
use urlencoding::encode;

use crate::error::{Result, SynupdError};
use crate::version::Version;

/// Fields past this index are ignored.
const MAX_FIELDS: usize = 6;

/// Latest build advertised by an update channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableVersion {
    /// Artifact family name, e.g. `AquaMail`.
    pub prefix: String,
    pub version: Version,
    /// Publish time, milliseconds since the Unix epoch.
    pub time: i64,
}

impl AvailableVersion {
    /// Sentinel for "no usable manifest".
    pub const NONE: AvailableVersion = AvailableVersion {
        prefix: String::new(),
        version: Version::NONE,
        time: 0,
    };

    /// Decode a manifest record: `prefix \t version \t time_ms [\t ...]`.
    pub fn decode(text: &str) -> AvailableVersion {
        let Some(record) = text.trim().lines().next() else {
            return AvailableVersion::NONE;
        };

        let fields: Vec<&str> = record.split('\t').take(MAX_FIELDS).collect();
        if fields.len() < 3 {
            return AvailableVersion::NONE;
        }

        let prefix = fields[0];
        let version = Version::parse(fields[1]);
        let time = fields[2].trim().parse::<i64>().unwrap_or(0);

        if prefix.is_empty() || version.is_none() || time <= 0 {
            return AvailableVersion::NONE;
        }

        AvailableVersion {
            prefix: prefix.to_string(),
            version,
            time,
        }
    }

    /// Decoded records always carry a real version, so absence is
    /// carried by the version sentinel.
    pub fn is_none(&self) -> bool {
        self.version.is_none()
    }

    pub fn is_newer_than(&self, installed: &Version) -> bool {
        self.version.is_newer_than(installed)
    }

    pub fn format(&self) -> String {
        self.version.format()
    }

    /// Version plus publish time in local time.
    pub fn describe(&self) -> String {
        match Local.timestamp_millis_opt(self.time).single() {
            Some(stamp) => format!("{} ({})", self.format(), stamp.format("%Y-%m-%d %H:%M")),
            None => self.format(),
        }
    }

    /// `{prefix}-{major}.{minor}.{patch}-{build}-{branch}-{commit}.apk`
    ///
    /// Branch and commit are mandatory in the server's naming scheme; a
    /// version lacking either cannot name an artifact.
    pub fn artifact_name(&self) -> Result<String> {
        let v = &self.version;
        match (&v.branch, &v.commit) {
            (Some(branch), Some(commit)) if !self.prefix.is_empty() => Ok(format!(
                "{}-{}.{}.{}-{}-{}-{}.apk",
                self.prefix, v.major, v.minor, v.patch, v.build, branch, commit
            )),
            _ => Err(SynupdError::InvalidArtifact(format!(
                "version {} of `{}` lacks branch or commit",
                v.format(),
                self.prefix
            ))),
        }
    }

    pub fn download_url(&self, base: &str) -> Result<String> {
        Ok(join_segment(base, &self.artifact_name()?))
    }

    pub fn changelog_url(&self, base: &str) -> Result<String> {
        let name = format!("{}-changes.txt", self.artifact_name()?);
        Ok(join_segment(base, &name))
    }
}

fn join_segment(base: &str, segment: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), encode(segment))
}
