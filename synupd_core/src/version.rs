/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::version
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Parse, render and order the build identifiers published by
    the companion application (`MAJOR.MINOR.PATCH-BUILD-BRANCH-
    COMMIT` and its shorter forms).

  Security / Safety Notes:
    Pure value type; no I/O performed in this module.

  Dependencies:
    regex and once_cell for the precompiled grammar.

  Operational Scope:
    Feeds the manifest decoder, the update decision and every
    operator-facing version display.

  Revision History:
    2025-11-12 COD  Introduced four-form version grammar.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Unparseable input surfaces as the NONE sentinel
    - Ordering restricted to numeric components
============================================================*/

use std::cmp::Ordering;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static FULL_WITH_COMMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)-(\d+)-([[:alnum:]]+)-([[:alnum:]]+)$")
        .expect("Invalid full version regex")
});
static FULL_WITH_BRANCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)-(\d+)-([[:alnum:]]+)$").expect("Invalid branch version regex")
});
static FULL_WITH_BUILD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)-(\d+)$").expect("Invalid build version regex")
});
static SHORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)$").expect("Invalid short version regex"));

/// Immutable build identifier of the tracked application.
///
/// Structural equality covers every field; ordering (see [`Version::compare`])
/// only looks at `(major, minor, patch, build)`. [`Version::NONE`] carries a
/// private marker, so a parsed `0.0.0` is a real version distinct from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
    pub branch: Option<String>,
    pub commit: Option<String>,
    absent: bool,
}

impl Version {
    /// Sentinel for "absent or unparseable".
    pub const NONE: Version = Version {
        major: 0,
        minor: 0,
        patch: 0,
        build: 0,
        branch: None,
        commit: None,
        absent: true,
    };

    /// Parse `text`, trying the most specific form first. Returns
    /// [`Version::NONE`] when nothing matches the whole trimmed string.
    pub fn parse(text: &str) -> Version {
        let text = text.trim();

        if let Some(caps) = FULL_WITH_COMMIT.captures(text) {
            return Self::from_captures(&caps, true, true);
        }
        if let Some(caps) = FULL_WITH_BRANCH.captures(text) {
            return Self::from_captures(&caps, true, false);
        }
        if let Some(caps) = FULL_WITH_BUILD.captures(text) {
            return Self::from_captures(&caps, false, false);
        }
        if let Some(caps) = SHORT.captures(text) {
            let numbers = (1..=3)
                .map(|idx| caps[idx].parse::<u32>().ok())
                .collect::<Option<Vec<u32>>>();
            return match numbers.as_deref() {
                Some(&[major, minor, patch]) => Version {
                    major,
                    minor,
                    patch,
                    build: 0,
                    branch: None,
                    commit: None,
                    absent: false,
                },
                _ => Version::NONE,
            };
        }

        Version::NONE
    }

    fn from_captures(caps: &regex::Captures<'_>, branch: bool, commit: bool) -> Version {
        let numbers = (1..=4)
            .map(|idx| caps[idx].parse::<u32>().ok())
            .collect::<Option<Vec<u32>>>();
        // Components overflowing u32 are treated like any other unparseable text.
        let Some(&[major, minor, patch, build]) = numbers.as_deref() else {
            return Version::NONE;
        };
        Version {
            major,
            minor,
            patch,
            build,
            branch: branch.then(|| caps[5].to_string()),
            commit: commit.then(|| caps[6].to_string()),
            absent: false,
        }
    }

    pub fn is_none(&self) -> bool {
        self.absent
    }

    /// Lexicographic comparison over the numeric components only.
    pub fn compare(&self, other: &Version) -> Ordering {
        (self.major, self.minor, self.patch, self.build).cmp(&(
            other.major,
            other.minor,
            other.patch,
            other.build,
        ))
    }

    /// Strictly newer; equal numeric tuples are not newer.
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self.compare(other) == Ordering::Greater
    }

    /// Render in the shortest form that parses back to `self`.
    pub fn format(&self) -> String {
        let mut text = format!("{}.{}.{}", self.major, self.minor, self.patch);
        if self.build > 0 || self.branch.is_some() {
            text.push_str(&format!("-{}", self.build));
        }
        if let Some(branch) = &self.branch {
            text.push('-');
            text.push_str(branch);
            if let Some(commit) = &self.commit {
                text.push('-');
                text.push_str(commit);
            }
        }
        text
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_four_forms() {
        let full = Version::parse("1.5.12-1620-dev-a1b2c3");
        assert_eq!(full.major, 1);
        assert_eq!(full.minor, 5);
        assert_eq!(full.patch, 12);
        assert_eq!(full.build, 1620);
        assert_eq!(full.branch.as_deref(), Some("dev"));
        assert_eq!(full.commit.as_deref(), Some("a1b2c3"));

        let branch = Version::parse("1.5.12-1620-dev");
        assert_eq!(branch.branch.as_deref(), Some("dev"));
        assert!(branch.commit.is_none());

        let build = Version::parse("5.2.1-340");
        assert_eq!(build.build, 340);
        assert!(build.branch.is_none());

        let short = Version::parse("2.0.0");
        assert_eq!((short.major, short.minor, short.patch, short.build), (2, 0, 0, 0));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(Version::parse("  1.2.3-4\n"), Version::parse("1.2.3-4"));
    }

    #[test]
    fn partial_matches_are_rejected() {
        assert!(Version::parse("").is_none());
        assert!(Version::parse("1.2").is_none());
        assert!(Version::parse("v1.2.3").is_none());
        assert!(Version::parse("1.2.3-").is_none());
        assert!(Version::parse("1.2.3-4-dev-abc-extra").is_none());
        assert!(Version::parse("1.2.3-4-de_v").is_none());
        assert!(Version::parse("99999999999.0.0").is_none());
    }

    #[test]
    fn format_round_trips_for_every_form() {
        for text in ["1.5.12-1620-dev-a1b2c3", "1.5.12-1620-dev", "5.2.1-340", "2.0.0"] {
            let parsed = Version::parse(text);
            assert_eq!(parsed.format(), text);
            assert_eq!(Version::parse(&parsed.format()), parsed);
        }
    }

    #[test]
    fn zero_build_with_branch_keeps_build_segment() {
        let parsed = Version::parse("1.0.0-0-main");
        assert_eq!(parsed.format(), "1.0.0-0-main");
        assert_eq!(Version::parse(&parsed.format()), parsed);
    }

    #[test]
    fn newer_is_strict_and_numeric() {
        assert!(Version::parse("2.0.0-5").is_newer_than(&Version::parse("2.0.0-4")));
        assert!(!Version::parse("1.9.9").is_newer_than(&Version::parse("2.0.0")));
        assert!(Version::parse("1.10.0").is_newer_than(&Version::parse("1.9.99")));
        let a = Version::parse("3.1.4-15");
        assert!(!a.is_newer_than(&a.clone()));
    }

    #[test]
    fn branch_and_commit_never_affect_ordering() {
        let a = Version::parse("1.2.3-4-beta-ffff");
        let b = Version::parse("1.2.3-4-alpha-0000");
        assert_eq!(a.compare(&b), Ordering::Equal);
        assert!(!a.is_newer_than(&b));
        assert!(!b.is_newer_than(&a));
        assert_ne!(a, b);
    }

    #[test]
    fn ordering_is_transitive_and_antisymmetric() {
        let samples: Vec<Version> = ["1.0.0", "1.0.0-1", "1.0.1", "1.1.0-2-dev", "2.0.0-0-x-y"]
            .iter()
            .map(|text| Version::parse(text))
            .collect();
        for a in &samples {
            for b in &samples {
                assert!(!(a.is_newer_than(b) && b.is_newer_than(a)));
                for c in &samples {
                    if a.is_newer_than(b) && b.is_newer_than(c) {
                        assert!(a.is_newer_than(c));
                    }
                }
            }
        }
    }

    #[test]
    fn none_is_never_newer() {
        assert!(!Version::NONE.is_newer_than(&Version::NONE));
        assert!(!Version::NONE.is_newer_than(&Version::parse("0.0.1")));
        assert_eq!(Version::NONE.format(), "0.0.0");
    }

    #[test]
    fn parsed_zero_version_is_not_the_sentinel() {
        let zero = Version::parse("0.0.0");
        assert!(!zero.is_none());
        assert_ne!(zero, Version::NONE);
        assert_eq!(zero.format(), Version::NONE.format());
        assert!(!Version::parse("0.0.0-0").is_none());
        assert!(Version::parse("0.0.1").is_newer_than(&zero));
    }
}
