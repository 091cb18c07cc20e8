/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::check
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    One update check: resolve the installed build, fetch the
    advertised build for the configured channel, decide, and
    raise or clear the notification.

  Security / Safety Notes:
    Read-only; network and process access are delegated to the
    injected sources.

  Dependencies:
    Internal modules only.

  Operational Scope:
    Shared by the foreground `check` command and the scheduled
    daemon job.

  Revision History:
    2025-11-12 COD  Authored check job.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Manifest is not fetched when nothing is installed
    - Collaborators passed explicitly, no process globals
============================================================*/

use std::sync::Arc;

use crate::client::ManifestSource;
use crate::decision::{decide, Channel, UpdateStatus};
use crate::error::Result;
use crate::installed::InstalledSource;
use crate::logger::Logger;
use crate::manifest::AvailableVersion;
use crate::notify::Notifier;
use crate::version::Version;

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub installed: Version,
    pub available: AvailableVersion,
    pub status: UpdateStatus,
}

/// Everything a check needs, cheaply cloneable into spawned jobs.
#[derive(Clone)]
pub struct Checker {
    installed: InstalledSource,
    manifests: Arc<dyn ManifestSource>,
    channel: Channel,
    notifier: Arc<dyn Notifier>,
    logger: Arc<Logger>,
}

impl Checker {
    pub fn new(
        installed: InstalledSource,
        manifests: Arc<dyn ManifestSource>,
        channel: Channel,
        notifier: Arc<dyn Notifier>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            installed,
            manifests,
            channel,
            notifier,
            logger,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub async fn run(&self) -> Result<CheckReport> {
        let installed = self.installed.installed_version().await?;
        self.logger
            .info("INSTALLED", format!("Installed version = {installed}"));

        if installed.is_none() {
            self.logger
                .warn("INSTALLED", "Tracked application is not installed");
            return Ok(CheckReport {
                installed,
                available: AvailableVersion::NONE,
                status: UpdateStatus::NoData,
            });
        }

        let available = self.manifests.fetch_available(self.channel).await?;
        self.logger.info(
            "AVAILABLE",
            format!("Available version ({}) = {}", self.channel, available.format()),
        );

        let status = decide(&installed, &available);
        match status {
            UpdateStatus::UpdateAvailable => self.notifier.show(&available).await,
            UpdateStatus::UpToDate => self.notifier.cancel().await,
            UpdateStatus::NoData => {}
        }
        self.logger.info("DECISION", status.to_string());

        Ok(CheckReport {
            installed,
            available,
            status,
        })
    }

    /// Change log of the advertised build, fetched only when it is an update.
    pub async fn release_notes(&self, report: &CheckReport) -> Option<String> {
        if report.status != UpdateStatus::UpdateAvailable {
            return None;
        }
        Some(self.manifests.release_notes(&report.available).await)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::SynupdError;

    pub(crate) struct FixedManifest {
        pub text: Option<String>,
        pub calls: AtomicUsize,
    }

    impl FixedManifest {
        pub(crate) fn new(text: Option<&str>) -> Self {
            Self {
                text: text.map(str::to_string),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ManifestSource for FixedManifest {
        async fn fetch_available(&self, _channel: Channel) -> Result<AvailableVersion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.text {
                Some(text) => Ok(AvailableVersion::decode(text)),
                None => Err(SynupdError::Network("offline".into())),
            }
        }

        async fn release_notes(&self, version: &AvailableVersion) -> String {
            format!("notes for {}", version.format())
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn show(&self, version: &AvailableVersion) {
            self.events
                .lock()
                .unwrap()
                .push(format!("show {}", version.format()));
        }

        async fn cancel(&self) {
            self.events.lock().unwrap().push("cancel".into());
        }
    }

    fn checker(
        installed: &str,
        manifest: Arc<FixedManifest>,
        notifier: Arc<RecordingNotifier>,
    ) -> Checker {
        Checker::new(
            InstalledSource::Literal(installed.into()),
            manifest,
            Channel::Beta,
            notifier,
            Arc::new(Logger::quiet()),
        )
    }

    #[tokio::test]
    async fn newer_manifest_raises_notification() {
        let manifest = Arc::new(FixedManifest::new(Some("AquaMail\t1.0.1\t1700000000000")));
        let notifier = Arc::new(RecordingNotifier::default());
        let report = checker("1.0.0", manifest, notifier.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(report.status, UpdateStatus::UpdateAvailable);
        assert_eq!(*notifier.events.lock().unwrap(), vec!["show 1.0.1".to_string()]);
    }

    #[tokio::test]
    async fn release_notes_only_accompany_updates() {
        let manifest = Arc::new(FixedManifest::new(Some("AquaMail\t1.0.1\t1700000000000")));
        let notifier = Arc::new(RecordingNotifier::default());

        let outdated = checker("1.0.0", manifest.clone(), notifier.clone());
        let report = outdated.run().await.unwrap();
        assert_eq!(
            outdated.release_notes(&report).await.as_deref(),
            Some("notes for 1.0.1")
        );

        let current = checker("1.0.1", manifest, notifier);
        let report = current.run().await.unwrap();
        assert_eq!(current.release_notes(&report).await, None);
    }

    #[tokio::test]
    async fn current_install_clears_notification() {
        let manifest = Arc::new(FixedManifest::new(Some("AquaMail\t1.0.1\t1700000000000")));
        let notifier = Arc::new(RecordingNotifier::default());
        let report = checker("1.0.1", manifest, notifier.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(report.status, UpdateStatus::UpToDate);
        assert_eq!(*notifier.events.lock().unwrap(), vec!["cancel".to_string()]);
    }

    #[tokio::test]
    async fn absent_install_skips_manifest_fetch() {
        let manifest = Arc::new(FixedManifest::new(Some("AquaMail\t1.0.1\t1700000000000")));
        let notifier = Arc::new(RecordingNotifier::default());
        let report = checker("not installed", manifest.clone(), notifier.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(report.status, UpdateStatus::NoData);
        assert_eq!(manifest.calls.load(Ordering::SeqCst), 0);
        assert!(notifier.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unusable_manifest_is_no_data() {
        let manifest = Arc::new(FixedManifest::new(Some("")));
        let notifier = Arc::new(RecordingNotifier::default());
        let report = checker("1.0.0", manifest, notifier.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(report.status, UpdateStatus::NoData);
        assert!(notifier.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn network_errors_propagate() {
        let manifest = Arc::new(FixedManifest::new(None));
        let notifier = Arc::new(RecordingNotifier::default());
        let err = checker("1.0.0", manifest, notifier)
            .run()
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
