pub mod archive;
pub mod models;
pub mod remote;
pub mod scrape;
pub mod submission;
pub mod utils;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};

use archive::{Archiver, DirectoryArchiver};
use remote::{RemoteSettings, SettingsStore, TransportSlot};
use scrape::{HostClient, OwnerContext, Scraper};
use submission::{AttemptId, SubmissionController, SubmissionSnapshot, WorkflowError};

pub use utils::init_logging;

const SETTINGS_FILE: &str = "settings.json";
const ARCHIVE_DIR: &str = "donations";

/// Scrape, correct and submit donations from one client.
///
/// Ties the owner context, the scraper, the transport and the submission
/// workflow together. Cheap to clone.
pub struct DonationService<H> {
    scraper: Arc<Scraper<H>>,
    submission: SubmissionController,
    transport: TransportSlot,
}

impl<H> Clone for DonationService<H> {
    fn clone(&self) -> Self {
        Self {
            scraper: Arc::clone(&self.scraper),
            submission: self.submission.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<H: HostClient> DonationService<H> {
    pub fn new(owner: OwnerContext<H>, transport: TransportSlot, archiver: Arc<dyn Archiver>) -> Self {
        Self::with_parts(Scraper::new(owner), transport, archiver)
    }

    pub fn with_parts(
        scraper: Scraper<H>,
        transport: TransportSlot,
        archiver: Arc<dyn Archiver>,
    ) -> Self {
        let submission = SubmissionController::new(transport.clone(), archiver);
        Self {
            scraper: Arc::new(scraper),
            submission,
            transport,
        }
    }

    /// Full setup under `data_dir`: moves `host` onto its owner thread, loads
    /// `settings.json`, archives into `donations/` and keeps the transport
    /// in sync with the settings. Must be called inside a tokio runtime.
    pub fn start(host: H, data_dir: &Path) -> Result<(Self, Arc<SettingsStore>)> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = Arc::new(SettingsStore::new(data_dir.join(SETTINGS_FILE))?);
        let owner = OwnerContext::spawn(host)?;
        let archiver = Arc::new(DirectoryArchiver::new(data_dir.join(ARCHIVE_DIR)));

        let service = Self::new(owner, TransportSlot::new(), archiver);
        service.watch_settings(settings.subscribe());

        info!("Donation service started in {}", data_dir.display());
        Ok((service, settings))
    }

    /// Rebuilds the transport now and on every later settings change.
    pub fn watch_settings(&self, mut settings: watch::Receiver<RemoteSettings>) -> JoinHandle<()> {
        let current = settings.borrow_and_update().clone();
        self.transport.reconfigure(&current);

        let transport = self.transport.clone();
        tokio::spawn(async move {
            while settings.changed().await.is_ok() {
                let next = settings.borrow_and_update().clone();
                transport.reconfigure(&next);
            }
        })
    }

    /// Reads whichever known screen is open. Returns `Ok(false)` when none
    /// is, leaving the workflow as it was.
    pub async fn scrape(&self) -> Result<bool> {
        let scraper = Arc::clone(&self.scraper);
        let record = task::spawn_blocking(move || scraper.scrape())
            .await
            .context("scrape task failed")?
            .map_err(|err| {
                error!("Scrape failed: {err}");
                err
            })?;

        let Some(record) = record else {
            info!("No donation screen open");
            return Ok(false);
        };

        self.submission.load_scrape(record).await?;
        Ok(true)
    }

    pub async fn set_name(&self, name: impl Into<String>) -> Result<(), WorkflowError> {
        self.submission.set_name(name).await
    }

    pub async fn send(&self) -> Result<AttemptId, WorkflowError> {
        self.submission.send().await.map_err(|err| {
            if let WorkflowError::InvalidName(reason) = err {
                warn!("Refusing to send: {reason}");
            }
            err
        })
    }

    pub async fn cancel(&self) -> bool {
        self.submission.cancel().await
    }

    pub async fn snapshot(&self) -> SubmissionSnapshot {
        self.submission.snapshot().await
    }

    pub fn subscribe(&self) -> watch::Receiver<SubmissionSnapshot> {
        self.submission.subscribe()
    }

    pub fn submission(&self) -> &SubmissionController {
        &self.submission
    }

    pub fn transport(&self) -> &TransportSlot {
        &self.transport
    }
}
