use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use log::{error, info};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Request, StatusCode, Url};
use thiserror::Error;

use crate::models::DonationRecord;

use super::config::RemoteConfig;
use super::settings::RemoteSettings;
use super::trust::CompositeTrustManager;

/// Upper bound for one submission, connect to last byte.
pub const SEND_TIMEOUT_SECS: u64 = 10;

const SCREENSHOT_FILENAME: &str = "screenshot.png";
const SCREENSHOT_MIME: &str = "image/png";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("no remote configured")]
    NotConfigured,
    #[error("donation has no sender name")]
    MissingSender,
    #[error("failed to encode screenshot: {0}")]
    Encode(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response code: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("no response within {SEND_TIMEOUT_SECS}s")]
    TimedOut,
}

/// Delivers one donation to the remote.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, record: &DonationRecord) -> Result<(), SubmitError>;
}

/// Multipart POST over HTTP(S).
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    url: Url,
    key: Option<String>,
}

impl HttpTransport {
    /// Builds a client for `config`. The TLS layer always goes through the
    /// composite trust manager, so a pinned certificate is trusted on top of
    /// the default roots.
    pub fn new(config: &RemoteConfig, key: &str) -> Result<Self> {
        let url = Url::parse(config.url.trim())
            .with_context(|| format!("invalid remote URL `{}`", config.url))?;

        let tls = CompositeTrustManager::for_remote(config.cert.as_deref())
            .context("failed to load pinned certificate")?
            .into_client_config()
            .context("failed to build TLS configuration")?;

        let client = Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .use_preconfigured_tls(tls)
            .build()
            .context("failed to build HTTP client")?;

        let key = Some(key)
            .filter(|key| !key.is_empty())
            .map(str::to_string);

        Ok(Self { client, url, key })
    }

    pub fn from_settings(settings: &RemoteSettings) -> Result<Self> {
        let config = RemoteConfig::parse(&settings.remote).context("failed to parse remote config")?;
        Self::new(&config, &settings.key)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request [`Transport::submit`] sends for `record`.
    pub fn request(&self, record: &DonationRecord) -> Result<Request, SubmitError> {
        let from = record.from().ok_or(SubmitError::MissingSender)?;
        let png = encode_png(record.screenshot())?;

        let screenshot = Part::bytes(png)
            .file_name(SCREENSHOT_FILENAME)
            .mime_str(SCREENSHOT_MIME)?;

        let form = Form::new()
            .text("from", from.to_string())
            .text("to", record.to().to_string())
            .text("amount", record.amount().to_string())
            .part("screenshot", screenshot);

        let mut builder = self.client.post(self.url.clone()).multipart(form);
        if let Some(key) = &self.key {
            builder = builder.basic_auth("", Some(key));
        }

        Ok(builder.build()?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, record: &DonationRecord) -> Result<(), SubmitError> {
        let request = self.request(record)?;
        let response = self.client.execute(request).await.map_err(|err| {
            if err.is_timeout() {
                SubmitError::TimedOut
            } else {
                SubmitError::Http(err)
            }
        })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(SubmitError::UnexpectedStatus(status)),
        }
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, SubmitError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|err| SubmitError::Encode(err.to_string()))?;
    Ok(bytes)
}

/// The transport currently in use, rebuilt from scratch on every settings
/// change. Holds `None` while the settings are missing or broken.
#[derive(Clone, Default)]
pub struct TransportSlot {
    current: Arc<RwLock<Option<Arc<dyn Transport>>>>,
}

impl TransportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        let slot = Self::new();
        slot.replace(Some(transport));
        slot
    }

    pub fn current(&self) -> Option<Arc<dyn Transport>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_configured(&self) -> bool {
        self.current().is_some()
    }

    pub fn replace(&self, transport: Option<Arc<dyn Transport>>) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = transport;
    }

    /// Rebuilds the transport from `settings`, leaving the slot empty when
    /// that fails.
    pub fn reconfigure(&self, settings: &RemoteSettings) -> bool {
        match HttpTransport::from_settings(settings) {
            Ok(transport) => {
                info!("Donation remote configured: {}", transport.url());
                self.replace(Some(Arc::new(transport)));
                true
            }
            Err(err) => {
                error!("Making donation transport failed: {err:#}");
                self.replace(None);
                false
            }
        }
    }
}
