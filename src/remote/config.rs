use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

/// Where donations go, decoded from the operator's remote blob.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteConfig {
    /// The URL of an HTTP(S) endpoint.
    pub url: String,
    /// PEM certificate to trust in addition to the default roots, for
    /// endpoints with a self-signed certificate.
    #[serde(default)]
    pub cert: Option<String>,
}

impl RemoteConfig {
    /// Decodes a base64-encoded JSON object `{"url": ..., "cert": ...}`.
    pub fn parse(blob: &str) -> Result<Self> {
        let blob = blob.trim();
        if blob.is_empty() {
            bail!("empty remote string");
        }

        let bytes = STANDARD
            .decode(blob)
            .context("remote string is not valid base64")?;
        let json = String::from_utf8(bytes).context("remote string is not UTF-8")?;
        let config: Option<RemoteConfig> =
            serde_json::from_str(&json).context("remote string is not a valid remote object")?;

        let mut config = config.ok_or_else(|| anyhow!("empty remote string"))?;
        if config.url.trim().is_empty() {
            bail!("remote string missing URL");
        }

        if config.cert.as_deref().is_some_and(|cert| cert.trim().is_empty()) {
            config.cert = None;
        }

        Ok(config)
    }

    /// Inverse of [`RemoteConfig::parse`], for tooling and tests.
    pub fn encode(url: &str, cert: Option<&str>) -> String {
        let json = serde_json::json!({ "url": url, "cert": cert });
        STANDARD.encode(json.to_string())
    }
}
