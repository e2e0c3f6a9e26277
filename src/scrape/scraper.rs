use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::models::DonationRecord;

use super::bridge::{BridgeError, OwnerContext};
use super::capture::{FrameCapture, Rect, Scale};
use super::host::HostClient;
use super::pattern::{extract, parse_amount, ExtractError};
use super::rules::{default_rules, RegionId, Screen, ScrapeRule, TextRule};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    /// A screen that is open does not look the way its rule says it does.
    #[error("{} screen is open but region {region} does not match its rule: {source}", .screen.as_str())]
    RuleViolation {
        screen: Screen,
        region: RegionId,
        source: ExtractError,
    },
    /// The screen's bounds do not overlap the rendered frame.
    #[error("{} screen bounds {region:?} lie outside the rendered frame", .screen.as_str())]
    EmptyCapture { screen: Screen, region: Rect },
}

/// What one rule saw on the owner thread.
#[derive(Debug)]
enum RuleRead {
    /// The screen this rule describes is not open.
    Absent,
    Matched(RuleMatch),
}

#[derive(Debug)]
struct RuleMatch {
    counterparty: Option<String>,
    recipient: String,
    value: String,
    bounds: Rect,
    scale: Scale,
}

pub struct Scraper<H> {
    owner: OwnerContext<H>,
    rules: Arc<[ScrapeRule]>,
}

impl<H: HostClient> Scraper<H> {
    pub fn new(owner: OwnerContext<H>) -> Self {
        Self::with_rules(owner, default_rules())
    }

    pub fn with_rules(owner: OwnerContext<H>, rules: Arc<[ScrapeRule]>) -> Self {
        Self { owner, rules }
    }

    /// Reads whichever known screen is open and captures it.
    ///
    /// Returns `Ok(None)` when none of the rule set's screens is open. Blocks
    /// until the client thread has answered and the next frame is drawn, so
    /// it must run on a worker thread.
    pub fn scrape(&self) -> Result<Option<DonationRecord>, ScrapeError> {
        let started = Instant::now();

        for rule in self.rules.iter() {
            let owned_rule = rule.clone();
            let read = self
                .owner
                .run_on_owner_context(move |host| read_rule(host, &owned_rule))??;

            let found = match read {
                RuleRead::Absent => continue,
                RuleRead::Matched(found) => found,
            };

            let amount = parse_amount(&found.value).map_err(|source| {
                log_error!("{} screen value `{}` is unreadable", rule.screen.as_str(), found.value);
                ScrapeError::RuleViolation {
                    screen: rule.screen,
                    region: rule.value.region,
                    source,
                }
            })?;

            let frame = self.owner.await_next_frame()?;
            let capture = FrameCapture::new(frame, found.bounds, found.scale);
            let Some(screenshot) = capture.crop() else {
                log_error!(
                    "{} screen bounds {:?} are outside the {}x{} frame",
                    rule.screen.as_str(),
                    capture.region,
                    capture.image.width(),
                    capture.image.height()
                );
                return Err(ScrapeError::EmptyCapture {
                    screen: rule.screen,
                    region: capture.region,
                });
            };

            log_info!(
                "Scraped {} screen: {} coins to {} in {}ms",
                rule.screen.as_str(),
                amount,
                found.recipient,
                started.elapsed().as_millis()
            );

            return Ok(Some(DonationRecord::new(
                found.counterparty,
                found.recipient,
                amount,
                screenshot,
            )));
        }

        log_debug!("No known screen is open");
        Ok(None)
    }
}

/// Runs on the owner thread.
fn read_rule<H: HostClient>(host: &H, rule: &ScrapeRule) -> Result<RuleRead, ScrapeError> {
    let Some(recipient) = host.local_player_name() else {
        return Ok(RuleRead::Absent);
    };

    let container = match host.read_region(rule.container) {
        Some(region) if region.visible => region,
        _ => return Ok(RuleRead::Absent),
    };

    let counterparty = match &rule.counterparty {
        Some(text_rule) => match read_text(host, rule.screen, text_rule)? {
            Some(name) => Some(name),
            None => return Ok(RuleRead::Absent),
        },
        None => None,
    };

    let Some(value) = read_text(host, rule.screen, &rule.value)? else {
        return Ok(RuleRead::Absent);
    };

    Ok(RuleRead::Matched(RuleMatch {
        counterparty,
        recipient,
        value,
        bounds: container.bounds,
        scale: host.surface().scale(),
    }))
}

/// `Ok(None)` when the region is hidden, which means a different screen with
/// the same root is showing. A visible region that fails its pattern is a
/// broken rule.
fn read_text<H: HostClient>(
    host: &H,
    screen: Screen,
    rule: &TextRule,
) -> Result<Option<String>, ScrapeError> {
    let region = match host.read_region(rule.region) {
        Some(region) if region.visible => region,
        _ => {
            log_warn!(
                "{} screen is open but region {} is not visible",
                screen.as_str(),
                rule.region
            );
            return Ok(None);
        }
    };

    let text = region.text.unwrap_or_default();
    extract(&text, &rule.pattern)
        .map(Some)
        .map_err(|source| {
            log_error!("{} screen region {} failed its rule: {source}", screen.as_str(), rule.region);
            ScrapeError::RuleViolation {
                screen,
                region: rule.region,
                source,
            }
        })
}
