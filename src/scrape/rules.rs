//! Screen layouts the scraper knows how to read.
//!
//! Each layout is a plain descriptor consumed by the one matching routine in
//! [`super::scraper`]; supporting a new screen means adding a row here.

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;

/// Identifier of an interface component, packed as `group << 16 | child`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RegionId(pub u32);

impl RegionId {
    pub const fn packed(group: u16, child: u16) -> Self {
        Self(((group as u32) << 16) | child as u32)
    }

    pub const fn group(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn child(self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group(), self.child())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Screen {
    TradeOffer,
    TradeConfirm,
    LootChest,
    PriceCheck,
}

impl Screen {
    pub fn as_str(&self) -> &'static str {
        match self {
            Screen::TradeOffer => "trade offer",
            Screen::TradeConfirm => "trade confirm",
            Screen::LootChest => "loot chest",
            Screen::PriceCheck => "price check",
        }
    }
}

/// A text component and the pattern whose single group holds the value.
#[derive(Debug, Clone)]
pub struct TextRule {
    pub region: RegionId,
    pub pattern: Regex,
}

#[derive(Debug, Clone)]
pub struct ScrapeRule {
    pub screen: Screen,
    /// The interface root; its bounds become the screenshot crop.
    pub container: RegionId,
    pub counterparty: Option<TextRule>,
    pub value: TextRule,
}

mod regions {
    use super::RegionId;

    pub const TRADE_OFFER_ROOT: RegionId = RegionId::packed(335, 0);
    pub const TRADE_OFFER_TITLE: RegionId = RegionId::packed(335, 31);
    pub const TRADE_OFFER_THEIR_VALUE: RegionId = RegionId::packed(335, 27);

    pub const TRADE_CONFIRM_ROOT: RegionId = RegionId::packed(334, 0);
    pub const TRADE_CONFIRM_OPPONENT: RegionId = RegionId::packed(334, 30);
    pub const TRADE_CONFIRM_RECEIVE: RegionId = RegionId::packed(334, 24);

    pub const LOOT_CHEST_CONTENTS: RegionId = RegionId::packed(742, 1);
    pub const LOOT_CHEST_VALUE: RegionId = RegionId::packed(742, 7);

    pub const PRICE_CHECK_ROOT: RegionId = RegionId::packed(464, 0);
    pub const PRICE_CHECK_OUTPUT: RegionId = RegionId::packed(464, 12);
}

pub use regions::*;

fn pattern(src: &str) -> Regex {
    Regex::new(src).expect("built-in scrape pattern is valid")
}

/// The built-in rule set in priority order: trade screens first, since a
/// price check can stay open underneath an incoming trade.
pub fn default_rules() -> Arc<[ScrapeRule]> {
    static RULES: OnceLock<Arc<[ScrapeRule]>> = OnceLock::new();

    RULES
        .get_or_init(|| {
            let trade_opponent = pattern(r"(?i)trading with: ?(.+)");
            let trade_value = pattern(r"(?i)value: (.+) coins");

            Arc::from(vec![
                ScrapeRule {
                    screen: Screen::TradeOffer,
                    container: TRADE_OFFER_ROOT,
                    counterparty: Some(TextRule {
                        region: TRADE_OFFER_TITLE,
                        pattern: trade_opponent.clone(),
                    }),
                    value: TextRule {
                        region: TRADE_OFFER_THEIR_VALUE,
                        pattern: trade_value.clone(),
                    },
                },
                ScrapeRule {
                    screen: Screen::TradeConfirm,
                    container: TRADE_CONFIRM_ROOT,
                    counterparty: Some(TextRule {
                        region: TRADE_CONFIRM_OPPONENT,
                        pattern: trade_opponent,
                    }),
                    value: TextRule {
                        region: TRADE_CONFIRM_RECEIVE,
                        pattern: trade_value,
                    },
                },
                ScrapeRule {
                    screen: Screen::LootChest,
                    container: LOOT_CHEST_CONTENTS,
                    counterparty: None,
                    value: TextRule {
                        region: LOOT_CHEST_VALUE,
                        pattern: pattern(r"(?i)value in chest: (.+)gp"),
                    },
                },
                ScrapeRule {
                    screen: Screen::PriceCheck,
                    container: PRICE_CHECK_ROOT,
                    counterparty: None,
                    value: TextRule {
                        region: PRICE_CHECK_OUTPUT,
                        pattern: pattern(r"(?i)total guide price: ?(.+)"),
                    },
                },
            ])
        })
        .clone()
}
