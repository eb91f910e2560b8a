//! Tier policy: the closed table mapping a tier id to price, ranking
//! weight, pin rank, and TTL.
//!
//! The table is fixed at compile time. Unknown tier ids are a hard
//! validation failure at the boundary, never silently defaulted, and
//! edits to this table never retroactively alter stored entries: each
//! record copies `weight`, `pin_rank`, and `expires_at` at creation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BoardError;

/// Closed set of ledger tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "ephemeral")]
    Ephemeral,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "3day")]
    ThreeDay,
    #[serde(rename = "permanent")]
    Permanent,
    #[serde(rename = "featured")]
    Featured,
}

/// Static policy for one tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierSpec {
    pub label: &'static str,
    pub price_usd: f64,
    /// `None` means entries of this tier never expire by tier rule.
    pub ttl_hours: Option<i64>,
    pub base_weight: u32,
    pub pin_rank: u32,
}

const EPHEMERAL: TierSpec = TierSpec {
    label: "Ephemeral",
    price_usd: 0.0,
    ttl_hours: Some(1),
    base_weight: 1,
    pin_rank: 0,
};

const DAY: TierSpec = TierSpec {
    label: "Day Pass",
    price_usd: 0.10,
    ttl_hours: Some(24),
    base_weight: 2,
    pin_rank: 0,
};

const THREE_DAY: TierSpec = TierSpec {
    label: "3-Day Slot",
    price_usd: 0.25,
    ttl_hours: Some(72),
    base_weight: 3,
    pin_rank: 0,
};

const PERMANENT: TierSpec = TierSpec {
    label: "Permanent",
    price_usd: 1.00,
    ttl_hours: None,
    base_weight: 5,
    pin_rank: 1,
};

const FEATURED: TierSpec = TierSpec {
    label: "Featured",
    price_usd: 2.00,
    ttl_hours: None,
    base_weight: 8,
    pin_rank: 2,
};

/// Overpayment bonus cap: `effective_weight` never adds more than this
/// on top of the tier's base weight.
const MAX_OVERPAY_BONUS: i64 = 4;

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Ephemeral,
        Tier::Day,
        Tier::ThreeDay,
        Tier::Permanent,
        Tier::Featured,
    ];

    /// Resolve a tier id against the closed table.
    pub fn from_id(id: &str) -> Result<Self, BoardError> {
        match id {
            "ephemeral" => Ok(Self::Ephemeral),
            "day" => Ok(Self::Day),
            "3day" => Ok(Self::ThreeDay),
            "permanent" => Ok(Self::Permanent),
            "featured" => Ok(Self::Featured),
            other => Err(BoardError::UnknownTier {
                tier_id: other.to_string(),
            }),
        }
    }

    /// The wire/file id for this tier.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::Day => "day",
            Self::ThreeDay => "3day",
            Self::Permanent => "permanent",
            Self::Featured => "featured",
        }
    }

    pub fn spec(&self) -> &'static TierSpec {
        match self {
            Self::Ephemeral => &EPHEMERAL,
            Self::Day => &DAY,
            Self::ThreeDay => &THREE_DAY,
            Self::Permanent => &PERMANENT,
            Self::Featured => &FEATURED,
        }
    }

    /// Effective ranking weight for a submission.
    ///
    /// An explicit weight bypasses policy entirely (but is floored at 1,
    /// never overridden implicitly). Otherwise the tier's base weight is
    /// used, with an overpayment bonus of `min(floor(amount / price) - 1, 4)`
    /// when both amount and price are positive and the multiplier exceeds 1.
    /// Zero-price tiers never earn a bonus.
    pub fn effective_weight(&self, amount_usd: Option<f64>, explicit_weight: Option<i64>) -> u32 {
        if let Some(explicit) = explicit_weight {
            return u32::try_from(explicit.max(1)).unwrap_or(u32::MAX);
        }

        let spec = self.spec();
        let mut weight = spec.base_weight;

        if let Some(amount) = amount_usd
            && amount > 0.0
            && spec.price_usd > 0.0
        {
            let multiplier = (amount / spec.price_usd).floor() as i64;
            if multiplier > 1 {
                weight += (multiplier - 1).min(MAX_OVERPAY_BONUS) as u32;
            }
        }

        weight.max(1)
    }

    /// Expiry instant for an entry created at `now`, or `None` for tiers
    /// without a TTL. Derived exactly once at creation, never recomputed.
    pub fn expiry_for(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.spec().ttl_hours.map(|hours| now + Duration::hours(hours))
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn from_id_resolves_every_tier() {
        for tier in Tier::ALL {
            assert_eq!(Tier::from_id(tier.id()).unwrap(), tier);
        }
    }

    #[test]
    fn from_id_rejects_unknown_tier() {
        let err = Tier::from_id("gold").unwrap_err();
        assert_eq!(err.kind(), "unknown_tier");
    }

    #[test]
    fn effective_weight_uses_base_weight_without_amount() {
        assert_eq!(Tier::Ephemeral.effective_weight(None, None), 1);
        assert_eq!(Tier::Permanent.effective_weight(None, None), 5);
        assert_eq!(Tier::Featured.effective_weight(None, None), 8);
    }

    #[test]
    fn effective_weight_rewards_overpayment() {
        // permanent: price 1.00, base 5 -> paying 3.00 adds min(3-1, 4) = 2
        assert_eq!(Tier::Permanent.effective_weight(Some(3.00), None), 7);
        // exact price: multiplier 1, no bonus
        assert_eq!(Tier::Permanent.effective_weight(Some(1.00), None), 5);
    }

    #[test]
    fn effective_weight_caps_bonus_at_four() {
        assert_eq!(Tier::Permanent.effective_weight(Some(100.0), None), 9);
    }

    #[test]
    fn effective_weight_is_monotone_in_amount() {
        let mut last = 0;
        for cents in (0..1000).step_by(5) {
            let amount = f64::from(cents) / 100.0;
            let weight = Tier::Day.effective_weight(Some(amount), None);
            assert!(weight >= 1);
            assert!(weight >= last, "weight decreased at amount {amount}");
            last = weight;
        }
    }

    #[test]
    fn effective_weight_ignores_amount_on_zero_price_tier() {
        // ephemeral price is 0.00: amounts contribute no bonus
        assert_eq!(Tier::Ephemeral.effective_weight(Some(50.0), None), 1);
    }

    #[test]
    fn explicit_weight_bypasses_policy_but_floors_at_one() {
        assert_eq!(Tier::Featured.effective_weight(Some(10.0), Some(3)), 3);
        assert_eq!(Tier::Ephemeral.effective_weight(None, Some(-2)), 1);
        assert_eq!(Tier::Ephemeral.effective_weight(None, Some(0)), 1);
    }

    #[test]
    fn explicit_weight_saturates_instead_of_truncating() {
        assert_eq!(
            Tier::Ephemeral.effective_weight(None, Some(i64::MAX)),
            u32::MAX
        );
        assert_eq!(
            Tier::Ephemeral.effective_weight(None, Some(i64::from(u32::MAX) + 1)),
            u32::MAX
        );
    }

    #[test]
    fn expiry_follows_tier_ttl() {
        let now = Utc::now();
        assert_eq!(
            Tier::Day.expiry_for(now),
            Some(now + Duration::hours(24))
        );
        assert_eq!(Tier::Permanent.expiry_for(now), None);
        assert_eq!(Tier::Featured.expiry_for(now), None);
    }
}
