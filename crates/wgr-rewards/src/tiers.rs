//! Reward tier table.
//!
//! Tiers are configuration: read-only to this crate, mutated only by the
//! (out-of-scope) admin subsystem. The table is validated once at load so
//! the engine can assume strict ordering everywhere else.

use std::fmt;

use serde::{Deserialize, Serialize};

use wgr_ledger::{Micros, BPS_SCALE};

/// One cashback tier. Limits are per accrual window; `None` = unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTier {
    pub tier_level: u32,
    pub name: String,
    /// Lifetime GGR required to reach this tier.
    pub min_ggr_required: Micros,
    /// Cashback rate applied to GGR, in basis points.
    pub cashback_bps: i64,
    pub daily_limit: Option<Micros>,
    pub weekly_limit: Option<Micros>,
    pub monthly_limit: Option<Micros>,
    #[serde(default)]
    pub special_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierTableError {
    Empty,
    /// Levels must be strictly increasing in table order.
    NonIncreasingLevel { position: usize },
    /// `min_ggr_required` must be strictly increasing with level.
    NonIncreasingMinGgr { position: usize },
    /// Rates live in [0, 10_000] bps.
    RateOutOfRange { tier_level: u32, cashback_bps: i64 },
}

impl fmt::Display for TierTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "tier table must not be empty"),
            Self::NonIncreasingLevel { position } => {
                write!(f, "tier level not strictly increasing at position {position}")
            }
            Self::NonIncreasingMinGgr { position } => {
                write!(f, "min_ggr_required not strictly increasing at position {position}")
            }
            Self::RateOutOfRange {
                tier_level,
                cashback_bps,
            } => write!(
                f,
                "tier {tier_level}: cashback {cashback_bps} bps outside [0, {BPS_SCALE}]"
            ),
        }
    }
}

impl std::error::Error for TierTableError {}

/// Validated, ordered tier set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RewardTier>", into = "Vec<RewardTier>")]
pub struct TierTable {
    tiers: Vec<RewardTier>,
}

impl TierTable {
    pub fn new(tiers: Vec<RewardTier>) -> Result<Self, TierTableError> {
        if tiers.is_empty() {
            return Err(TierTableError::Empty);
        }
        for (i, tier) in tiers.iter().enumerate() {
            if tier.cashback_bps < 0 || tier.cashback_bps > BPS_SCALE {
                return Err(TierTableError::RateOutOfRange {
                    tier_level: tier.tier_level,
                    cashback_bps: tier.cashback_bps,
                });
            }
            if i > 0 {
                if tier.tier_level <= tiers[i - 1].tier_level {
                    return Err(TierTableError::NonIncreasingLevel { position: i });
                }
                if tier.min_ggr_required <= tiers[i - 1].min_ggr_required {
                    return Err(TierTableError::NonIncreasingMinGgr { position: i });
                }
            }
        }
        Ok(Self { tiers })
    }

    /// Entry tier for new users.
    pub fn lowest(&self) -> &RewardTier {
        &self.tiers[0]
    }

    pub fn by_level(&self, tier_level: u32) -> Option<&RewardTier> {
        self.tiers.iter().find(|t| t.tier_level == tier_level)
    }

    /// Highest tier whose `min_ggr_required <= lifetime_ggr`.
    pub fn qualifying(&self, lifetime_ggr: Micros) -> &RewardTier {
        self.tiers
            .iter()
            .rev()
            .find(|t| t.min_ggr_required <= lifetime_ggr)
            .unwrap_or_else(|| self.lowest())
    }

    /// Next tier above a level, if any.
    pub fn next_above(&self, tier_level: u32) -> Option<&RewardTier> {
        self.tiers.iter().find(|t| t.tier_level > tier_level)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RewardTier> {
        self.tiers.iter()
    }
}

impl TryFrom<Vec<RewardTier>> for TierTable {
    type Error = TierTableError;
    fn try_from(tiers: Vec<RewardTier>) -> Result<Self, Self::Error> {
        TierTable::new(tiers)
    }
}

impl From<TierTable> for Vec<RewardTier> {
    fn from(table: TierTable) -> Self {
        table.tiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(level: u32, min_units: i64, bps: i64) -> RewardTier {
        RewardTier {
            tier_level: level,
            name: format!("tier-{level}"),
            min_ggr_required: Micros::from_units(min_units),
            cashback_bps: bps,
            daily_limit: None,
            weekly_limit: None,
            monthly_limit: None,
            special_flags: Vec::new(),
        }
    }

    #[test]
    fn validates_strict_ordering() {
        assert!(TierTable::new(vec![]).is_err());
        assert!(TierTable::new(vec![tier(1, 0, 50), tier(1, 10, 60)]).is_err());
        assert!(TierTable::new(vec![tier(1, 10, 50), tier(2, 10, 60)]).is_err());
        assert!(TierTable::new(vec![tier(1, 0, 50), tier(2, 10, 20_000)]).is_err());
        assert!(TierTable::new(vec![tier(1, 0, 50), tier(2, 10, 60)]).is_ok());
    }

    #[test]
    fn qualifying_picks_highest_reached() {
        let table =
            TierTable::new(vec![tier(1, 0, 50), tier(2, 100, 75), tier(3, 1_000, 100)]).unwrap();
        assert_eq!(table.qualifying(Micros::from_units(0)).tier_level, 1);
        assert_eq!(table.qualifying(Micros::from_units(99)).tier_level, 1);
        assert_eq!(table.qualifying(Micros::from_units(100)).tier_level, 2);
        assert_eq!(table.qualifying(Micros::from_units(5_000)).tier_level, 3);
        assert_eq!(table.next_above(2).unwrap().tier_level, 3);
        assert!(table.next_above(3).is_none());
    }
}
