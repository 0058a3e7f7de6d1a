//! Plan tiers and pricing.
//!
//! Tiers are static configuration, not database rows. The ordering of
//! [`PlanTier`] is total and decides whether a plan change is an upgrade.
//!
//! ```rust
//! use plangate::billing::{BillingInterval, PlanTier};
//!
//! let pro = PlanTier::Pro;
//! assert!(PlanTier::Business > pro);
//! assert_eq!(pro.price(BillingInterval::Month), 20_000);
//! assert_eq!(PlanTier::from_stored(Some("platinum")), PlanTier::Free);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::BillingError;

/// Plan level, ordered from cheapest to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Pro,
    Business,
    Enterprise,
}

/// Static description of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanDefinition {
    pub tier: PlanTier,
    /// Name shown to customers.
    pub display_name: &'static str,
    /// English label used in API messages.
    pub label: &'static str,
    /// Monthly price in minor currency units (JPY has no minor unit).
    pub monthly_price: i64,
    /// Yearly price in minor currency units.
    pub yearly_price: i64,
    pub description: &'static str,
}

const PLANS: [PlanDefinition; 5] = [
    PlanDefinition {
        tier: PlanTier::Free,
        display_name: "フリー",
        label: "Free",
        monthly_price: 0,
        yearly_price: 0,
        description: "Try image generation with a small monthly allowance",
    },
    PlanDefinition {
        tier: PlanTier::Starter,
        display_name: "スターター",
        label: "Starter",
        monthly_price: 5_000,
        yearly_price: 48_000,
        description: "For small brands getting started",
    },
    PlanDefinition {
        tier: PlanTier::Pro,
        display_name: "プロフェッショナル",
        label: "Pro",
        monthly_price: 20_000,
        yearly_price: 192_000,
        description: "Higher limits and video generation",
    },
    PlanDefinition {
        tier: PlanTier::Business,
        display_name: "ビジネス",
        label: "Business",
        monthly_price: 50_000,
        yearly_price: 480_000,
        description: "API access for teams and integrations",
    },
    PlanDefinition {
        tier: PlanTier::Enterprise,
        display_name: "エンタープライズ",
        label: "Enterprise",
        monthly_price: 100_000,
        yearly_price: 960_000,
        description: "Unlimited generation and dedicated support",
    },
];

impl PlanTier {
    /// All tiers in rank order.
    pub const ALL: [PlanTier; 5] = [
        PlanTier::Free,
        PlanTier::Starter,
        PlanTier::Pro,
        PlanTier::Business,
        PlanTier::Enterprise,
    ];

    /// The tier used when a stored value is missing or unknown.
    #[must_use]
    pub const fn lowest() -> Self {
        PlanTier::Free
    }

    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Business => "business",
            Self::Enterprise => "enterprise",
        }
    }

    /// Position in the fixed ordering, starting at 0.
    #[must_use]
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    #[must_use]
    pub fn definition(&self) -> &'static PlanDefinition {
        &PLANS[self.rank() as usize]
    }

    #[must_use]
    pub fn display_name(&self) -> &'static str {
        self.definition().display_name
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.definition().label
    }

    /// Price for one billing cycle of the given interval.
    #[must_use]
    pub fn price(&self, interval: BillingInterval) -> i64 {
        let def = self.definition();
        match interval {
            BillingInterval::Month => def.monthly_price,
            BillingInterval::Year => def.yearly_price,
        }
    }

    /// Resolve a stored plan value, falling back to the lowest tier.
    ///
    /// Unknown or missing values never grant more than the free tier.
    #[must_use]
    pub fn from_stored(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(Self::lowest)
    }

    /// Whether moving from `self` to `target` is a strict upgrade.
    #[must_use]
    pub fn is_upgrade_to(&self, target: PlanTier) -> bool {
        target > *self
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for PlanTier {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "pro" | "professional" => Ok(Self::Pro),
            "business" => Ok(Self::Business),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(BillingError::PlanNotFound {
                plan_id: s.to_string(),
            }),
        }
    }
}

/// Billing cycle length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Month,
    Year,
}

impl BillingInterval {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingInterval {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "month" | "monthly" => Ok(Self::Month),
            "year" | "yearly" | "annual" | "annually" => Ok(Self::Year),
            other => Err(BillingError::InvalidBillingInterval {
                value: other.to_string(),
            }),
        }
    }
}
