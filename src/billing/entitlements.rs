//! Entitlement table.
//!
//! Pure lookup from [`PlanTier`] to capability flags and monthly quotas.
//! Nothing here performs I/O; usage is counted by
//! [`UsageCounter`](super::usage::UsageCounter).

use serde::{Deserialize, Serialize};

use super::plans::PlanTier;
use crate::generation::GenerationKind;

/// A monthly allowance for one generation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quota {
    Limited(u32),
    Unlimited,
}

impl Quota {
    /// The cap, or `None` when unlimited.
    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        match self {
            Self::Limited(n) => Some(u64::from(*n)),
            Self::Unlimited => None,
        }
    }

    /// Compare current usage against this quota.
    #[must_use]
    pub fn check(&self, current: u64) -> LimitCheckResult {
        match self.limit() {
            None => LimitCheckResult::Unlimited,
            Some(max) if current < max => LimitCheckResult::WithinLimit { current, max },
            Some(max) => LimitCheckResult::AtLimit { current, max },
        }
    }

    /// Remaining allowance in the wire convention: `-1` means unlimited.
    #[must_use]
    pub fn remaining_or_unbounded(&self, used: u64) -> i64 {
        match self.limit() {
            Some(max) => max.saturating_sub(used) as i64,
            None => -1,
        }
    }

    /// Limit in the wire convention: `-1` means unlimited.
    #[must_use]
    pub fn limit_or_unbounded(&self) -> i64 {
        self.limit().map(|v| v as i64).unwrap_or(-1)
    }
}

/// Result of checking usage against a quota.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LimitCheckResult {
    /// No limit on this resource.
    Unlimited,
    /// Usage is within the limit.
    WithinLimit { current: u64, max: u64 },
    /// Usage has reached or exceeded the limit.
    AtLimit { current: u64, max: u64 },
}

impl LimitCheckResult {
    /// Whether one more unit may be consumed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::AtLimit { .. })
    }
}

/// What a tier is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub api_access: bool,
    pub monthly_image_quota: Quota,
    pub monthly_video_quota: Quota,
}

impl Capabilities {
    #[must_use]
    pub fn quota_for(&self, kind: GenerationKind) -> Quota {
        match kind {
            GenerationKind::Image => self.monthly_image_quota,
            GenerationKind::Video => self.monthly_video_quota,
        }
    }
}

fn quotas(tier: PlanTier) -> (Quota, Quota) {
    match tier {
        PlanTier::Free => (Quota::Limited(10), Quota::Limited(0)),
        PlanTier::Starter => (Quota::Limited(50), Quota::Limited(0)),
        PlanTier::Pro => (Quota::Limited(500), Quota::Limited(50)),
        PlanTier::Business => (Quota::Limited(2000), Quota::Limited(200)),
        PlanTier::Enterprise => (Quota::Unlimited, Quota::Unlimited),
    }
}

/// Static tier-to-capability mapping.
///
/// The only tunable is the lowest tier that may use API keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitlementTable {
    api_access_threshold: PlanTier,
}

impl Default for EntitlementTable {
    fn default() -> Self {
        Self {
            api_access_threshold: PlanTier::Business,
        }
    }
}

impl EntitlementTable {
    #[must_use]
    pub fn new(api_access_threshold: PlanTier) -> Self {
        Self {
            api_access_threshold,
        }
    }

    /// Lowest tier granted API access.
    #[must_use]
    pub fn api_access_threshold(&self) -> PlanTier {
        self.api_access_threshold
    }

    #[must_use]
    pub fn capabilities_of(&self, tier: PlanTier) -> Capabilities {
        let (monthly_image_quota, monthly_video_quota) = quotas(tier);
        Capabilities {
            api_access: self.has_api_access(tier),
            monthly_image_quota,
            monthly_video_quota,
        }
    }

    /// Capabilities for a raw stored plan value; unknown values get the lowest tier.
    #[must_use]
    pub fn capabilities_of_stored(&self, plan: Option<&str>) -> Capabilities {
        self.capabilities_of(PlanTier::from_stored(plan))
    }

    /// Checked at every API-key-gated boundary.
    #[must_use]
    pub fn has_api_access(&self, tier: PlanTier) -> bool {
        tier >= self.api_access_threshold
    }

    #[must_use]
    pub fn quota(&self, tier: PlanTier, kind: GenerationKind) -> Quota {
        self.capabilities_of(tier).quota_for(kind)
    }
}
