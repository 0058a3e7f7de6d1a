//! Monthly usage counting.
//!
//! The quota window is the current calendar month in UTC:
//! `[start_of_utc_month(now), now]`. Every generation record in the window
//! counts, whatever its status, so a failed attempt still consumes quota.
//!
//! Checks are pure reads performed fresh on every call. Recording usage is the
//! generation pipeline's job.

use serde::Serialize;
use std::sync::Arc;

use super::entitlements::{EntitlementTable, LimitCheckResult};
use super::plans::PlanTier;
use crate::clock::{Clock, start_of_utc_month};
use crate::error::Result;
use crate::generation::GenerationKind;
use crate::storage::{AccountId, GenerationStore};

/// Usage of one generation kind in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindUsage {
    pub used: u64,
    /// `-1` when unlimited.
    pub limit: i64,
    /// `-1` when unlimited.
    pub remaining: i64,
}

/// Usage summary for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub plan: PlanTier,
    pub period_start: chrono::DateTime<chrono::Utc>,
    pub images: KindUsage,
    pub videos: KindUsage,
}

/// Counts generations against plan quotas.
#[derive(Clone)]
pub struct UsageCounter {
    store: Arc<dyn GenerationStore>,
    entitlements: EntitlementTable,
    clock: Arc<dyn Clock>,
}

impl UsageCounter {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        entitlements: EntitlementTable,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            entitlements,
            clock,
        }
    }

    /// Generations of `kind` in the current window.
    pub async fn current_usage(&self, account_id: &AccountId, kind: GenerationKind) -> Result<u64> {
        let now = self.clock.now();
        self.store
            .count_generations(account_id, kind, start_of_utc_month(now), now)
            .await
    }

    /// Compare current usage with the tier's quota.
    ///
    /// Unlimited quotas short-circuit without touching the store.
    pub async fn check(
        &self,
        account_id: &AccountId,
        kind: GenerationKind,
        tier: PlanTier,
    ) -> Result<LimitCheckResult> {
        let quota = self.entitlements.quota(tier, kind);
        if quota.limit().is_none() {
            return Ok(LimitCheckResult::Unlimited);
        }

        let used = self.current_usage(account_id, kind).await?;
        Ok(quota.check(used))
    }

    /// Whether one more generation of `kind` is allowed.
    pub async fn can_generate(
        &self,
        account_id: &AccountId,
        kind: GenerationKind,
        tier: PlanTier,
    ) -> Result<bool> {
        Ok(self.check(account_id, kind, tier).await?.is_allowed())
    }

    pub async fn report(&self, account_id: &AccountId, tier: PlanTier) -> Result<UsageReport> {
        let caps = self.entitlements.capabilities_of(tier);
        let usage = |kind: GenerationKind, used: u64| {
            let quota = caps.quota_for(kind);
            KindUsage {
                used,
                limit: quota.limit_or_unbounded(),
                remaining: quota.remaining_or_unbounded(used),
            }
        };

        let images = self.current_usage(account_id, GenerationKind::Image).await?;
        let videos = self.current_usage(account_id, GenerationKind::Video).await?;

        Ok(UsageReport {
            plan: tier,
            period_start: start_of_utc_month(self.clock.now()),
            images: usage(GenerationKind::Image, images),
            videos: usage(GenerationKind::Video, videos),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::generation::GenerationStatus;
    use crate::storage::{GenerationRecord, MemoryStore};
    use chrono::{DateTime, Duration, Utc};
    use uuid::Uuid;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().to_utc()
    }

    async fn seed(store: &MemoryStore, account_id: AccountId, kind: GenerationKind, n: usize, created_at: DateTime<Utc>) {
        for i in 0..n {
            let status = if i % 2 == 0 { GenerationStatus::Completed } else { GenerationStatus::Failed };
            store
                .insert_generation(&GenerationRecord {
                    id: Uuid::new_v4(),
                    account_id,
                    kind,
                    status,
                    prompt: format!("prompt {i}"),
                    output_url: None,
                    error_message: None,
                    created_at,
                })
                .await
                .unwrap();
        }
    }

    fn counter(store: &MemoryStore, now: DateTime<Utc>) -> UsageCounter {
        UsageCounter::new(
            Arc::new(store.clone()),
            EntitlementTable::default(),
            Arc::new(FixedClock::new(now)),
        )
    }

    #[tokio::test]
    async fn test_quota_boundary() {
        // Free tier: 10 images per month
        let now = at("2026-05-20T12:00:00Z");
        let account = AccountId::new();

        let store = MemoryStore::new();
        seed(&store, account, GenerationKind::Image, 9, at("2026-05-02T00:00:00Z")).await;
        let usage = counter(&store, now);
        assert!(usage.can_generate(&account, GenerationKind::Image, PlanTier::Free).await.unwrap());

        seed(&store, account, GenerationKind::Image, 1, at("2026-05-20T11:00:00Z")).await;
        assert!(!usage.can_generate(&account, GenerationKind::Image, PlanTier::Free).await.unwrap());
        assert_eq!(
            usage.check(&account, GenerationKind::Image, PlanTier::Free).await.unwrap(),
            LimitCheckResult::AtLimit { current: 10, max: 10 }
        );
    }

    #[tokio::test]
    async fn test_previous_month_does_not_count() {
        let now = at("2026-05-01T00:30:00Z");
        let account = AccountId::new();
        let store = MemoryStore::new();
        seed(&store, account, GenerationKind::Image, 10, at("2026-04-30T23:59:59Z")).await;

        let usage = counter(&store, now);
        assert!(usage.can_generate(&account, GenerationKind::Image, PlanTier::Free).await.unwrap());
        assert_eq!(usage.current_usage(&account, GenerationKind::Image).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_generations_count() {
        let now = at("2026-05-20T12:00:00Z");
        let account = AccountId::new();
        let store = MemoryStore::new();
        // Half of these are failed
        seed(&store, account, GenerationKind::Image, 10, now - Duration::hours(1)).await;

        let usage = counter(&store, now);
        assert_eq!(usage.current_usage(&account, GenerationKind::Image).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_zero_quota_blocks_first_generation() {
        let usage = counter(&MemoryStore::new(), at("2026-05-20T12:00:00Z"));
        let account = AccountId::new();
        assert!(!usage.can_generate(&account, GenerationKind::Video, PlanTier::Starter).await.unwrap());
    }

    #[tokio::test]
    async fn test_unlimited_always_allows() {
        let now = at("2026-05-20T12:00:00Z");
        let account = AccountId::new();
        let store = MemoryStore::new();
        seed(&store, account, GenerationKind::Video, 500, now).await;

        let usage = counter(&store, now);
        assert_eq!(
            usage.check(&account, GenerationKind::Video, PlanTier::Enterprise).await.unwrap(),
            LimitCheckResult::Unlimited
        );
    }

    #[tokio::test]
    async fn test_kinds_are_counted_separately() {
        let now = at("2026-05-20T12:00:00Z");
        let account = AccountId::new();
        let store = MemoryStore::new();
        seed(&store, account, GenerationKind::Video, 50, now).await;

        let usage = counter(&store, now);
        assert!(!usage.can_generate(&account, GenerationKind::Video, PlanTier::Pro).await.unwrap());
        assert!(usage.can_generate(&account, GenerationKind::Image, PlanTier::Pro).await.unwrap());
    }

    #[tokio::test]
    async fn test_report() {
        let now = at("2026-05-20T12:00:00Z");
        let account = AccountId::new();
        let store = MemoryStore::new();
        seed(&store, account, GenerationKind::Image, 3, now).await;

        let report = counter(&store, now).report(&account, PlanTier::Starter).await.unwrap();
        assert_eq!(report.period_start, at("2026-05-01T00:00:00Z"));
        assert_eq!(report.images, KindUsage { used: 3, limit: 50, remaining: 47 });
        assert_eq!(report.videos, KindUsage { used: 0, limit: 0, remaining: 0 });

        let report = counter(&store, now).report(&account, PlanTier::Enterprise).await.unwrap();
        assert_eq!(report.images.remaining, -1);
        assert_eq!(report.images.limit, -1);
    }
}
