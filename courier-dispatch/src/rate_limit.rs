//! Rate-limit planner over the store's sliding-window send counters.
//!
//! Pure policy: given an account's configured limits and the send log, decide
//! whether a message may go now, must wait for the next window boundary, or
//! is rejected outright.

use courier_common::time::next_window_boundary;
use courier_store::{Account, LimitBehavior, Store, StoreError};

/// Window lengths checked against an account's limits, in seconds.
const WINDOWS: [i64; 3] = [60, 3600, 86400];

/// The planner's verdict for one prospective send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePlan {
    /// When the send may be attempted again; `None` means go now.
    pub defer_until: Option<i64>,
    /// Whether the account rejects instead of deferring on a violation.
    pub reject: bool,
}

impl RatePlan {
    /// A plan that allows the send immediately.
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            defer_until: None,
            reject: false,
        }
    }

    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        self.defer_until.is_none()
    }
}

/// Plans sends against an account's sliding-window limits.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Store,
}

impl RateLimiter {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Plan one send at `now`.
    pub async fn plan(&self, account: &Account, now: i64) -> Result<RatePlan, StoreError> {
        self.plan_with_pending(account, now, 0).await
    }

    /// Plan one send at `now`, counting `pending` sends already approved in
    /// the current pass but not yet logged. The dispatcher feeds this so a
    /// single tick cannot blow through a window.
    pub async fn plan_with_pending(
        &self,
        account: &Account,
        now: i64,
        pending: i64,
    ) -> Result<RatePlan, StoreError> {
        let mut defer_until: Option<i64> = None;

        for window in WINDOWS {
            // Zero or absent limits are unlimited.
            let Some(limit) = account.limit_for_window(window).filter(|l| *l > 0) else {
                continue;
            };

            // The budget resets at each window boundary: a message deferred
            // to the boundary must be sendable there.
            let window_start = (now / window) * window;
            let count = self
                .store
                .count_sends_since(&account.id, window_start)
                .await?
                + pending;

            if count >= i64::from(limit) {
                let boundary = next_window_boundary(now, window);
                defer_until = Some(defer_until.map_or(boundary, |d| d.max(boundary)));
            }
        }

        Ok(RatePlan {
            reject: defer_until.is_some() && account.limit_behavior == LimitBehavior::Reject,
            defer_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use courier_store::Tenant;

    use super::*;

    async fn store_with_account(account: &Account) -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store
            .upsert_tenant(&Tenant {
                id: account.tenant_id.clone(),
                name: String::new(),
                active: true,
                client_base_url: None,
                client_sync_path: None,
                client_auth: courier_common::ClientAuth::None,
            })
            .await
            .unwrap();
        store.upsert_account(account).await.unwrap();
        store
    }

    fn account(id: &str) -> Account {
        Account::new("t1", id, "smtp.example.com", 587)
    }

    #[tokio::test]
    async fn test_defer_on_minute_limit() {
        let mut acc = account("acc1");
        acc.limit_per_minute = Some(1);
        let store = store_with_account(&acc).await;
        let limiter = RateLimiter::new(store.clone());

        let plan = limiter.plan(&acc, 1000).await.unwrap();
        assert!(plan.is_allowed());
        assert!(!plan.reject);

        store.log_send("acc1", 1000).await.unwrap();
        let plan = limiter.plan(&acc, 1000).await.unwrap();
        assert_eq!(plan.defer_until, Some(1020));
        assert!(!plan.reject); // default behavior is defer
    }

    #[tokio::test]
    async fn test_zero_limits_are_unlimited() {
        let mut acc = account("acc0");
        acc.limit_per_minute = Some(0);
        acc.limit_per_hour = Some(0);
        acc.limit_per_day = Some(0);
        let store = store_with_account(&acc).await;
        let limiter = RateLimiter::new(store.clone());

        store.log_send("acc0", 999).await.unwrap();
        let plan = limiter.plan(&acc, 1000).await.unwrap();
        assert!(plan.is_allowed());
    }

    #[tokio::test]
    async fn test_violated_windows_defer_to_latest_boundary() {
        let mut acc = account("acc2");
        acc.limit_per_hour = Some(2);
        acc.limit_per_day = Some(3);
        let store = store_with_account(&acc).await;
        let limiter = RateLimiter::new(store.clone());

        let now = 3600 * 10 + 30;
        store.log_send("acc2", now).await.unwrap();
        store.log_send("acc2", now - 10).await.unwrap();
        store.log_send("acc2", now - 3500).await.unwrap();
        store.log_send("acc2", now - 86000).await.unwrap();

        // The current hour window holds 2 >= 2 and the current day window
        // holds 3 >= 3; the plan waits for the later boundary.
        let plan = limiter.plan(&acc, now).await.unwrap();
        assert_eq!(plan.defer_until, Some(86400));

        // Only the hourly cap violated: defer to the next hour.
        acc.limit_per_day = None;
        let plan = limiter.plan(&acc, now).await.unwrap();
        assert_eq!(plan.defer_until, Some(((now / 3600) + 1) * 3600));
    }

    #[tokio::test]
    async fn test_reject_behavior() {
        let mut acc = account("acc-reject");
        acc.limit_per_minute = Some(1);
        acc.limit_behavior = LimitBehavior::Reject;
        let store = store_with_account(&acc).await;
        let limiter = RateLimiter::new(store.clone());

        let plan = limiter.plan(&acc, 1000).await.unwrap();
        assert!(plan.is_allowed());
        assert!(!plan.reject);

        store.log_send("acc-reject", 1000).await.unwrap();
        let plan = limiter.plan(&acc, 1005).await.unwrap();
        assert!(plan.defer_until.is_some());
        assert!(plan.reject);
    }

    #[tokio::test]
    async fn test_pending_counts_toward_window() {
        let mut acc = account("acc3");
        acc.limit_per_minute = Some(2);
        let store = store_with_account(&acc).await;
        let limiter = RateLimiter::new(store);

        // Nothing logged yet, but two sends already approved this tick.
        let plan = limiter.plan_with_pending(&acc, 1000, 2).await.unwrap();
        assert_eq!(plan.defer_until, Some(1020));

        let plan = limiter.plan_with_pending(&acc, 1000, 1).await.unwrap();
        assert!(plan.is_allowed());
    }
}
