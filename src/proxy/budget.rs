//! Cumulative session-time budget per client identity.
//!
//! Open sessions draw on the allowance while they run, so concurrent relays
//! for one identity share what is left instead of each getting all of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Default)]
struct Account {
    settled: Duration,
    /// Start time of each open session, keyed by lease id
    open: HashMap<u64, Instant>,
}

impl Account {
    fn spent(&self, now: Instant) -> Duration {
        self.open
            .values()
            .fold(self.settled, |spent, started| {
                spent + now.saturating_duration_since(*started)
            })
    }
}

/// Tracks relayed session time per identity against a fixed allowance.
///
/// A zero allowance disables the budget.
#[derive(Debug)]
pub struct BudgetLedger {
    allowance: Duration,
    accounts: Arc<DashMap<String, Account>>,
    next_lease: AtomicU64,
}

impl BudgetLedger {
    pub fn new(allowance: Duration) -> Self {
        Self {
            allowance,
            accounts: Arc::new(DashMap::new()),
            next_lease: AtomicU64::new(1),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.allowance.is_zero()
    }

    /// Time spent by `identity`, open sessions included.
    pub fn used(&self, identity: &str) -> Duration {
        self.accounts
            .get(identity)
            .map(|account| account.spent(Instant::now()))
            .unwrap_or_default()
    }

    /// Time left for `identity`, or `None` when unlimited.
    pub fn remaining(&self, identity: &str) -> Option<Duration> {
        if self.is_unlimited() {
            return None;
        }
        Some(self.allowance.saturating_sub(self.used(identity)))
    }

    pub fn is_exhausted(&self, identity: &str) -> bool {
        self.remaining(identity).is_some_and(|r| r.is_zero())
    }

    /// Number of sessions currently drawing on `identity`'s allowance.
    pub fn open_sessions(&self, identity: &str) -> usize {
        self.accounts
            .get(identity)
            .map(|account| account.open.len())
            .unwrap_or_default()
    }

    /// Open a session for `identity`, or `None` when its time is spent.
    ///
    /// The check and the registration happen under one entry lock. The
    /// returned lease charges elapsed time until it is dropped.
    pub fn admit(&self, identity: &str) -> Option<BudgetLease> {
        let now = Instant::now();
        let mut account = self.accounts.entry(identity.to_string()).or_default();
        if !self.is_unlimited() && account.spent(now) >= self.allowance {
            return None;
        }

        let id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        account.open.insert(id, now);
        tracing::debug!(
            auth_id = %identity,
            open_sessions = account.open.len(),
            "Admitted session against budget"
        );

        Some(BudgetLease {
            accounts: self.accounts.clone(),
            allowance: self.allowance,
            identity: identity.to_string(),
            id,
            started: now,
        })
    }

    /// Charge time outside of any lease.
    pub fn record(&self, identity: &str, elapsed: Duration) {
        let mut account = self.accounts.entry(identity.to_string()).or_default();
        account.settled += elapsed;
        tracing::debug!(
            auth_id = %identity,
            used_secs = account.settled.as_secs(),
            "Recorded session time"
        );
    }
}

/// An admitted session. Dropping it settles its elapsed time.
#[derive(Debug)]
pub struct BudgetLease {
    accounts: Arc<DashMap<String, Account>>,
    allowance: Duration,
    identity: String,
    id: u64,
    started: Instant,
}

impl BudgetLease {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// How long until the identity's allowance runs out if every open
    /// session keeps running. `None` when unlimited.
    pub fn time_left(&self) -> Option<Duration> {
        if self.allowance.is_zero() {
            return None;
        }
        let Some(account) = self.accounts.get(&self.identity) else {
            return Some(Duration::ZERO);
        };
        let remaining = self.allowance.saturating_sub(account.spent(Instant::now()));
        let open = u32::try_from(account.open.len().max(1)).unwrap_or(u32::MAX);
        Some(remaining / open)
    }

    pub fn is_exhausted(&self) -> bool {
        self.time_left().is_some_and(|left| left.is_zero())
    }
}

impl Drop for BudgetLease {
    fn drop(&mut self) {
        if let Some(mut account) = self.accounts.get_mut(&self.identity)
            && let Some(started) = account.open.remove(&self.id)
        {
            account.settled += started.elapsed();
            tracing::debug!(
                auth_id = %self.identity,
                used_ms = account.settled.as_millis() as u64,
                "Settled session time"
            );
        }
    }
}
