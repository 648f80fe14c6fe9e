use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use super::budget::BudgetLedger;
use crate::config::AppConfig;

/// Shared state for proxy handlers.
pub struct ProxyState {
    pub config: AppConfig,
    /// Keyed by client identity
    pub limiter: DefaultKeyedRateLimiter<String>,
    pub budgets: BudgetLedger,
    pub http: reqwest::Client,
}

impl ProxyState {
    pub fn new(config: AppConfig) -> Arc<Self> {
        let per_minute = NonZeroU32::new(config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.rate_limit_burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);

        let budgets = BudgetLedger::new(config.session_budget());

        Arc::new(Self {
            limiter: RateLimiter::keyed(quota),
            budgets,
            http: reqwest::Client::new(),
            config,
        })
    }
}
