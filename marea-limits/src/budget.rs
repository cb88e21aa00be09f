//! Monetary budget enforcement with atomic check-and-record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Datelike, NaiveDate, Utc};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{error, info, warn};

use marea_types::{BudgetConfig, BudgetScope, MareaError};

/// Budget alert kinds delivered to registered callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAlert {
    /// Daily spend crossed the warning threshold.
    DailyWarning,
    /// Monthly spend crossed the warning threshold.
    MonthlyWarning,
}

/// Live spend counters for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetUsage {
    /// Calendar day the daily counters belong to.
    pub date: NaiveDate,
    /// Spend so far today.
    pub daily_spent: Decimal,
    /// Spend so far this month.
    pub monthly_spent: Decimal,
    /// Requests recorded today.
    pub request_count: u64,
    /// Spend breakdown by endpoint.
    pub endpoint_usage: HashMap<String, Decimal>,
}

impl BudgetUsage {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            daily_spent: Decimal::ZERO,
            monthly_spent: Decimal::ZERO,
            request_count: 0,
            endpoint_usage: HashMap::new(),
        }
    }

    fn reset_daily(&mut self, today: NaiveDate) {
        self.daily_spent = Decimal::ZERO;
        self.request_count = 0;
        self.endpoint_usage.clear();
        self.date = today;
    }

    fn reset_monthly(&mut self, today: NaiveDate) {
        self.monthly_spent = Decimal::ZERO;
        self.reset_daily(today);
    }
}

/// Detailed budget statistics for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStats {
    /// Whether a budget is configured for the provider.
    pub configured: bool,
    /// Configured daily cap (zero = unlimited).
    pub daily_limit: Decimal,
    /// Configured monthly cap (zero = unlimited).
    pub monthly_limit: Decimal,
    /// Spend so far today.
    pub daily_spent: Decimal,
    /// Spend so far this month.
    pub monthly_spent: Decimal,
    /// Requests recorded today.
    pub request_count: u64,
    /// Remaining daily headroom, when a cap is set.
    pub daily_remaining: Option<Decimal>,
    /// Remaining monthly headroom, when a cap is set.
    pub monthly_remaining: Option<Decimal>,
}

type AlertCallback = Arc<dyn Fn(String, BudgetAlert, f64) -> BoxFuture<'static, ()> + Send + Sync>;

struct ProviderBudget {
    config: BudgetConfig,
    usage: Arc<Mutex<BudgetUsage>>,
}

/// Tracks API spend across providers and enforces monetary caps.
///
/// `check_and_record` is the hot path: roll over stale calendar windows,
/// price the request, and atomically reject-or-commit under the provider's
/// lock. Alert callbacks fire after the commit and can never fail the
/// request.
pub struct BudgetTracker {
    providers: Mutex<HashMap<String, Arc<ProviderBudget>>>,
    callbacks: Mutex<Vec<AlertCallback>>,
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BudgetTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Configure (or reconfigure) the budget for a provider.
    pub fn configure(&self, provider: &str, config: BudgetConfig) {
        info!(
            provider,
            daily = %config.daily_limit,
            monthly = %config.monthly_limit,
            "budget configured"
        );
        let entry = Arc::new(ProviderBudget {
            config,
            usage: Arc::new(Mutex::new(BudgetUsage::new(Utc::now().date_naive()))),
        });
        self.providers
            .lock()
            .expect("budget registry lock poisoned")
            .insert(provider.to_string(), entry);
    }

    /// Register an async callback for budget alerts.
    ///
    /// The callback receives the provider name, the alert kind, and the
    /// spent fraction of the cap. Callback panics and errors are logged and
    /// never affect the triggering request.
    pub fn register_alert_callback<F>(&self, callback: F)
    where
        F: Fn(String, BudgetAlert, f64) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .expect("budget callback lock poisoned")
            .push(Arc::new(callback));
    }

    fn entry(&self, provider: &str) -> Option<Arc<ProviderBudget>> {
        self.providers
            .lock()
            .expect("budget registry lock poisoned")
            .get(provider)
            .cloned()
    }

    fn calculate_cost(
        config: &BudgetConfig,
        endpoint: Option<&str>,
        symbol_count: u32,
    ) -> Decimal {
        let base = endpoint
            .and_then(|e| config.endpoint_costs.get(e).copied())
            .unwrap_or(config.cost_per_request);
        base + config.cost_per_symbol * Decimal::from(symbol_count)
    }

    /// Check budget headroom and record the spend, atomically.
    ///
    /// Cost resolution order: `explicit_cost`, then the endpoint override,
    /// then the default per-request cost; plus per-symbol cost times
    /// `symbol_count`. Counters roll over when the calendar day or month has
    /// changed since they were last touched.
    ///
    /// # Errors
    /// [`MareaError::BudgetExceeded`] when a set cap would be crossed; the
    /// spend is not recorded in that case.
    pub async fn check_and_record(
        &self,
        provider: &str,
        endpoint: Option<&str>,
        symbol_count: u32,
        explicit_cost: Option<Decimal>,
    ) -> Result<(), MareaError> {
        let Some(entry) = self.entry(provider) else {
            // No budget configured, allow all.
            return Ok(());
        };

        let today = Utc::now().date_naive();
        let cost =
            explicit_cost.unwrap_or_else(|| Self::calculate_cost(&entry.config, endpoint, symbol_count));

        let mut alerts: Vec<(BudgetAlert, f64)> = Vec::new();
        {
            let mut usage = entry.usage.lock().expect("budget usage lock poisoned");

            if usage.date != today {
                if usage.date.month() != today.month() || usage.date.year() != today.year() {
                    info!(provider, "monthly budget roll-over");
                    usage.reset_monthly(today);
                } else {
                    info!(provider, "daily budget roll-over");
                    usage.reset_daily(today);
                }
            }

            let config = &entry.config;
            if config.daily_limit > Decimal::ZERO
                && usage.daily_spent + cost > config.daily_limit
            {
                return Err(MareaError::BudgetExceeded {
                    provider: provider.to_string(),
                    scope: BudgetScope::Daily,
                    limit: config.daily_limit,
                    spent: usage.daily_spent,
                });
            }
            if config.monthly_limit > Decimal::ZERO
                && usage.monthly_spent + cost > config.monthly_limit
            {
                return Err(MareaError::BudgetExceeded {
                    provider: provider.to_string(),
                    scope: BudgetScope::Monthly,
                    limit: config.monthly_limit,
                    spent: usage.monthly_spent,
                });
            }

            usage.daily_spent += cost;
            usage.monthly_spent += cost;
            usage.request_count += 1;
            if let Some(endpoint) = endpoint {
                *usage
                    .endpoint_usage
                    .entry(endpoint.to_string())
                    .or_insert(Decimal::ZERO) += cost;
            }

            if config.daily_limit > Decimal::ZERO {
                let pct = (usage.daily_spent / config.daily_limit)
                    .to_f64()
                    .unwrap_or(0.0);
                if pct >= config.warning_threshold {
                    alerts.push((BudgetAlert::DailyWarning, pct));
                }
            }
            if config.monthly_limit > Decimal::ZERO {
                let pct = (usage.monthly_spent / config.monthly_limit)
                    .to_f64()
                    .unwrap_or(0.0);
                if pct >= config.warning_threshold {
                    alerts.push((BudgetAlert::MonthlyWarning, pct));
                }
            }
        }

        for (alert, pct) in alerts {
            self.send_alert(provider, alert, pct).await;
        }
        Ok(())
    }

    async fn send_alert(&self, provider: &str, alert: BudgetAlert, pct: f64) {
        warn!(provider, ?alert, pct = pct * 100.0, "budget alert");
        let callbacks: Vec<AlertCallback> = self
            .callbacks
            .lock()
            .expect("budget callback lock poisoned")
            .clone();
        for callback in callbacks {
            let fut = std::panic::AssertUnwindSafe(callback(provider.to_string(), alert, pct));
            if futures::FutureExt::catch_unwind(fut).await.is_err() {
                error!(provider, ?alert, "budget alert callback panicked");
            }
        }
    }

    /// Non-mutating peek: whether a request of the given shape fits the
    /// remaining budget.
    #[must_use]
    pub fn can_afford(
        &self,
        provider: &str,
        endpoint: Option<&str>,
        symbol_count: u32,
        explicit_cost: Option<Decimal>,
    ) -> bool {
        let Some(entry) = self.entry(provider) else {
            return true;
        };
        let cost =
            explicit_cost.unwrap_or_else(|| Self::calculate_cost(&entry.config, endpoint, symbol_count));
        let usage = entry.usage.lock().expect("budget usage lock poisoned");
        let config = &entry.config;

        if config.daily_limit > Decimal::ZERO && usage.daily_spent + cost > config.daily_limit {
            return false;
        }
        if config.monthly_limit > Decimal::ZERO
            && usage.monthly_spent + cost > config.monthly_limit
        {
            return false;
        }
        true
    }

    /// Current usage counters for a provider, when configured.
    #[must_use]
    pub fn usage(&self, provider: &str) -> Option<BudgetUsage> {
        self.entry(provider)
            .map(|e| e.usage.lock().expect("budget usage lock poisoned").clone())
    }

    /// Remaining (daily, monthly) headroom; `None` per window means unlimited.
    #[must_use]
    pub fn remaining(&self, provider: &str) -> (Option<Decimal>, Option<Decimal>) {
        let Some(entry) = self.entry(provider) else {
            return (None, None);
        };
        let usage = entry.usage.lock().expect("budget usage lock poisoned");
        let headroom = |limit: Decimal, spent: Decimal| {
            (limit > Decimal::ZERO).then(|| (limit - spent).max(Decimal::ZERO))
        };
        (
            headroom(entry.config.daily_limit, usage.daily_spent),
            headroom(entry.config.monthly_limit, usage.monthly_spent),
        )
    }

    /// Detailed statistics for one provider.
    #[must_use]
    pub fn stats(&self, provider: &str) -> BudgetStats {
        let Some(entry) = self.entry(provider) else {
            return BudgetStats {
                configured: false,
                daily_limit: Decimal::ZERO,
                monthly_limit: Decimal::ZERO,
                daily_spent: Decimal::ZERO,
                monthly_spent: Decimal::ZERO,
                request_count: 0,
                daily_remaining: None,
                monthly_remaining: None,
            };
        };
        let (daily_remaining, monthly_remaining) = self.remaining(provider);
        let usage = entry.usage.lock().expect("budget usage lock poisoned");
        BudgetStats {
            configured: true,
            daily_limit: entry.config.daily_limit,
            monthly_limit: entry.config.monthly_limit,
            daily_spent: usage.daily_spent,
            monthly_spent: usage.monthly_spent,
            request_count: usage.request_count,
            daily_remaining,
            monthly_remaining,
        }
    }

    /// Statistics for every configured provider.
    #[must_use]
    pub fn all_stats(&self) -> HashMap<String, BudgetStats> {
        let names: Vec<String> = self
            .providers
            .lock()
            .expect("budget registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names
            .into_iter()
            .map(|name| {
                let stats = self.stats(&name);
                (name, stats)
            })
            .collect()
    }

    /// Admin reset of the daily counters for a provider.
    pub fn reset_daily(&self, provider: &str) {
        if let Some(entry) = self.entry(provider) {
            let mut usage = entry.usage.lock().expect("budget usage lock poisoned");
            let today = Utc::now().date_naive();
            usage.reset_daily(today);
            info!(provider, "daily budget reset");
        }
    }

    /// Admin reset of the monthly (and daily) counters for a provider.
    pub fn reset_monthly(&self, provider: &str) {
        if let Some(entry) = self.entry(provider) {
            let mut usage = entry.usage.lock().expect("budget usage lock poisoned");
            let today = Utc::now().date_naive();
            usage.reset_monthly(today);
            info!(provider, "monthly budget reset");
        }
    }
}
