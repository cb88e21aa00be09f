//! Provider descriptor and the per-provider gate configurations.

use std::collections::HashMap;
use std::time::Duration;

use bitflags::bitflags;
use rust_decimal::Decimal;

use crate::market::{DataType, MarketKind};

bitflags! {
    /// Feature flags advertised by a provider adapter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProviderFeatures: u8 {
        /// Supports multi-symbol snapshot requests.
        const BATCH = 1 << 0;
        /// Supports a websocket streaming session.
        const WEBSOCKET = 1 << 1;
        /// Supports historical bar queries.
        const HISTORICAL = 1 << 2;
    }
}

/// Rate-limit configuration for one provider.
///
/// A limit of `None` (or zero) disables that window entirely; the token
/// bucket is always active and derives its refill rate from the per-minute
/// limit (60/min when unset).
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Hard cap per sliding 60 s window.
    pub requests_per_minute: Option<u32>,
    /// Hard cap per sliding 3600 s window.
    pub requests_per_hour: Option<u32>,
    /// Hard cap per sliding 86 400 s window.
    pub requests_per_day: Option<u32>,
    /// Maximum burst the token bucket will admit.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: None,
            requests_per_hour: None,
            requests_per_day: None,
            burst_size: 10,
        }
    }
}

/// Budget configuration for one provider. Caps of zero mean unlimited.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Monetary cap per calendar day.
    pub daily_limit: Decimal,
    /// Monetary cap per calendar month.
    pub monthly_limit: Decimal,
    /// Default cost of one request.
    pub cost_per_request: Decimal,
    /// Extra cost per symbol in batch requests.
    pub cost_per_symbol: Decimal,
    /// Fraction of a cap at which warning alerts fire.
    pub warning_threshold: f64,
    /// Per-endpoint overrides of the request cost.
    pub endpoint_costs: HashMap<String, Decimal>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit: Decimal::ZERO,
            monthly_limit: Decimal::ZERO,
            cost_per_request: Decimal::ZERO,
            cost_per_symbol: Decimal::ZERO,
            warning_threshold: 0.8,
            endpoint_costs: HashMap::new(),
        }
    }
}

/// Health-monitoring and circuit-breaker configuration for one provider.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before the circuit closes.
    pub success_threshold: u32,
    /// How long an open circuit stays open before probing half-open.
    pub open_timeout: Duration,
    /// Mean latency above which the provider is unhealthy.
    pub max_latency_ms: f64,
    /// Mean latency above which a warning is attached to the status.
    pub warning_latency_ms: f64,
    /// Error rate above which a warning is attached to the status.
    pub warning_error_rate: f64,
    /// Error rate above which the provider is unhealthy.
    pub critical_error_rate: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(60),
            max_latency_ms: 5000.0,
            warning_latency_ms: 2000.0,
            warning_error_rate: 0.1,
            critical_error_rate: 0.3,
        }
    }
}

/// Failover behaviour shared across all providers.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Attempts consumed by recoverable provider failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    pub retry_delay_base: Duration,
    /// Cap on the backoff delay.
    pub retry_delay_max: Duration,
    /// Skip providers whose circuit is open.
    pub prefer_healthy: bool,
    /// Skip providers that cannot afford the request.
    pub prefer_budget: bool,
    /// Penalize slow providers in the selection score.
    pub prefer_low_latency: bool,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_base: Duration::from_secs(1),
            retry_delay_max: Duration::from_secs(30),
            prefer_healthy: true,
            prefer_budget: true,
            prefer_low_latency: true,
        }
    }
}

/// Static descriptor for one external data provider.
///
/// Everything except `name` is optional in spirit: defaults produce an
/// unlimited, lowest-preference provider with a 30 s timeout.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Stable provider name used as the key everywhere.
    pub name: String,
    /// API key, when the vendor requires one.
    pub api_key: Option<String>,
    /// API secret, when the vendor requires one.
    pub api_secret: Option<String>,
    /// Base URL template for the vendor endpoints.
    pub base_url: String,
    /// Rate-limit configuration.
    pub rate_limit: RateLimitConfig,
    /// Budget configuration.
    pub budget: BudgetConfig,
    /// Health/circuit configuration.
    pub health: HealthConfig,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Adapter-local retry attempts.
    pub retry_attempts: u32,
    /// Adapter-local base retry delay.
    pub retry_delay: Duration,
    /// Maximum symbols accepted per batch request.
    pub max_symbols_per_request: usize,
    /// Capability flags.
    pub features: ProviderFeatures,
    /// Market segments this provider covers.
    pub supported_markets: Vec<MarketKind>,
    /// Data types this provider serves.
    pub supported_data_types: Vec<DataType>,
    /// Static preference; lower is preferred.
    pub priority: u32,
}

impl ProviderConfig {
    /// Create a descriptor with defaults for everything but the name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: None,
            api_secret: None,
            base_url: String::new(),
            rate_limit: RateLimitConfig::default(),
            budget: BudgetConfig::default(),
            health: HealthConfig::default(),
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            max_symbols_per_request: 100,
            features: ProviderFeatures::HISTORICAL,
            supported_markets: Vec::new(),
            supported_data_types: Vec::new(),
            priority: 100,
        }
    }

    /// Set the static priority (lower = preferred).
    #[must_use]
    pub const fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Declare the supported market segments.
    #[must_use]
    pub fn markets(mut self, markets: &[MarketKind]) -> Self {
        self.supported_markets = markets.to_vec();
        self
    }

    /// Declare the supported data types.
    #[must_use]
    pub fn data_types(mut self, data_types: &[DataType]) -> Self {
        self.supported_data_types = data_types.to_vec();
        self
    }

    /// Replace the rate-limit configuration.
    #[must_use]
    pub fn rate_limit(mut self, cfg: RateLimitConfig) -> Self {
        self.rate_limit = cfg;
        self
    }

    /// Replace the budget configuration.
    #[must_use]
    pub fn budget(mut self, cfg: BudgetConfig) -> Self {
        self.budget = cfg;
        self
    }

    /// Replace the health configuration.
    #[must_use]
    pub fn health(mut self, cfg: HealthConfig) -> Self {
        self.health = cfg;
        self
    }

    /// Replace the capability flags.
    #[must_use]
    pub const fn features(mut self, features: ProviderFeatures) -> Self {
        self.features = features;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether this provider covers a market segment.
    #[must_use]
    pub fn supports_market(&self, market: MarketKind) -> bool {
        self.supported_markets.contains(&market)
    }

    /// Whether this provider serves a data type.
    #[must_use]
    pub fn supports_data_type(&self, data_type: DataType) -> bool {
        self.supported_data_types.contains(&data_type)
    }
}
