use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use marea_core::MareaConnector;
use marea_core::calendar::MarketClock;
use marea_limits::{BudgetTracker, HealthMonitor, RateLimiter};
use marea_types::{DataType, FailoverConfig, MareaError, MarketKind};

/// Orchestrator that routes requests across registered provider adapters.
///
/// One `Marea` owns the rate limiter, budget tracker, and health monitor for
/// its providers; thread the handle through construction instead of reaching
/// for process-wide singletons.
pub struct Marea {
    pub(crate) connectors: Vec<Arc<dyn MareaConnector>>,
    pub(crate) groups: HashMap<(MarketKind, DataType), Vec<Arc<dyn MareaConnector>>>,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) budget: BudgetTracker,
    pub(crate) health: HealthMonitor,
    pub(crate) cfg: FailoverConfig,
    pub(crate) clock: MarketClock,
}

/// Builder for constructing a [`Marea`] orchestrator.
pub struct MareaBuilder {
    connectors: Vec<Arc<dyn MareaConnector>>,
    cfg: FailoverConfig,
    clock: MarketClock,
}

impl Default for MareaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MareaBuilder {
    /// Create a builder with default failover behaviour and market clocks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
            cfg: FailoverConfig::default(),
            clock: MarketClock::default(),
        }
    }

    /// Register a provider adapter.
    ///
    /// Registration order is the tiebreak when priorities are equal, so
    /// register preferred providers first. Duplicate names are rejected at
    /// build time.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn MareaConnector>) -> Self {
        self.connectors.push(connector);
        self
    }

    /// Override the failover behaviour.
    #[must_use]
    pub fn failover(mut self, cfg: FailoverConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Override the per-market clock used by collectors and phase checks.
    #[must_use]
    pub fn market_clock(mut self, clock: MarketClock) -> Self {
        self.clock = clock;
        self
    }

    /// Build the orchestrator: group adapters by capability and configure
    /// the per-provider gates from each adapter's descriptor.
    ///
    /// # Errors
    /// - `InvalidArg` if no connectors were registered.
    /// - `InvalidArg` if two connectors share a name.
    pub fn build(self) -> Result<Marea, MareaError> {
        if self.connectors.is_empty() {
            return Err(MareaError::InvalidArg(
                "no connectors registered; add at least one via with_connector(...)".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for c in &self.connectors {
            if !seen.insert(c.name().to_string()) {
                return Err(MareaError::InvalidArg(format!(
                    "duplicate connector name: {}",
                    c.name()
                )));
            }
        }

        let rate_limiter = RateLimiter::new();
        let budget = BudgetTracker::new();
        let health = HealthMonitor::new();

        let mut groups: HashMap<(MarketKind, DataType), Vec<Arc<dyn MareaConnector>>> =
            HashMap::new();
        for connector in &self.connectors {
            let config = connector.config();
            for &market in &config.supported_markets {
                for &data_type in &config.supported_data_types {
                    groups
                        .entry((market, data_type))
                        .or_default()
                        .push(connector.clone());
                }
            }
            rate_limiter.configure(connector.name(), config.rate_limit.clone());
            budget.configure(connector.name(), config.budget.clone());
            health.configure(connector.name(), config.health.clone());
            info!(
                provider = connector.name(),
                markets = ?config.supported_markets,
                data_types = ?config.supported_data_types,
                priority = config.priority,
                "registered provider"
            );
        }

        // Pre-sort each group by (priority, registration order); selection
        // only re-scores the survivors of the gate filters.
        for group in groups.values_mut() {
            group.sort_by_key(|c| c.config().priority);
        }

        Ok(Marea {
            connectors: self.connectors,
            groups,
            rate_limiter,
            budget,
            health,
            cfg: self.cfg,
            clock: self.clock,
        })
    }
}

impl Marea {
    /// Start building a new orchestrator.
    #[must_use]
    pub fn builder() -> MareaBuilder {
        MareaBuilder::new()
    }

    /// The rate limiter gating this orchestrator's providers.
    #[must_use]
    pub const fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// The budget tracker gating this orchestrator's providers.
    #[must_use]
    pub const fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    /// The health monitor observing this orchestrator's providers.
    #[must_use]
    pub const fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// The per-market clock.
    #[must_use]
    pub const fn market_clock(&self) -> &MarketClock {
        &self.clock
    }

    /// A registered connector by name.
    #[must_use]
    pub fn connector(&self, name: &str) -> Option<Arc<dyn MareaConnector>> {
        self.connectors.iter().find(|c| c.name() == name).cloned()
    }

    /// Initialize every registered adapter.
    ///
    /// Adapters that fail to initialize are reported but do not abort the
    /// boot: the failover path will route around them.
    pub async fn initialize_all(&self) -> HashMap<String, Result<(), MareaError>> {
        let mut results = HashMap::new();
        for connector in &self.connectors {
            let result = connector.initialize().await;
            if let Err(e) = &result {
                warn!(provider = connector.name(), error = %e, "adapter initialization failed");
            }
            results.insert(connector.name().to_string(), result);
        }
        results
    }

    /// Close every registered adapter. Close is idempotent per the adapter
    /// contract, so shutdown may call this more than once.
    pub async fn close_all(&self) {
        for connector in &self.connectors {
            if let Err(e) = connector.close().await {
                warn!(provider = connector.name(), error = %e, "adapter close failed");
            }
        }
    }
}
