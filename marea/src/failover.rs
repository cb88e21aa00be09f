//! Provider selection, retrying execution, and cross-provider broadcast.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use marea_core::MareaConnector;
use marea_limits::{BudgetStats, HealthReport, RateLimiterStats};
use marea_types::{Bar, DataType, MareaError, MarketKind, Quote, Timeframe};

use crate::core::Marea;

/// Status snapshot for one registered provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    /// Health monitor view.
    pub health: HealthReport,
    /// Rate limiter view.
    pub rate_limit: RateLimiterStats,
    /// Budget tracker view.
    pub budget: BudgetStats,
    /// Static priority from the descriptor.
    pub priority: u32,
    /// Markets the provider covers.
    pub markets: Vec<MarketKind>,
    /// Data types the provider serves.
    pub data_types: Vec<DataType>,
}

/// Aggregate status of the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    /// Per-provider reports keyed by name.
    pub providers: HashMap<String, ProviderReport>,
    /// Group membership keyed by "market/data_type", in selection order.
    pub groups: HashMap<String, Vec<String>>,
}

impl Marea {
    /// Providers registered for a (market, data type) pair, ordered by
    /// priority with registration order as tiebreak.
    #[must_use]
    pub fn providers_for(
        &self,
        market: MarketKind,
        data_type: DataType,
    ) -> Vec<Arc<dyn MareaConnector>> {
        self.groups
            .get(&(market, data_type))
            .cloned()
            .unwrap_or_default()
    }

    fn provider_score(&self, connector: &Arc<dyn MareaConnector>) -> f64 {
        let mut score = f64::from(connector.config().priority);
        let report = self.health.health(connector.name());
        if self.cfg.prefer_low_latency {
            score += (report.avg_latency_ms / 1000.0).min(10.0);
        }
        score += report.error_rate * 50.0;
        score
    }

    /// Select the best available provider for a request.
    ///
    /// Candidates that are excluded, circuit-open, over budget, or out of
    /// rate-limit headroom are dropped; the survivors are scored by static
    /// priority plus a latency term (capped at +10) and an error-rate
    /// penalty (`error_rate * 50`). Lowest score wins; ties fall back to
    /// registration order.
    #[must_use]
    pub fn select_provider(
        &self,
        market: MarketKind,
        data_type: DataType,
        exclude: &[String],
    ) -> Option<Arc<dyn MareaConnector>> {
        let candidates = self.providers_for(market, data_type);
        if candidates.is_empty() {
            warn!(%market, %data_type, "no providers registered for group");
            return None;
        }

        let mut best: Option<(f64, Arc<dyn MareaConnector>)> = None;
        for candidate in candidates {
            let name = candidate.name();
            if exclude.iter().any(|e| e == name) {
                continue;
            }
            if self.cfg.prefer_healthy && !self.health.can_request(name) {
                continue;
            }
            if self.cfg.prefer_budget && !self.budget.can_afford(name, None, 1, None) {
                continue;
            }
            if !self.rate_limiter.can_proceed(name) {
                continue;
            }
            let score = self.provider_score(&candidate);
            if best.as_ref().is_none_or(|(s, _)| score < *s) {
                best = Some((score, candidate));
            }
        }

        match best {
            Some((score, connector)) => {
                debug!(
                    provider = connector.name(),
                    score,
                    %market,
                    %data_type,
                    "selected provider"
                );
                Some(connector)
            }
            None => {
                warn!(%market, %data_type, "no available providers for group");
                None
            }
        }
    }

    /// Execute an operation with automatic failover across providers.
    ///
    /// Each attempt acquires a rate-limit token (waiting cooperatively),
    /// records the budget spend, then runs the operation under the
    /// adapter's timeout. Rate-limit, budget, and data-availability misses
    /// exclude the provider for this request without touching its health.
    /// Recoverable faults record a health failure, exclude the provider,
    /// and consume one retry attempt after exponential backoff.
    /// Non-recoverable faults surface immediately.
    ///
    /// # Errors
    /// [`MareaError::AllProvidersFailed`] naming the operation, with the
    /// last underlying error attached, once no candidate remains or the
    /// retry budget is spent.
    pub async fn execute_with_failover<T, F, Fut>(
        &self,
        market: MarketKind,
        data_type: DataType,
        operation_name: &str,
        operation: F,
    ) -> Result<T, MareaError>
    where
        T: Send,
        F: Fn(Arc<dyn MareaConnector>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, MareaError>> + Send,
    {
        let mut excluded: Vec<String> = Vec::new();
        let mut attempt: u32 = 0;
        let mut last_error: Option<MareaError> = None;

        while attempt < self.cfg.max_retries {
            let Some(provider) = self.select_provider(market, data_type, &excluded) else {
                break;
            };
            let name = provider.name().to_string();

            self.rate_limiter.acquire(&name).await;

            if let Err(e) = self.budget.check_and_record(&name, None, 1, None).await {
                warn!(provider = %name, error = %e, "budget exhausted, excluding provider");
                excluded.push(name);
                last_error = Some(e);
                continue;
            }

            let timeout = provider.config().timeout;
            let started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, operation(provider.clone())).await {
                Ok(outcome) => outcome,
                Err(_) => Err(MareaError::provider(
                    name.clone(),
                    format!("timed out after {}s", timeout.as_secs()),
                )),
            };

            match outcome {
                Ok(result) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    self.health.record_success(&name, latency_ms).await;
                    return Ok(result);
                }
                Err(e @ (MareaError::RateLimited { .. } | MareaError::BudgetExceeded { .. })) => {
                    // The provider is throttled, not broken.
                    warn!(provider = %name, error = %e, "excluding throttled provider");
                    excluded.push(name);
                    last_error = Some(e);
                }
                Err(e @ MareaError::NotAvailable { .. }) => {
                    // Another provider may still carry the data.
                    debug!(provider = %name, error = %e, "data not available, trying elsewhere");
                    excluded.push(name);
                    last_error = Some(e);
                }
                Err(e @ MareaError::Auth { .. }) => {
                    self.health.record_failure(&name, Some(&e.to_string())).await;
                    error!(provider = %name, "authentication failure, aborting request path");
                    return Err(e);
                }
                Err(e @ MareaError::Provider {
                    recoverable: false, ..
                }) => {
                    self.health.record_failure(&name, Some(&e.to_string())).await;
                    return Err(e);
                }
                Err(e) => {
                    self.health.record_failure(&name, Some(&e.to_string())).await;
                    excluded.push(name);
                    let delay =
                        backoff_delay(self.cfg.retry_delay_base, self.cfg.retry_delay_max, attempt);
                    info!(
                        operation = operation_name,
                        delay_s = delay.as_secs_f64(),
                        "retrying after recoverable failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    last_error = Some(e);
                }
            }
        }

        Err(MareaError::AllProvidersFailed {
            operation: operation_name.to_string(),
            last: last_error.map(Box::new),
        })
    }

    /// Run an operation against every circuit-admitted provider of a group
    /// concurrently, returning per-provider results.
    ///
    /// Useful for cross-provider sanity checks and redundant fetches;
    /// broadcast does not consume rate-limit or budget headroom and does
    /// not record health outcomes.
    pub async fn broadcast<T, F, Fut>(
        &self,
        market: MarketKind,
        data_type: DataType,
        operation: F,
    ) -> Vec<(String, Result<T, MareaError>)>
    where
        T: Send,
        F: Fn(Arc<dyn MareaConnector>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, MareaError>> + Send,
    {
        let mut futs = FuturesUnordered::new();
        for provider in self.providers_for(market, data_type) {
            if !self.health.can_request(provider.name()) {
                continue;
            }
            let name = provider.name().to_string();
            let fut = operation(provider.clone());
            futs.push(async move { (name, fut.await) });
        }

        let mut results = Vec::new();
        while let Some(entry) = futs.next().await {
            results.push(entry);
        }
        results
    }

    /// Fetch a quote for one symbol through the failover path.
    ///
    /// # Errors
    /// Terminal failover error when every eligible provider fails.
    pub async fn get_quote(
        &self,
        symbol: &str,
        market: MarketKind,
    ) -> Result<Quote, MareaError> {
        let symbol = symbol.to_string();
        self.execute_with_failover(market, DataType::Quote, "get_quote", move |provider| {
            let symbol = symbol.clone();
            async move {
                let feed = provider
                    .as_quote_feed()
                    .ok_or_else(|| MareaError::unsupported("quote"))?;
                feed.quote(&symbol).await
            }
        })
        .await
    }

    /// Fetch quotes for a batch of symbols through the failover path.
    ///
    /// Partial results are permitted; a missing key signals per-symbol
    /// unavailability at the provider that served the batch.
    ///
    /// # Errors
    /// Terminal failover error when every eligible provider fails.
    pub async fn get_quotes(
        &self,
        symbols: &[String],
        market: MarketKind,
    ) -> Result<HashMap<String, Quote>, MareaError> {
        let symbols = symbols.to_vec();
        self.execute_with_failover(market, DataType::Quote, "get_quotes", move |provider| {
            let symbols = symbols.clone();
            async move {
                let feed = provider
                    .as_quote_feed()
                    .ok_or_else(|| MareaError::unsupported("quotes"))?;
                feed.quotes(&symbols).await
            }
        })
        .await
    }

    /// Fetch historical bars through the failover path.
    ///
    /// The returned series is sorted ascending and deduplicated on the bar
    /// identity triple regardless of adapter behaviour.
    ///
    /// # Errors
    /// Terminal failover error when every eligible provider fails.
    pub async fn get_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
        market: MarketKind,
    ) -> Result<Vec<Bar>, MareaError> {
        let symbol = symbol.to_string();
        let mut bars = self
            .execute_with_failover(market, DataType::Ohlcv, "get_historical", move |provider| {
                let symbol = symbol.clone();
                async move {
                    let feed = provider
                        .as_history_feed()
                        .ok_or_else(|| MareaError::unsupported("history"))?;
                    feed.history(&symbol, start, end, timeframe).await
                }
            })
            .await?;

        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by(|a, b| {
            a.symbol == b.symbol && a.timeframe == b.timeframe && a.timestamp == b.timestamp
        });
        Ok(bars)
    }

    /// Aggregate status across health, rate limits, budgets, and groups.
    #[must_use]
    pub fn status(&self) -> OrchestratorStatus {
        let mut providers = HashMap::new();
        for connector in &self.connectors {
            let name = connector.name().to_string();
            let config = connector.config();
            providers.insert(
                name.clone(),
                ProviderReport {
                    health: self.health.health(&name),
                    rate_limit: self.rate_limiter.stats(&name),
                    budget: self.budget.stats(&name),
                    priority: config.priority,
                    markets: config.supported_markets.clone(),
                    data_types: config.supported_data_types.clone(),
                },
            );
        }
        let groups = self
            .groups
            .iter()
            .map(|((market, data_type), members)| {
                (
                    format!("{market}/{data_type}"),
                    members.iter().map(|c| c.name().to_string()).collect(),
                )
            })
            .collect();
        OrchestratorStatus { providers, groups }
    }
}

fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}
