use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::market::DataType;

/// Which budget window was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    /// The calendar-day cap.
    Daily,
    /// The calendar-month cap.
    Monthly,
}

impl BudgetScope {
    /// Stable lowercase label for logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the marea workspace.
///
/// Wraps capability mismatches, argument validation errors, the provider
/// failure taxonomy (auth, rate limit, budget, data availability, generic
/// provider faults), and the terminal aggregate raised when failover runs
/// out of candidates.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq)]
#[non_exhaustive]
pub enum MareaError {
    /// The requested capability is not implemented by the target adapter.
    #[error("unsupported capability: {capability}")]
    Unsupported {
        /// A capability string describing what was requested (e.g. "stream-quotes").
        capability: String,
    },

    /// Invalid input argument.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Issues with returned or expected data (missing fields, bad shapes, OHLC violations).
    #[error("data issue: {0}")]
    Data(String),

    /// Credentials were rejected; the provider must be removed from rotation
    /// until they are re-validated.
    #[error("authentication failed for {provider}")]
    Auth {
        /// Provider whose credentials were rejected.
        provider: String,
    },

    /// A rate limit was hit, either locally enforced or reported by the vendor.
    #[error("rate limit hit for {provider}")]
    RateLimited {
        /// Provider that is rate limited.
        provider: String,
        /// Vendor-reported retry-after, when available.
        retry_after: Option<Duration>,
    },

    /// A monetary cap would be crossed by the attempted request.
    #[error("budget exceeded for {provider}: {scope} limit ${limit}, spent ${spent}")]
    BudgetExceeded {
        /// Provider whose budget is exhausted.
        provider: String,
        /// Which cap was hit.
        scope: BudgetScope,
        /// The configured cap.
        limit: Decimal,
        /// Amount already spent in the window.
        spent: Decimal,
    },

    /// The provider cannot serve this (symbol, data type) pair; another
    /// provider may still succeed.
    #[error("{provider}: data not available for {symbol} ({data_type})")]
    NotAvailable {
        /// Provider that declined the request.
        provider: String,
        /// Symbol that was requested.
        symbol: String,
        /// Data type that was requested.
        data_type: DataType,
    },

    /// An individual provider call failed.
    #[error("[{provider}] {msg}")]
    Provider {
        /// Provider name that failed.
        provider: String,
        /// Human-readable error message.
        msg: String,
        /// Whether the failure is eligible for retry/backoff (network errors,
        /// 5xx, timeouts) as opposed to protocol/contract violations.
        recoverable: bool,
    },

    /// Every eligible provider was tried and failed for the named operation.
    #[error("all providers failed for {operation}")]
    AllProvidersFailed {
        /// Operation label for diagnostics.
        operation: String,
        /// The last underlying failure, when one was observed.
        last: Option<Box<MareaError>>,
    },

    /// A singleton sequence (e.g. the startup orchestrator) is already running.
    #[error("{what} is already running")]
    AlreadyRunning {
        /// Description of the busy sequence.
        what: String,
    },

    /// A resource could not be found in a store or cache.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing resource, e.g. "rate USD/GBP".
        what: String,
    },
}

impl MareaError {
    /// Helper: build an `Unsupported` error for a capability string.
    pub fn unsupported(cap: impl Into<String>) -> Self {
        Self::Unsupported {
            capability: cap.into(),
        }
    }

    /// Helper: build a recoverable `Provider` error.
    pub fn provider(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            msg: msg.into(),
            recoverable: true,
        }
    }

    /// Helper: build a non-recoverable `Provider` error.
    pub fn provider_fatal(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            msg: msg.into(),
            recoverable: false,
        }
    }

    /// Helper: build an `Auth` error.
    pub fn auth(provider: impl Into<String>) -> Self {
        Self::Auth {
            provider: provider.into(),
        }
    }

    /// Helper: build a `RateLimited` error without a vendor retry hint.
    pub fn rate_limited(provider: impl Into<String>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            retry_after: None,
        }
    }

    /// Helper: build a `NotAvailable` error.
    pub fn not_available(
        provider: impl Into<String>,
        symbol: impl Into<String>,
        data_type: DataType,
    ) -> Self {
        Self::NotAvailable {
            provider: provider.into(),
            symbol: symbol.into(),
            data_type,
        }
    }

    /// Helper: build a `NotFound` error for a description of the missing resource.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Whether the failover loop may retry after this error, possibly on
    /// another provider.
    ///
    /// Rate-limit and budget breaches are recoverable by switching providers
    /// or waiting for the window to roll over; `NotAvailable` is recoverable
    /// because another provider may carry the data. Auth failures and
    /// non-recoverable provider faults terminate the request path.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::BudgetExceeded { .. } | Self::NotAvailable { .. } => {
                true
            }
            Self::Provider { recoverable, .. } => *recoverable,
            _ => false,
        }
    }
}
