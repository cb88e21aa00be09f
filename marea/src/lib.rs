//! marea
//!
//! High-level, pluggable market data orchestration for Rust.
//!
//! The [`Marea`] orchestrator routes each request to the best registered
//! provider for its (market, data type) pair, gated by per-provider rate
//! limits, monetary budgets, and a circuit-breaking health monitor, with
//! retry and transparent failover. Around it live the background services a
//! data platform needs: trading-day-aware gap detection, a market-phase
//! scheduler with a priority-ordered startup sequence, periodic universe
//! quote/EOD collection, and an FX cross-rate maintainer.
#![warn(missing_docs)]

mod cache;
mod core;
mod failover;
/// Gap detection over stored bar series.
pub mod gaps;
/// Background collection jobs (universe quotes/EOD, FX rates).
pub mod jobs;
/// The job scheduler and the startup orchestrator.
pub mod scheduler;

pub use cache::MemoryCache;
pub use core::{Marea, MareaBuilder};
pub use failover::{OrchestratorStatus, ProviderReport};
pub use gaps::GapDetector;
pub use jobs::fx::FxRateMaintainer;
pub use jobs::universe::{UniverseCollector, UniverseCollectorConfig};
pub use marea_core::{MareaConnector, MareaError, RateSource, SharedCache};
pub use marea_types::{
    Bar, DataType, FailoverConfig, MarketKind, ProviderConfig, Quote, Timeframe,
};
pub use scheduler::startup::{StartupOrchestrator, StartupReport, TaskPriority};
pub use scheduler::{JobTrigger, Scheduler, SchedulerConfig};
