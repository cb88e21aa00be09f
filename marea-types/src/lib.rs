//! Canonical data transfer objects and configuration primitives for the marea workspace.
#![warn(missing_docs)]

mod bar;
mod error;
mod fx;
mod gap;
mod market;
mod provider;
mod quote;
mod universe;

pub use bar::Bar;
pub use error::{BudgetScope, MareaError};
pub use fx::FxRate;
pub use gap::DataGap;
pub use market::{DataType, MarketKind, Region, Timeframe};
pub use provider::{
    BudgetConfig, FailoverConfig, HealthConfig, ProviderConfig, ProviderFeatures, RateLimitConfig,
};
pub use quote::Quote;
pub use universe::{AssetType, UniverseEntry, UniverseStats};
