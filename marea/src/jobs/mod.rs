//! Background collection jobs driven by the scheduler.
//!
//! The scheduler never imports these modules; embedders wire the job
//! methods in as injected callables at registration time.

/// FX cross-rate maintenance.
pub mod fx;
/// Universe quote refresh and EOD bar collection.
pub mod universe;
