#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use marea::{Marea, MareaBuilder};
use marea_mock::MockConnector;
use marea_types::{Bar, DataType, MarketKind, Quote, Timeframe};

pub const QUOTE_ONLY: &[DataType] = &[DataType::Quote];
pub const QUOTE_AND_OHLCV: &[DataType] = &[DataType::Quote, DataType::Ohlcv];
pub const US: &[MarketKind] = &[MarketKind::UsStock];

pub fn quote(symbol: &str, provider: &str, cents: i64) -> Quote {
    Quote::new(
        symbol,
        MarketKind::UsStock,
        Decimal::new(cents, 2),
        provider,
        Utc::now(),
    )
}

pub fn daily_bar(symbol: &str, date: NaiveDate, provider: &str) -> Bar {
    Bar::new(
        symbol,
        Timeframe::D1,
        date.and_hms_opt(0, 0, 0).expect("valid time").and_utc(),
        Decimal::new(1_000, 2),
        Decimal::new(1_200, 2),
        Decimal::new(900, 2),
        Decimal::new(1_100, 2),
        1_000,
        provider,
    )
}

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .expect("valid instant")
}

/// Orchestrator over the given connectors with fast retry backoff so
/// failover tests stay quick under a paused clock.
pub fn orchestrator(connectors: Vec<Arc<MockConnector>>) -> Arc<Marea> {
    let mut builder = MareaBuilder::new();
    for connector in connectors {
        builder = builder.with_connector(connector);
    }
    Arc::new(builder.build().expect("valid orchestrator"))
}

/// Quote-capable US-stock connector with the given name and priority.
pub fn us_quote_connector(name: &str, priority: u32) -> MockConnector {
    MockConnector::new(name, US, QUOTE_ONLY).priority(priority)
}
