use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use marea::FxRateMaintainer;
use marea_core::FxStore;
use marea_mock::{MemoryFxStore, StaticRateSource};
use marea_types::MareaError;
use rust_decimal::Decimal;

fn ecb_table() -> HashMap<String, Decimal> {
    let mut rates = HashMap::new();
    rates.insert("USD".to_string(), Decimal::new(105, 2));
    rates.insert("GBP".to_string(), Decimal::new(83, 2));
    rates.insert("CHF".to_string(), Decimal::new(93, 2));
    rates.insert("HKD".to_string(), Decimal::new(812, 2));
    rates.insert("JPY".to_string(), Decimal::new(16_350, 2));
    rates
}

fn maintainer() -> (FxRateMaintainer, Arc<MemoryFxStore>, Arc<StaticRateSource>) {
    let source = Arc::new(StaticRateSource::new(ecb_table()));
    let store = Arc::new(MemoryFxStore::new());
    (
        FxRateMaintainer::new(source.clone(), store.clone()),
        store,
        source,
    )
}

#[tokio::test]
async fn one_fetch_produces_the_full_cross_matrix() {
    let (fx, store, source) = maintainer();

    let written = fx.update_all_rates().await.expect("cycle succeeds");
    // 6 currencies -> 36 pairs including identities.
    assert_eq!(written, 36);
    assert_eq!(source.fetch_count(), 1);

    let usd_gbp = store
        .rate("USD", "GBP")
        .await
        .expect("store read")
        .expect("pair stored");
    assert_eq!(usd_gbp.rate, "0.79047619".parse::<Decimal>().expect("decimal"));
    assert_eq!(usd_gbp.source, "static");

    let identity = store
        .rate("JPY", "JPY")
        .await
        .expect("store read")
        .expect("pair stored");
    assert_eq!(identity.rate, Decimal::ONE);
}

#[tokio::test]
async fn reciprocal_rates_multiply_to_one_within_rounding() {
    let (fx, store, _) = maintainer();
    fx.update_all_rates().await.expect("cycle succeeds");

    let eps: Decimal = "0.000001".parse().expect("decimal");
    let all = store.all_rates().await.expect("store read");
    for ((base, quote), rate) in &all {
        let reverse = all
            .get(&(quote.clone(), base.clone()))
            .expect("reverse pair stored");
        let product = rate.rate * reverse.rate;
        assert!(
            (product - Decimal::ONE).abs() <= eps,
            "{base}/{quote} product {product}"
        );
    }
}

#[tokio::test]
async fn convert_roundtrips_within_tolerance() {
    let (fx, _, _) = maintainer();
    fx.update_all_rates().await.expect("cycle succeeds");

    let amount = Decimal::new(1_234_56, 2);
    let there = fx.convert(amount, "USD", "JPY").await.expect("rate stored");
    let back = fx.convert(there, "JPY", "USD").await.expect("rate stored");

    let relative = ((back - amount) / amount).abs();
    let tolerance: Decimal = "0.0001".parse().expect("decimal");
    assert!(relative <= tolerance, "roundtrip drift {relative}");
}

#[tokio::test]
async fn same_currency_conversion_needs_no_store() {
    // A failing source and an empty store: the identity path must still work.
    let fx = FxRateMaintainer::new(
        Arc::new(StaticRateSource::failing()),
        Arc::new(MemoryFxStore::new()),
    );
    let amount = Decimal::new(4_200, 2);
    assert_eq!(
        fx.convert(amount, "USD", "USD").await.expect("identity"),
        amount
    );
    assert_eq!(fx.rate("EUR", "EUR").await.expect("identity"), Decimal::ONE);
}

#[tokio::test]
async fn missing_pair_is_a_not_found_error() {
    let (fx, _, _) = maintainer();
    let err = fx
        .convert(Decimal::ONE, "USD", "SEK")
        .await
        .expect_err("SEK is not maintained");
    assert!(matches!(err, MareaError::NotFound { .. }));
}

#[tokio::test]
async fn startup_refresh_runs_only_when_stale() {
    let (fx, _, source) = maintainer();

    // Empty store: the startup gate runs one cycle.
    let ran = fx
        .ensure_fresh(Duration::from_secs(3600))
        .await
        .expect("gate succeeds");
    assert!(ran);
    assert_eq!(source.fetch_count(), 1);

    // Fresh store: no second fetch.
    let ran = fx
        .ensure_fresh(Duration::from_secs(3600))
        .await
        .expect("gate succeeds");
    assert!(!ran);
    assert_eq!(source.fetch_count(), 1);
}

proptest::proptest! {
    /// For any pair of EUR-basis rates of comparable magnitude, the derived
    /// reciprocal cross rates multiply back to one within rounding.
    #[test]
    fn reciprocal_products_stay_near_one(
        base_milli in 1_000i64..10_000,
        quote_milli in 1_000i64..10_000,
    ) {
        use proptest::prelude::prop_assert;

        let mut rates = HashMap::new();
        rates.insert("AAA".to_string(), Decimal::new(base_milli, 3));
        rates.insert("BBB".to_string(), Decimal::new(quote_milli, 3));

        let ab = FxRateMaintainer::cross_rate(&rates, "AAA", "BBB").expect("both known");
        let ba = FxRateMaintainer::cross_rate(&rates, "BBB", "AAA").expect("both known");
        let product = ab * ba;
        let eps: Decimal = "0.000001".parse().expect("decimal");
        prop_assert!((product - Decimal::ONE).abs() <= eps, "product {}", product);
    }
}

#[tokio::test]
async fn source_failure_propagates_from_the_cycle() {
    let fx = FxRateMaintainer::new(
        Arc::new(StaticRateSource::failing()),
        Arc::new(MemoryFxStore::new()),
    );
    let err = fx.update_all_rates().await.expect_err("source offline");
    assert!(matches!(err, MareaError::Provider { .. }));
}
