mod helpers;

use marea::GapDetector;
use marea_types::{Bar, MarketKind, Timeframe};
use proptest::prelude::*;

use helpers::{daily_bar, ymd};

#[test]
fn weekday_hole_is_reported_with_trading_day_counts() {
    // Mon 2026-03-02, Tue 03-03, Fri 03-06 over a Mon-Fri range: the hole
    // spans Wed-Thu with two expected bars.
    let bars = vec![
        daily_bar("AAPL", ymd(2026, 3, 2), "t"),
        daily_bar("AAPL", ymd(2026, 3, 3), "t"),
        daily_bar("AAPL", ymd(2026, 3, 6), "t"),
    ];
    let detector = GapDetector::new();
    let gaps = detector.detect_gaps(&bars, ymd(2026, 3, 2), ymd(2026, 3, 6), MarketKind::UsStock);

    assert_eq!(gaps.len(), 1);
    let gap = &gaps[0];
    assert_eq!(gap.symbol, "AAPL");
    assert_eq!(gap.start.date_naive(), ymd(2026, 3, 4));
    assert_eq!(gap.end.date_naive(), ymd(2026, 3, 5));
    assert_eq!(gap.expected_bars, 2);
    assert_eq!(gap.actual_bars, 0);
    assert_eq!(gap.missing_bars(), 2);
}

#[test]
fn weekends_never_contribute_expected_bars() {
    // Fri 2026-03-06 and Mon 03-09 are consecutive trading days; the
    // weekend between them is not a gap.
    let bars = vec![
        daily_bar("AAPL", ymd(2026, 3, 6), "t"),
        daily_bar("AAPL", ymd(2026, 3, 9), "t"),
    ];
    let detector = GapDetector::new();
    let gaps = detector.detect_gaps(&bars, ymd(2026, 3, 6), ymd(2026, 3, 9), MarketKind::UsStock);
    assert!(gaps.is_empty(), "gaps: {gaps:?}");
}

#[test]
fn holidays_are_treated_like_weekends() {
    // 2026-07-03 is the observed Independence Day holiday (Friday).
    let bars = vec![
        daily_bar("AAPL", ymd(2026, 6, 29), "t"),
        daily_bar("AAPL", ymd(2026, 6, 30), "t"),
        daily_bar("AAPL", ymd(2026, 7, 1), "t"),
        daily_bar("AAPL", ymd(2026, 7, 2), "t"),
    ];
    let detector = GapDetector::new();
    let gaps = detector.detect_gaps(&bars, ymd(2026, 6, 29), ymd(2026, 7, 3), MarketKind::UsStock);
    assert!(gaps.is_empty(), "gaps: {gaps:?}");
}

#[test]
fn empty_series_is_one_gap_covering_the_trading_span() {
    let detector = GapDetector::new();
    let gaps = detector.detect_gaps(&[], ymd(2026, 3, 2), ymd(2026, 3, 8), MarketKind::UsStock);

    assert_eq!(gaps.len(), 1);
    let gap = &gaps[0];
    // Mon-Fri are trading days; Sat/Sun in the range add nothing.
    assert_eq!(gap.expected_bars, 5);
    assert_eq!(gap.actual_bars, 0);
    assert_eq!(gap.start.date_naive(), ymd(2026, 3, 2));
    assert_eq!(gap.end.date_naive(), ymd(2026, 3, 8));
}

#[test]
fn leading_and_trailing_holes_are_detected() {
    let bars = vec![
        daily_bar("AAPL", ymd(2026, 3, 3), "t"),
        daily_bar("AAPL", ymd(2026, 3, 4), "t"),
    ];
    let detector = GapDetector::new();
    let gaps = detector.detect_gaps(&bars, ymd(2026, 3, 2), ymd(2026, 3, 6), MarketKind::UsStock);

    assert_eq!(gaps.len(), 2);
    assert_eq!(gaps[0].start.date_naive(), ymd(2026, 3, 2));
    assert_eq!(gaps[0].expected_bars, 1);
    assert_eq!(gaps[1].end.date_naive(), ymd(2026, 3, 6));
    assert_eq!(gaps[1].expected_bars, 2);
}

#[test]
fn complete_series_roundtrips_without_gaps() {
    // Every trading day of two full weeks.
    let dates = [
        ymd(2026, 3, 2),
        ymd(2026, 3, 3),
        ymd(2026, 3, 4),
        ymd(2026, 3, 5),
        ymd(2026, 3, 6),
        ymd(2026, 3, 9),
        ymd(2026, 3, 10),
        ymd(2026, 3, 11),
        ymd(2026, 3, 12),
        ymd(2026, 3, 13),
    ];
    let bars: Vec<Bar> = dates.iter().map(|&d| daily_bar("MSFT", d, "t")).collect();
    let detector = GapDetector::new();
    let gaps = detector.detect_gaps(&bars, ymd(2026, 3, 2), ymd(2026, 3, 13), MarketKind::UsStock);
    assert!(gaps.is_empty(), "gaps: {gaps:?}");
}

#[test]
fn intraday_expected_counts_use_session_minutes() {
    let detector = GapDetector::new();
    // One US trading day has 390 session minutes: 13 thirty-minute bars.
    let count = detector.count_expected_bars(
        ymd(2026, 3, 3),
        ymd(2026, 3, 3),
        Timeframe::M30,
        MarketKind::UsStock,
    );
    assert_eq!(count, 13);
}

#[test]
fn crypto_counts_every_calendar_day() {
    let detector = GapDetector::new();
    let count = detector.count_expected_bars(
        ymd(2026, 3, 2),
        ymd(2026, 3, 8),
        Timeframe::D1,
        MarketKind::Crypto,
    );
    assert_eq!(count, 7);
}

#[test]
fn adjacent_gaps_merge_into_one_backfill_range() {
    let bars = vec![
        daily_bar("AAPL", ymd(2026, 3, 2), "t"),
        daily_bar("AAPL", ymd(2026, 3, 11), "t"),
    ];
    let detector = GapDetector::new();
    let gaps = detector.detect_gaps(&bars, ymd(2026, 3, 2), ymd(2026, 3, 13), MarketKind::UsStock);
    // One interior hole plus one trailing hole.
    assert_eq!(gaps.len(), 2);

    let ranges = GapDetector::merged_ranges(&gaps);
    assert_eq!(ranges.len(), 2);

    let summary = GapDetector::summarize(&gaps);
    assert_eq!(summary.total_gaps, 2);
    assert_eq!(summary.affected_symbols, vec!["AAPL".to_string()]);
    assert!(summary.total_missing_bars >= 6);
}

proptest! {
    /// On a 24/7 calendar, removing interior days from a continuous daily
    /// series yields gaps whose expected bars sum to exactly the number of
    /// removed days.
    #[test]
    fn crypto_gap_counts_match_removed_days(removed in proptest::collection::hash_set(1usize..29, 0..10)) {
        let start = ymd(2026, 3, 1);
        let end = ymd(2026, 3, 31);
        let bars: Vec<Bar> = (0i64..31)
            .filter(|i| !removed.contains(&(*i as usize)))
            .map(|i| daily_bar("BTC-USD", start + chrono::Duration::days(i), "t"))
            .collect();

        let detector = GapDetector::new();
        let gaps = detector.detect_gaps(&bars, start, end, MarketKind::Crypto);
        let expected_total: u32 = gaps.iter().map(|g| g.expected_bars).sum();
        prop_assert_eq!(expected_total as usize, removed.len());
    }
}
