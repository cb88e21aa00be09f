//! Trading-day-aware gap detection over stored bar series.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use tracing::debug;

use marea_core::calendar::{MarketClock, TradingCalendar};
use marea_types::{Bar, DataGap, MarketKind, Timeframe};

/// Summary of a gap-detection pass, suitable for job logs.
#[derive(Debug, Clone, Serialize)]
pub struct GapSummary {
    /// Number of gaps found.
    pub total_gaps: usize,
    /// Missing bars across all gaps.
    pub total_missing_bars: u64,
    /// Symbols with at least one gap.
    pub affected_symbols: Vec<String>,
    /// Compact date ranges suitable for backfill requests.
    pub date_ranges: Vec<(NaiveDate, NaiveDate)>,
}

/// Detects missing-bar ranges in historical series, accounting for trading
/// calendars: weekends and holidays never contribute expected bars.
#[derive(Debug, Clone, Default)]
pub struct GapDetector {
    clock: MarketClock,
}

impl GapDetector {
    /// Detector with the default per-market calendars.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector with custom market clocks/calendars.
    #[must_use]
    pub const fn with_clock(clock: MarketClock) -> Self {
        Self { clock }
    }

    /// Detect gaps in a bar series expected to cover `[start, end]`.
    ///
    /// Emits a leading gap when the first bar is later than `start`, one gap
    /// per hole between consecutive bars, and a trailing gap when the last
    /// bar is earlier than `end`. An empty input yields a single gap
    /// covering the full trading-day span.
    #[must_use]
    pub fn detect_gaps(
        &self,
        bars: &[Bar],
        start: NaiveDate,
        end: NaiveDate,
        market: MarketKind,
    ) -> Vec<DataGap> {
        let calendar = self.clock.calendar(market);

        if bars.is_empty() {
            let expected = self.expected_bars(start, end, Timeframe::D1, market, &calendar);
            return vec![DataGap {
                symbol: "UNKNOWN".to_string(),
                timeframe: Timeframe::D1,
                start: day_start(start),
                end: day_end(end),
                expected_bars: expected,
                actual_bars: 0,
            }];
        }

        let mut sorted: Vec<&Bar> = bars.iter().collect();
        sorted.sort_by_key(|b| b.timestamp);
        let symbol = sorted[0].symbol.clone();
        let timeframe = sorted[0].timeframe;
        let bar_span = bar_duration(timeframe);

        let mut gaps: Vec<DataGap> = Vec::new();

        // Leading hole before the first stored bar.
        let first = sorted[0];
        if first.timestamp.date_naive() > start {
            let expected = self.expected_bars(
                start,
                first.timestamp.date_naive() - ChronoDuration::days(1),
                timeframe,
                market,
                &calendar,
            );
            if expected > 0 {
                gaps.push(DataGap {
                    symbol: symbol.clone(),
                    timeframe,
                    start: day_start(start),
                    end: first.timestamp - bar_span,
                    expected_bars: expected,
                    actual_bars: 0,
                });
            }
        }

        // Holes between consecutive bars.
        for pair in sorted.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            let expected_next = next_expected(current.timestamp, timeframe, &calendar);
            if next.timestamp > expected_next {
                let gap_start = expected_next;
                let gap_end = next.timestamp - bar_span;
                let expected = self.expected_bars(
                    gap_start.date_naive(),
                    gap_end.date_naive(),
                    timeframe,
                    market,
                    &calendar,
                );
                if expected > 0 {
                    gaps.push(DataGap {
                        symbol: symbol.clone(),
                        timeframe,
                        start: gap_start,
                        end: gap_end,
                        expected_bars: expected,
                        actual_bars: 0,
                    });
                }
            }
        }

        // Trailing hole after the last stored bar.
        let last = sorted[sorted.len() - 1];
        if last.timestamp.date_naive() < end {
            let expected = self.expected_bars(
                last.timestamp.date_naive() + ChronoDuration::days(1),
                end,
                timeframe,
                market,
                &calendar,
            );
            if expected > 0 {
                gaps.push(DataGap {
                    symbol,
                    timeframe,
                    start: last.timestamp + bar_span,
                    end: day_end(end),
                    expected_bars: expected,
                    actual_bars: 0,
                });
            }
        }

        debug!(gaps = gaps.len(), "gap detection pass complete");
        gaps
    }

    /// Expected bar count over `[start, end]` inclusive.
    ///
    /// Daily cadence counts trading days; weekly and monthly divide the
    /// span; intraday cadences estimate trading minutes per day times
    /// trading days over the bar length.
    #[must_use]
    pub fn count_expected_bars(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        timeframe: Timeframe,
        market: MarketKind,
    ) -> u32 {
        let calendar = self.clock.calendar(market);
        self.expected_bars(start, end, timeframe, market, &calendar)
    }

    fn expected_bars(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        timeframe: Timeframe,
        market: MarketKind,
        calendar: &TradingCalendar,
    ) -> u32 {
        if start > end {
            return 0;
        }
        match timeframe {
            Timeframe::D1 => calendar.trading_days_between(start, end),
            Timeframe::W1 => {
                let days = (end - start).num_days();
                (days / 7).max(1) as u32
            }
            Timeframe::Mo1 => {
                use chrono::Datelike;
                let months = i64::from(end.year() - start.year()) * 12
                    + (i64::from(end.month()) - i64::from(start.month()));
                months.max(1) as u32
            }
            intraday => {
                let minutes_per_day = self
                    .clock
                    .hours(market)
                    .map_or(390, marea_core::calendar::MarketHours::trading_minutes_per_day);
                let trading_days = calendar.trading_days_between(start, end);
                trading_days * (minutes_per_day / intraday.minutes().max(1))
            }
        }
    }

    /// Collapse overlapping or adjacent gaps into compact date ranges for a
    /// backfill request.
    #[must_use]
    pub fn merged_ranges(gaps: &[DataGap]) -> Vec<(NaiveDate, NaiveDate)> {
        if gaps.is_empty() {
            return Vec::new();
        }
        let mut sorted: Vec<&DataGap> = gaps.iter().collect();
        sorted.sort_by_key(|g| g.start);

        let mut merged = Vec::new();
        let mut current_start = sorted[0].start.date_naive();
        let mut current_end = sorted[0].end.date_naive();

        for gap in &sorted[1..] {
            let gap_start = gap.start.date_naive();
            let gap_end = gap.end.date_naive();
            if gap_start <= current_end + ChronoDuration::days(1) {
                current_end = current_end.max(gap_end);
            } else {
                merged.push((current_start, current_end));
                current_start = gap_start;
                current_end = gap_end;
            }
        }
        merged.push((current_start, current_end));
        merged
    }

    /// Summarize a set of gaps for reporting.
    #[must_use]
    pub fn summarize(gaps: &[DataGap]) -> GapSummary {
        let mut symbols: Vec<String> = gaps.iter().map(|g| g.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        GapSummary {
            total_gaps: gaps.len(),
            total_missing_bars: gaps.iter().map(|g| u64::from(g.missing_bars())).sum(),
            affected_symbols: symbols,
            date_ranges: Self::merged_ranges(gaps),
        }
    }
}

/// Next instant at which a bar is expected after `current`.
///
/// Daily-and-coarser cadences advance past closed weekdays and holidays.
fn next_expected(
    current: DateTime<Utc>,
    timeframe: Timeframe,
    calendar: &TradingCalendar,
) -> DateTime<Utc> {
    let mut next = current + bar_duration(timeframe);
    if timeframe.is_daily_or_coarser() {
        while !calendar.is_trading_day(next.date_naive()) {
            next += ChronoDuration::days(1);
        }
    }
    next
}

fn bar_duration(timeframe: Timeframe) -> ChronoDuration {
    ChronoDuration::from_std(timeframe.duration()).unwrap_or_else(|_| ChronoDuration::days(1))
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map_or_else(Utc::now, |dt| dt.and_utc())
}

fn day_end(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(23, 59, 59)
        .map_or_else(Utc::now, |dt| dt.and_utc())
}
