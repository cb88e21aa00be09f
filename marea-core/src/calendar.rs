//! Data-driven trading calendars and per-market clocks.
//!
//! Calendars are plain data: a set of closed weekdays plus dated holidays.
//! The US equity calendar ships the published NYSE holidays for the current
//! and next calendar year; crypto and forex trade around the clock.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

use marea_types::MarketKind;

/// Weekly closed days plus dated holidays for one market.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    closed_weekdays: HashSet<Weekday>,
    holidays: HashSet<NaiveDate>,
}

impl TradingCalendar {
    /// Calendar closed on the given weekdays and holiday dates.
    #[must_use]
    pub fn new(closed_weekdays: &[Weekday], holidays: &[NaiveDate]) -> Self {
        Self {
            closed_weekdays: closed_weekdays.iter().copied().collect(),
            holidays: holidays.iter().copied().collect(),
        }
    }

    /// Weekend-closed calendar with no holidays.
    #[must_use]
    pub fn weekends_closed() -> Self {
        Self::new(&[Weekday::Sat, Weekday::Sun], &[])
    }

    /// Always-open calendar (crypto, and a close-enough model for forex).
    #[must_use]
    pub fn always_open() -> Self {
        Self::new(&[], &[])
    }

    /// US equity calendar with the published NYSE holidays for 2026 and 2027.
    #[must_use]
    pub fn us_equity() -> Self {
        const NYSE_HOLIDAYS: &[(i32, u32, u32)] = &[
            // 2026
            (2026, 1, 1),
            (2026, 1, 19),
            (2026, 2, 16),
            (2026, 4, 3),
            (2026, 5, 25),
            (2026, 6, 19),
            (2026, 7, 3),
            (2026, 9, 7),
            (2026, 11, 26),
            (2026, 12, 25),
            // 2027
            (2027, 1, 1),
            (2027, 1, 18),
            (2027, 2, 15),
            (2027, 3, 26),
            (2027, 5, 31),
            (2027, 6, 18),
            (2027, 7, 5),
            (2027, 9, 6),
            (2027, 11, 25),
            (2027, 12, 24),
        ];
        let holidays: Vec<NaiveDate> = NYSE_HOLIDAYS
            .iter()
            .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
            .collect();
        Self::new(&[Weekday::Sat, Weekday::Sun], &holidays)
    }

    /// Register an extra holiday.
    pub fn add_holiday(&mut self, date: NaiveDate) {
        self.holidays.insert(date);
    }

    /// Whether `date` is a trading day (not a closed weekday, not a holiday).
    #[must_use]
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !self.closed_weekdays.contains(&date.weekday()) && !self.holidays.contains(&date)
    }

    /// Next trading day strictly after `date`.
    #[must_use]
    pub fn next_trading_day(&self, mut date: NaiveDate) -> NaiveDate {
        loop {
            date = date.succ_opt().unwrap_or(date);
            if self.is_trading_day(date) {
                return date;
            }
        }
    }

    /// Count trading days in `[start, end]` inclusive.
    #[must_use]
    pub fn trading_days_between(&self, start: NaiveDate, end: NaiveDate) -> u32 {
        if start > end {
            return 0;
        }
        let mut count = 0;
        let mut current = start;
        while current <= end {
            if self.is_trading_day(current) {
                count += 1;
            }
            match current.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }
        count
    }
}

/// Session hours for one market, in its local timezone.
#[derive(Debug, Clone)]
pub struct MarketHours {
    /// Local session open.
    pub open: NaiveTime,
    /// Local session close.
    pub close: NaiveTime,
    /// Market timezone.
    pub tz: Tz,
    /// Trading calendar for the market.
    pub calendar: TradingCalendar,
    /// Markets with no session boundaries (crypto).
    pub always_open: bool,
}

impl MarketHours {
    fn session(
        open: (u32, u32),
        close: (u32, u32),
        tz: Tz,
        calendar: TradingCalendar,
    ) -> Option<Self> {
        Some(Self {
            open: NaiveTime::from_hms_opt(open.0, open.1, 0)?,
            close: NaiveTime::from_hms_opt(close.0, close.1, 0)?,
            tz,
            calendar,
            always_open: false,
        })
    }

    fn around_the_clock() -> Self {
        Self {
            open: NaiveTime::MIN,
            close: NaiveTime::MIN,
            tz: chrono_tz::UTC,
            calendar: TradingCalendar::always_open(),
            always_open: true,
        }
    }

    /// Whether the market session is open at `now`.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        if self.always_open {
            return true;
        }
        let local = now.with_timezone(&self.tz);
        let date = local.date_naive();
        if !self.calendar.is_trading_day(date) {
            return false;
        }
        let time = local.time();
        time >= self.open && time < self.close
    }

    /// Length of the regular session in minutes.
    #[must_use]
    pub fn trading_minutes_per_day(&self) -> u32 {
        if self.always_open {
            return 24 * 60;
        }
        (self.close - self.open).num_minutes().max(0) as u32
    }
}

/// Per-market clock used by the scheduler, gap detector, and collectors.
#[derive(Debug, Clone)]
pub struct MarketClock {
    hours: HashMap<MarketKind, MarketHours>,
}

impl Default for MarketClock {
    fn default() -> Self {
        let mut hours = HashMap::new();
        let us = MarketHours::session(
            (9, 30),
            (16, 0),
            chrono_tz::America::New_York,
            TradingCalendar::us_equity(),
        );
        let eu = MarketHours::session(
            (8, 0),
            (16, 30),
            chrono_tz::Europe::London,
            TradingCalendar::weekends_closed(),
        );
        let asia = MarketHours::session(
            (9, 0),
            (15, 0),
            chrono_tz::Asia::Tokyo,
            TradingCalendar::weekends_closed(),
        );
        if let (Some(us), Some(eu), Some(asia)) = (us, eu, asia) {
            hours.insert(MarketKind::UsStock, us.clone());
            hours.insert(MarketKind::Etf, us.clone());
            hours.insert(MarketKind::Index, us.clone());
            hours.insert(MarketKind::UsOption, us.clone());
            hours.insert(MarketKind::Commodity, us);
            hours.insert(MarketKind::EuStock, eu);
            hours.insert(MarketKind::AsiaStock, asia);
        }
        hours.insert(MarketKind::Crypto, MarketHours::around_the_clock());
        hours.insert(MarketKind::Forex, MarketHours::around_the_clock());
        Self { hours }
    }
}

impl MarketClock {
    /// Override the hours for one market.
    pub fn set_hours(&mut self, market: MarketKind, hours: MarketHours) {
        self.hours.insert(market, hours);
    }

    /// Hours for one market, when configured.
    #[must_use]
    pub fn hours(&self, market: MarketKind) -> Option<&MarketHours> {
        self.hours.get(&market)
    }

    /// Trading calendar for one market; unknown markets fall back to a
    /// weekend-closed calendar.
    #[must_use]
    pub fn calendar(&self, market: MarketKind) -> TradingCalendar {
        self.hours.get(&market).map_or_else(
            TradingCalendar::weekends_closed,
            |h| h.calendar.clone(),
        )
    }

    /// Whether one market is open at `now`.
    #[must_use]
    pub fn is_open(&self, market: MarketKind, now: DateTime<Utc>) -> bool {
        self.hours.get(&market).is_some_and(|h| h.is_open_at(now))
    }

    /// Whether any configured market is open at `now`.
    #[must_use]
    pub fn any_open(&self, now: DateTime<Utc>) -> bool {
        self.hours.values().any(|h| h.is_open_at(now))
    }

    /// Whether any session-bound (non 24/7) market is open at `now`.
    ///
    /// The startup orchestrator's "skip when all markets closed" check uses
    /// this; crypto being always open would defeat it otherwise.
    #[must_use]
    pub fn any_session_market_open(&self, now: DateTime<Utc>) -> bool {
        self.hours
            .values()
            .any(|h| !h.always_open && h.is_open_at(now))
    }
}
