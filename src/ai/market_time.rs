use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::Tz;

/// US federal market holidays for one year: fixed dates (weekend-observed)
/// plus the floating Monday/Thursday holidays.
pub fn market_holidays(year: i32) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    for (month, day) in [(1, 1), (6, 19), (7, 4), (12, 25)] {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            days.push(observed(date));
        }
    }
    days.push(nth_weekday(year, 1, Weekday::Mon, 3)); // MLK Jr Day
    days.push(nth_weekday(year, 2, Weekday::Mon, 3)); // Presidents Day
    days.push(last_weekday(year, 5, Weekday::Mon)); // Memorial Day
    days.push(nth_weekday(year, 9, Weekday::Mon, 1)); // Labor Day
    days.push(nth_weekday(year, 11, Weekday::Thu, 4)); // Thanksgiving
    days
}

/// Saturday holidays are observed the Friday before, Sunday holidays the
/// Monday after.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date.pred_opt().unwrap_or(date),
        Weekday::Sun => date.succ_opt().unwrap_or(date),
        _ => date,
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let mut date = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    while date.weekday() != weekday {
        date = date.succ_opt().expect("in-range date");
    }
    date + chrono::Duration::weeks((n - 1) as i64)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid month start");
    let mut date = first_of_next.pred_opt().expect("in-range date");
    while date.weekday() != weekday {
        date = date.pred_opt().expect("in-range date");
    }
    date
}

/// Whether US equity markets are closed for this calendar day (weekend or
/// holiday). Intraday hours are ignored here; the digest badge should read
/// "Market Day" even when it is produced before the open.
pub fn is_market_closed_day(date: NaiveDate) -> bool {
    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        return true;
    }
    // Observed shifts can cross a year boundary (Jan 1 on a Saturday).
    let year = date.year();
    market_holidays(year - 1)
        .into_iter()
        .chain(market_holidays(year))
        .chain(market_holidays(year + 1))
        .any(|h| h == date)
}

/// Three-valued hint for the prompt context: "closed" on weekends/holidays,
/// "open" during 09:30-16:00 US/Eastern on a trading day, "quiet" otherwise.
pub fn market_status_hint(now: DateTime<Utc>, tz: Tz) -> &'static str {
    let local_date = now.with_timezone(&tz).date_naive();
    if is_market_closed_day(local_date) {
        return "closed";
    }
    let eastern = now.with_timezone(&chrono_tz::America::New_York);
    let minutes = eastern.time().hour() as u32 * 60 + eastern.time().minute();
    if (570..960).contains(&minutes) {
        "open"
    } else {
        "quiet"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn fixed_holidays_shift_when_on_weekends() {
        // July 4, 2026 is a Saturday: observed Friday July 3.
        assert!(market_holidays(2026).contains(&date(2026, 7, 3)));
        assert!(!market_holidays(2026).contains(&date(2026, 7, 4)));
        // Christmas 2026 falls on a Friday: no shift.
        assert!(market_holidays(2026).contains(&date(2026, 12, 25)));
    }

    #[test]
    fn floating_holidays_land_on_expected_dates() {
        // 2026: MLK Jan 19, Presidents Feb 16, Memorial May 25,
        // Labor Sep 7, Thanksgiving Nov 26.
        let holidays = market_holidays(2026);
        assert!(holidays.contains(&date(2026, 1, 19)));
        assert!(holidays.contains(&date(2026, 2, 16)));
        assert!(holidays.contains(&date(2026, 5, 25)));
        assert!(holidays.contains(&date(2026, 9, 7)));
        assert!(holidays.contains(&date(2026, 11, 26)));
    }

    #[test]
    fn weekends_and_holidays_read_closed() {
        assert!(is_market_closed_day(date(2026, 8, 1))); // Saturday
        assert!(is_market_closed_day(date(2026, 11, 26))); // Thanksgiving
        assert!(!is_market_closed_day(date(2026, 8, 3))); // ordinary Monday
    }

    #[test]
    fn status_hint_tracks_eastern_trading_hours() {
        let tz = chrono_tz::America::New_York;
        // Monday 2026-08-03 14:00 UTC = 10:00 ET: open.
        let open = Utc.with_ymd_and_hms(2026, 8, 3, 14, 0, 0).unwrap();
        assert_eq!(market_status_hint(open, tz), "open");
        // Monday 2026-08-03 22:00 UTC = 18:00 ET: quiet.
        let quiet = Utc.with_ymd_and_hms(2026, 8, 3, 22, 0, 0).unwrap();
        assert_eq!(market_status_hint(quiet, tz), "quiet");
        // Saturday: closed.
        let weekend = Utc.with_ymd_and_hms(2026, 8, 1, 14, 0, 0).unwrap();
        assert_eq!(market_status_hint(weekend, tz), "closed");
    }
}
