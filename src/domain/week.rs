use crate::domain::models::{WORKWEEK_DAYS, WeekWindow};
use chrono::{DateTime, Datelike, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};

/// Workweek containing `anchor`, or the following one when `anchor` falls on a weekend.
pub fn resolve_workweek(anchor: DateTime<Utc>) -> WeekWindow {
    resolve_week(anchor, WORKWEEK_DAYS)
}

/// Window of `days` calendar days starting on the resolved Monday.
///
/// The window runs from Monday 00:00:00 UTC to the last day's 23:59:59 UTC,
/// end-inclusive. Saturday and Sunday anchors roll forward to the next Monday.
pub fn resolve_week(anchor: DateTime<Utc>, days: u8) -> WeekWindow {
    let date = anchor.date_naive();
    let weekday = i64::from(date.weekday().num_days_from_monday());
    let monday_date = if weekday >= 5 {
        date + Duration::days(7 - weekday)
    } else {
        date - Duration::days(weekday)
    };

    let start_utc = Utc.from_utc_datetime(&monday_date.and_time(chrono::NaiveTime::MIN));
    let end_utc = start_utc + Duration::days(i64::from(days.max(1))) - Duration::seconds(1);
    WeekWindow {
        start_utc,
        end_utc,
        monday_date,
    }
}

/// Human range label for the workweek starting on `monday_date`.
pub fn week_range_label(monday_date: NaiveDate) -> String {
    let friday = monday_date + Duration::days(i64::from(WORKWEEK_DAYS) - 1);
    format_range_label(monday_date, friday)
}

/// `11–15 Aug 2025`, `29 Aug – 02 Sep 2025`, `29 Dec 2025 – 02 Jan 2026`.
pub fn format_range_label(start: NaiveDate, end: NaiveDate) -> String {
    if start.year() != end.year() {
        return format!("{} – {}", start.format("%d %b %Y"), end.format("%d %b %Y"));
    }
    if start.month() != end.month() {
        return format!("{} – {}", start.format("%d %b"), end.format("%d %b %Y"));
    }
    format!("{}–{}", start.format("%d"), end.format("%d %b %Y"))
}

pub fn week_title(window: &WeekWindow) -> String {
    format!("Week of {}", week_range_label(window.monday_date))
}

/// UTC instant as the upstream API expects it, e.g. `2025-08-11T00:00:00Z`.
pub fn to_iso_z(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use proptest::prelude::*;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn wednesday_resolves_to_same_week() {
        let window = resolve_workweek(at("2025-08-13T15:30:00Z"));
        assert_eq!(window.monday_date, date(2025, 8, 11));
        assert_eq!(window.start_utc, at("2025-08-11T00:00:00Z"));
        assert_eq!(window.end_utc, at("2025-08-15T23:59:59Z"));
    }

    #[test]
    fn saturday_rolls_forward_to_next_week() {
        let window = resolve_workweek(at("2025-08-16T09:00:00Z"));
        assert_eq!(window.monday_date, date(2025, 8, 18));
        assert_eq!(window.end_utc, at("2025-08-22T23:59:59Z"));
    }

    #[test]
    fn sunday_last_second_rolls_forward() {
        let window = resolve_workweek(at("2025-08-17T23:59:59Z"));
        assert_eq!(window.monday_date, date(2025, 8, 18));
    }

    #[test]
    fn monday_midnight_starts_at_anchor() {
        let anchor = at("2025-08-11T00:00:00Z");
        let window = resolve_workweek(anchor);
        assert_eq!(window.start_utc, anchor);
    }

    #[test]
    fn friday_last_second_stays_in_week() {
        let window = resolve_workweek(at("2025-08-15T23:59:59Z"));
        assert_eq!(window.monday_date, date(2025, 8, 11));
    }

    #[test]
    fn range_label_same_month() {
        assert_eq!(format_range_label(date(2025, 8, 11), date(2025, 8, 15)), "11–15 Aug 2025");
    }

    #[test]
    fn range_label_crosses_month() {
        assert_eq!(
            format_range_label(date(2025, 8, 29), date(2025, 9, 2)),
            "29 Aug – 02 Sep 2025"
        );
    }

    #[test]
    fn range_label_crosses_year() {
        assert_eq!(
            format_range_label(date(2025, 12, 29), date(2026, 1, 2)),
            "29 Dec 2025 – 02 Jan 2026"
        );
        assert_eq!(week_range_label(date(2025, 12, 29)), "29 Dec 2025 – 02 Jan 2026");
    }

    #[test]
    fn title_and_iso_formatting() {
        let window = resolve_workweek(at("2025-08-12T08:00:00Z"));
        assert_eq!(week_title(&window), "Week of 11–15 Aug 2025");
        assert_eq!(to_iso_z(window.start_utc), "2025-08-11T00:00:00Z");
        assert_eq!(to_iso_z(window.end_utc), "2025-08-15T23:59:59Z");
    }

    proptest! {
        #[test]
        fn resolved_window_is_monday_based_and_five_days(seconds in 0i64..4_000_000_000i64) {
            let anchor = DateTime::from_timestamp(seconds, 0).expect("valid timestamp");
            let window = resolve_workweek(anchor);
            prop_assert_eq!(window.monday_date.weekday(), Weekday::Mon);
            prop_assert_eq!(window.end_utc - window.start_utc, Duration::days(5) - Duration::seconds(1));
            prop_assert!(window.validate().is_ok());
            if anchor.weekday().num_days_from_monday() < 5 {
                prop_assert!(window.start_utc <= anchor && anchor <= window.end_utc);
            } else {
                prop_assert!(window.start_utc > anchor);
                prop_assert!(window.start_utc - anchor <= Duration::days(2));
            }
        }
    }
}
