//! Month grid and per-day bucketing.
//!
//! The grid is Monday-first and always a whole number of weeks. Buckets are
//! keyed by the local calendar day of each appointment and keep fetch order;
//! only a single day's list is sorted, when it is shown.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use crate::models::Appointment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridDay {
    pub date: NaiveDate,
    /// False for the filler days of the neighbouring months.
    pub in_month: bool,
}

pub type DayBuckets = HashMap<NaiveDate, Vec<Appointment>>;

pub fn first_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

pub fn last_of_month(day: NaiveDate) -> NaiveDate {
    let first = first_of_month(day);
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(first)
}

/// `YYYY-MM` to the first day of that month.
pub fn parse_month(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d").ok()
}

pub fn month_grid(reference: NaiveDate) -> Vec<GridDay> {
    let first = first_of_month(reference);
    let last = last_of_month(reference);
    let leading = i64::from(first.weekday().num_days_from_monday());

    let mut cells = Vec::with_capacity(42);
    let mut day = first - Duration::days(leading);
    while day <= last || cells.len() % 7 != 0 {
        cells.push(GridDay {
            date: day,
            in_month: day.month() == first.month() && day.year() == first.year(),
        });
        day += Duration::days(1);
    }
    cells
}

/// Calendar day `instant` falls on at `offset`.
pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// Picker wall-clock value to an absolute instant.
pub fn local_instant(wall_clock: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&wall_clock)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Local midnight starting `date`.
pub fn start_of_day(date: NaiveDate, offset: FixedOffset) -> Option<DateTime<Utc>> {
    local_instant(date.and_time(NaiveTime::MIN), offset)
}

pub fn bucket_by_day(appointments: &[Appointment], offset: FixedOffset) -> DayBuckets {
    let mut buckets = DayBuckets::new();
    for appt in appointments {
        buckets
            .entry(local_date(appt.when_at, offset))
            .or_default()
            .push(appt.clone());
    }
    buckets
}

/// One day's appointments, earliest first.
pub fn day_list(buckets: &DayBuckets, date: NaiveDate) -> Vec<Appointment> {
    let mut list = buckets.get(&date).cloned().unwrap_or_default();
    list.sort_by_key(|a| a.when_at);
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attendance, STATUS_SCHEDULED};
    use std::collections::HashSet;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn brt() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    fn appt(when: &str) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            org_id: None,
            clinic_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            insurance_id: Uuid::new_v4(),
            patient_name: "Maria Silva".into(),
            when_at: when.parse().unwrap(),
            attendance: Attendance::Unset,
            status: STATUS_SCHEDULED.into(),
            override_reason: None,
        }
    }

    #[test]
    fn month_bounds() {
        assert_eq!(first_of_month(date(2025, 11, 15)), date(2025, 11, 1));
        assert_eq!(last_of_month(date(2025, 11, 15)), date(2025, 11, 30));
        assert_eq!(last_of_month(date(2024, 2, 10)), date(2024, 2, 29));
        assert_eq!(last_of_month(date(2025, 12, 31)), date(2025, 12, 31));
    }

    #[test]
    fn grid_covers_whole_weeks() {
        for (y, m) in [(2025, 11), (2021, 2), (2024, 2), (2025, 6), (2026, 3)] {
            let reference = date(y, m, 10);
            let grid = month_grid(reference);
            assert_eq!(grid.len() % 7, 0, "{y}-{m}");
            assert_eq!(grid[0].date.weekday(), chrono::Weekday::Mon);

            let in_month: Vec<_> = grid.iter().filter(|c| c.in_month).map(|c| c.date).collect();
            let expected = last_of_month(reference).day() as usize;
            assert_eq!(in_month.len(), expected);
            assert_eq!(in_month.iter().collect::<HashSet<_>>().len(), expected);

            let first = first_of_month(reference);
            let last = last_of_month(reference);
            let previous = first.pred_opt().unwrap();
            let next = last.succ_opt().unwrap();
            for cell in grid.iter().filter(|c| !c.in_month) {
                if cell.date < first {
                    assert_eq!(first_of_month(cell.date), first_of_month(previous));
                } else {
                    assert_eq!(first_of_month(cell.date), first_of_month(next));
                }
            }
        }
    }

    #[test]
    fn february_starting_monday_has_no_filler() {
        let grid = month_grid(date(2021, 2, 1));
        assert_eq!(grid.len(), 28);
        assert!(grid.iter().all(|c| c.in_month));
    }

    #[test]
    fn november_2025_leads_with_october() {
        let grid = month_grid(date(2025, 11, 1));
        // 2025-11-01 is a Saturday
        assert_eq!(grid[0].date, date(2025, 10, 27));
        assert_eq!(grid.iter().filter(|c| !c.in_month && c.date.month() == 10).count(), 5);
        assert_eq!(grid.len(), 35);
    }

    #[test]
    fn parses_month_parameter() {
        assert_eq!(parse_month("2025-11"), Some(date(2025, 11, 1)));
        assert_eq!(parse_month("2025-13"), None);
        assert_eq!(parse_month("nov"), None);
    }

    #[test]
    fn buckets_by_local_day_without_loss() {
        let list = vec![
            appt("2025-11-15T12:00:00Z"),
            appt("2025-11-16T01:30:00Z"), // 22:30 on the 15th in UTC-3
            appt("2025-11-15T11:00:00Z"),
            appt("2025-11-20T13:00:00Z"),
        ];
        let buckets = bucket_by_day(&list, brt());
        assert_eq!(buckets[&date(2025, 11, 15)].len(), 3);
        assert_eq!(buckets[&date(2025, 11, 20)].len(), 1);

        let mut flattened: Vec<Uuid> = buckets.values().flatten().map(|a| a.id).collect();
        let mut input: Vec<Uuid> = list.iter().map(|a| a.id).collect();
        flattened.sort();
        input.sort();
        assert_eq!(flattened, input);

        // fetch order is kept inside the bucket
        let bucket: Vec<Uuid> = buckets[&date(2025, 11, 15)].iter().map(|a| a.id).collect();
        assert_eq!(bucket, vec![list[0].id, list[1].id, list[2].id]);
    }

    #[test]
    fn day_list_is_sorted_by_time() {
        let list = vec![appt("2025-11-15T15:00:00Z"), appt("2025-11-15T11:00:00Z")];
        let buckets = bucket_by_day(&list, brt());
        let day = day_list(&buckets, date(2025, 11, 15));
        assert_eq!(day[0].id, list[1].id);
        assert!(day_list(&buckets, date(2025, 11, 16)).is_empty());
    }

    #[test]
    fn wall_clock_conversion() {
        let nine = date(2025, 11, 15).and_hms_opt(9, 0, 0).unwrap();
        let instant = local_instant(nine, brt()).unwrap();
        assert_eq!(instant.to_rfc3339(), "2025-11-15T12:00:00+00:00");
        assert_eq!(local_date(instant, brt()), date(2025, 11, 15));
        assert_eq!(
            start_of_day(date(2025, 11, 1), brt()).unwrap().to_rfc3339(),
            "2025-11-01T03:00:00+00:00"
        );
    }
}
