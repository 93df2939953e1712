use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label used when a holiday row has an empty name.
pub const DEFAULT_HOLIDAY_LABEL: &str = "Holiday";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub id: Uuid,
    #[serde(default, alias = "orgId")]
    pub org_id: Option<Uuid>,
    pub date: NaiveDate,
    pub name: String,
}

/// Per-organization set of blocked days for the loaded window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HolidaySet {
    by_date: HashMap<NaiveDate, String>,
}

impl HolidaySet {
    pub fn new(holidays: &[Holiday]) -> Self {
        let by_date = holidays
            .iter()
            .map(|h| (h.date, h.name.clone()))
            .collect();
        Self { by_date }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.by_date.contains_key(&date)
    }

    /// Holiday name for display, with a generic label for unnamed rows.
    pub fn label(&self, date: NaiveDate) -> Option<&str> {
        self.by_date.get(&date).map(|name| {
            if name.trim().is_empty() {
                DEFAULT_HOLIDAY_LABEL
            } else {
                name.as_str()
            }
        })
    }

    pub fn len(&self) -> usize {
        self.by_date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_date_with_fallback_label() {
        let d1 = NaiveDate::from_ymd_opt(2025, 11, 15).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 11, 20).unwrap();
        let set = HolidaySet::new(&[
            Holiday { id: Uuid::new_v4(), org_id: None, date: d1, name: "Municipal Holiday".into() },
            Holiday { id: Uuid::new_v4(), org_id: None, date: d2, name: " ".into() },
        ]);
        assert!(set.contains(d1));
        assert_eq!(set.label(d1), Some("Municipal Holiday"));
        assert_eq!(set.label(d2), Some(DEFAULT_HOLIDAY_LABEL));
        assert!(!set.contains(NaiveDate::from_ymd_opt(2025, 11, 16).unwrap()));
        assert_eq!(set.len(), 2);
    }
}
