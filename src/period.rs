use chrono::{Datelike, Local, NaiveDate};
use serde::{Serialize, Serializer};
use std::fmt;

/// A calendar month, rendered as `YYYY-MM`. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodKey {
    year: i32,
    month: u32,
}

impl PeriodKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return None;
        }
        Some(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn current() -> Self {
        Self::from_date(Local::now().date_naive())
    }

    /// Accepts `YYYY-MM`, `YYYY-MM-DD` and timestamps starting with a date;
    /// the day (if any) is validated and then dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim().replace('/', "-");
        let first_token = text.split([' ', 'T']).next().unwrap_or_default();
        let parts = first_token.split('-').collect::<Vec<_>>();
        if parts.len() < 2 || parts.len() > 3 || parts[0].len() != 4 {
            return None;
        }
        let year = parts[0].parse::<i32>().ok()?;
        let month = parts[1].parse::<u32>().ok()?;
        if parts.len() == 3 {
            let day = parts[2].parse::<u32>().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)?;
        }
        Self::new(year, month)
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Signed number of months from `self` to `other`.
    pub fn months_until(&self, other: &PeriodKey) -> i64 {
        (other.year as i64 - self.year as i64) * 12 + other.month as i64 - self.month as i64
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for PeriodKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Every period from `from` through `to`, inclusive. Empty when `from > to`.
pub fn enumerate_periods(from: PeriodKey, to: PeriodKey) -> Vec<PeriodKey> {
    if from > to {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(from.months_until(&to) as usize + 1);
    let mut cursor = from;
    loop {
        out.push(cursor);
        if cursor == to {
            break;
        }
        cursor = cursor.next();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pk(text: &str) -> PeriodKey {
        PeriodKey::parse(text).expect("valid period")
    }

    #[test]
    fn parse_accepts_month_and_date_forms() {
        assert_eq!(pk("2024-03").to_string(), "2024-03");
        assert_eq!(pk("2024-03-31").to_string(), "2024-03");
        assert_eq!(pk("2024/3/5").to_string(), "2024-03");
        assert_eq!(pk("2024-03-05T10:00:00").to_string(), "2024-03");
        assert_eq!(pk(" 2024-12-01 09:30:00 ").to_string(), "2024-12");
    }

    #[test]
    fn parse_rejects_garbage() {
        for raw in ["", "2024", "2024-13", "2024-02-30", "24-01", "March 2024", "2024-1x"] {
            assert!(PeriodKey::parse(raw).is_none(), "{raw} should not parse");
        }
    }

    #[test]
    fn enumerate_rolls_over_year_end() {
        let got = enumerate_periods(pk("2023-11"), pk("2024-02"))
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>();
        assert_eq!(got, vec!["2023-11", "2023-12", "2024-01", "2024-02"]);
    }

    #[test]
    fn enumerate_single_and_reversed() {
        assert_eq!(enumerate_periods(pk("2024-05"), pk("2024-05")).len(), 1);
        assert!(enumerate_periods(pk("2024-06"), pk("2024-05")).is_empty());
    }

    fn arb_period() -> impl Strategy<Value = PeriodKey> {
        (1990i32..2060, 1u32..=12).prop_map(|(y, m)| PeriodKey::new(y, m).expect("in range"))
    }

    proptest! {
        #[test]
        fn enumerate_has_expected_length_and_no_gaps(from in arb_period(), to in arb_period()) {
            let seq = enumerate_periods(from, to);
            if from <= to {
                prop_assert_eq!(seq.len() as i64, from.months_until(&to) + 1);
                prop_assert_eq!(seq.first().copied(), Some(from));
                prop_assert_eq!(seq.last().copied(), Some(to));
                for pair in seq.windows(2) {
                    prop_assert!(pair[0] < pair[1]);
                    prop_assert_eq!(pair[0].months_until(&pair[1]), 1);
                }
            } else {
                prop_assert!(seq.is_empty());
            }
        }
    }
}
