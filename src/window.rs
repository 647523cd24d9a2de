//! Window Resolver.
//!
//! Turns `(period_back, period_number, period_type)` into a concrete
//! half-open interval `[date_from, date_to)`.

use chrono::{Datelike, Duration, NaiveDate};

use crate::error::RapoError;
use crate::model::PeriodType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

fn month_start(d: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(d.year(), d.month(), 1).expect("valid calendar month")
}

fn add_months(d: NaiveDate, delta: i64) -> NaiveDate {
    let total = d.year() as i64 * 12 + (d.month() as i64 - 1) + delta;
    let year = total.div_euclid(12) as i32;
    let month = (total.rem_euclid(12) + 1) as u32;
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid calendar month")
}

/// Resolve a window relative to `now` (already truncated to a day boundary
/// by the caller is not required — this function truncates itself).
pub fn resolve_window(
    now: NaiveDate,
    period_back: i64,
    period_number: i64,
    period_type: PeriodType,
) -> Result<Window, RapoError> {
    if period_number <= 0 {
        return Err(RapoError::ConfigInvalid(format!(
            "period_number must be positive, got {}",
            period_number
        )));
    }
    if period_back < 0 {
        return Err(RapoError::ConfigInvalid(format!(
            "period_back must be non-negative, got {}",
            period_back
        )));
    }

    let (date_from, date_to) = match period_type {
        PeriodType::D => {
            let date_to = now - Duration::days(period_back - period_number);
            let date_from = date_to - Duration::days(period_number);
            (date_from, date_to)
        }
        PeriodType::W => {
            let date_to = now - Duration::days(7 * (period_back - period_number));
            let date_from = date_to - Duration::days(7 * period_number);
            (date_from, date_to)
        }
        PeriodType::M => {
            let current_month = month_start(now);
            let date_from = add_months(current_month, -period_back);
            let date_to = add_months(date_from, period_number);
            (date_from, date_to)
        }
    };

    if date_from >= date_to {
        return Err(RapoError::ConfigInvalid(
            "resolved window is empty or inverted".to_string(),
        ));
    }

    Ok(Window { date_from, date_to })
}
