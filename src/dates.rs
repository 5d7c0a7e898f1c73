//! Calendar helpers shared by the sequencer, resolver and batch

use chrono::{Datelike, Days, NaiveDate};

/// Inclusive end date of a block of `weeks` weeks starting on `start`.
/// Returns None when `weeks` is not positive or the date overflows.
pub fn inclusive_end(start: NaiveDate, weeks: i64) -> Option<NaiveDate> {
  if weeks <= 0 {
    return None;
  }
  let days = u64::try_from(weeks).ok()?.checked_mul(7)? - 1;
  start.checked_add_days(Days::new(days))
}

pub fn day_after(date: NaiveDate) -> Option<NaiveDate> {
  date.succ_opt()
}

/// Whole days from `from` to `to` (negative when `to` is earlier)
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
  (to - from).num_days()
}

/// Day of week with Sunday = 0, matching how workouts are authored
pub fn sunday_based_weekday(date: NaiveDate) -> u8 {
  date.weekday().num_days_from_sunday() as u8
}

/// 1-based program week for `date` in an assignment starting on `start`.
/// Programs shorter than the assignment repeat from week 1.
pub fn program_week(start: NaiveDate, date: NaiveDate, program_weeks: i64) -> Option<i64> {
  let offset = days_between(start, date);
  if offset < 0 {
    return None;
  }
  let weeks = program_weeks.max(1);
  Some((offset / 7) % weeks + 1)
}

/// Every date of a calendar month, or None for an invalid month
pub fn month_days(year: i32, month: u32) -> Option<Vec<NaiveDate>> {
  let first = NaiveDate::from_ymd_opt(year, month, 1)?;
  Some(
    first
      .iter_days()
      .take_while(|d| d.month() == month)
      .collect(),
  )
}

/// ---------------------------------------------------------------------------
/// Completion keys, most specific first
/// ---------------------------------------------------------------------------

pub fn exact_completion_key(date: NaiveDate, workout_id: i64, assignment_id: i64) -> String {
  format!("{}:{}:{}", date.format("%Y-%m-%d"), workout_id, assignment_id)
}

pub fn workout_completion_key(date: NaiveDate, workout_id: i64) -> String {
  format!("{}:{}", date.format("%Y-%m-%d"), workout_id)
}

pub fn loose_completion_key(date: NaiveDate) -> String {
  format!("{}:any", date.format("%Y-%m-%d"))
}
