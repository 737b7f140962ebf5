//! Five-field cron expressions (`minute hour day-of-month month day-of-week`), evaluated in UTC.
//!
//! Supports `*`, `?`, lists, ranges, steps, month/weekday names and the `@hourly`, `@daily`,
//! `@weekly`, `@monthly`, `@yearly` macros. Day-of-week accepts both `0` and `7` for Sunday.
//! Day fields follow Vixie cron: unless one of them starts with `*` (or `?`) a day matches
//! if either field does, so `1-31` still counts as a restriction.

use std::fmt;

use time::{Date, OffsetDateTime};

use crate::CoreError;

pub const SECONDS_PER_DAY: i64 = 86_400;

const UNIX_EPOCH_JULIAN_DAY: i64 = 2_440_588;

/// Longest possible gap between two firings of a satisfiable expression (Feb 29 across a
/// century year that is not a leap year).
const SEARCH_HORIZON_DAYS: i64 = 366 * 9;

const ALL_DAYS_OF_MONTH: u32 = 0xFFFF_FFFE;
const ALL_MONTHS: u16 = 0x1FFE;
const ALL_DAYS_OF_WEEK: u8 = 0x7F;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    first_name_value: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    first_name_value: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    first_name_value: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    first_name_value: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    first_name_value: 1,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &WEEKDAY_NAMES,
    first_name_value: 0,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    /// the day-of-month field was written starting with `*` or `?`
    dom_star: bool,
    dow_star: bool,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, CoreError> {
        let trimmed = expression.trim();
        let expanded = expand_macro(trimmed)
            .map_err(|reason| CoreError::invalid_schedule(expression, reason))?;

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CoreError::invalid_schedule(
                expression,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }

        let parse = |field: &str, spec: &FieldSpec| {
            parse_field(field, spec).map_err(|reason| CoreError::invalid_schedule(expression, reason))
        };

        let minutes = parse(fields[0], &MINUTE)?;
        let hours = parse(fields[1], &HOUR)? as u32;
        let days_of_month = parse(fields[2], &DAY_OF_MONTH)? as u32;
        let months = parse(fields[3], &MONTH)? as u16;
        let mut days_of_week = parse(fields[4], &DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: trimmed.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week: days_of_week as u8,
            dom_star: is_star(fields[2]),
            dow_star: is_star(fields[4]),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Earliest firing strictly after `after`.
    pub fn next(&self, after: OffsetDateTime) -> Option<OffsetDateTime> {
        self.next_after(after.unix_timestamp())
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
    }

    /// Earliest firing strictly after the unix timestamp `after`.
    pub fn next_after(&self, after: i64) -> Option<i64> {
        let day = after.div_euclid(SECONDS_PER_DAY);
        let seconds = after.rem_euclid(SECONDS_PER_DAY);

        if self.day_matches(day) {
            if let Some(time) = self.first_time_after(seconds) {
                return Some(day * SECONDS_PER_DAY + time);
            }
        }

        let first_time = self.times_of_day().next()?;
        let mut date = date_of_day(day + 1)?;
        for offset in 1..=SEARCH_HORIZON_DAYS {
            if self.matches_date(date) {
                return Some((day + offset) * SECONDS_PER_DAY + first_time);
            }
            date = date.next_day()?;
        }
        None
    }

    /// Number of firings in `(from, to]`, walking the calendar one day at a time.
    pub fn count_between(&self, from: i64, to: i64) -> i64 {
        if to <= from {
            return 0;
        }

        let per_day = self.fires_per_day();
        let (from_day, from_seconds) = (from.div_euclid(SECONDS_PER_DAY), from.rem_euclid(SECONDS_PER_DAY));
        let (to_day, to_seconds) = (to.div_euclid(SECONDS_PER_DAY), to.rem_euclid(SECONDS_PER_DAY));

        if from_day == to_day {
            return if self.day_matches(from_day) {
                self.fires_through(to_seconds) - self.fires_through(from_seconds)
            } else {
                0
            };
        }

        let mut total = 0;
        if self.day_matches(from_day) {
            total += per_day - self.fires_through(from_seconds);
        }
        total += self.matching_days(from_day + 1, to_day - 1) * per_day;
        if self.day_matches(to_day) {
            total += self.fires_through(to_seconds);
        }
        total
    }

    /// Constant spacing between consecutive firings, when the expression has one.
    ///
    /// Only expressions that fire on every day of every month (optionally restricted to a
    /// single weekday with a single time of day) qualify; anything touching the calendar
    /// (month lengths, specific days of month, several weekdays) is irregular.
    pub fn uniform_interval(&self) -> Option<i64> {
        if self.months != ALL_MONTHS || self.days_of_month != ALL_DAYS_OF_MONTH {
            return None;
        }

        // with every day of month listed and both fields restricted, any day matches
        let days_of_week = if self.dom_star || self.dow_star {
            self.days_of_week
        } else {
            ALL_DAYS_OF_WEEK
        };

        let times: Vec<i64> = self.times_of_day().collect();
        if days_of_week == ALL_DAYS_OF_WEEK {
            if times.len() == 1 {
                return Some(SECONDS_PER_DAY);
            }
            let step = times[1] - times[0];
            let evenly_spaced = times.windows(2).all(|pair| pair[1] - pair[0] == step);
            let wraps_evenly = times[0] + SECONDS_PER_DAY - times[times.len() - 1] == step;
            return (evenly_spaced && wraps_evenly).then_some(step);
        }

        if days_of_week.count_ones() == 1 && times.len() == 1 {
            return Some(7 * SECONDS_PER_DAY);
        }
        None
    }

    fn fires_per_day(&self) -> i64 {
        i64::from(self.hours.count_ones()) * i64::from(self.minutes.count_ones())
    }

    fn times_of_day(&self) -> impl Iterator<Item = i64> + '_ {
        (0..24i64)
            .filter(move |hour| self.hours & (1 << hour) != 0)
            .flat_map(move |hour| {
                (0..60i64)
                    .filter(move |minute| self.minutes & (1 << minute) != 0)
                    .map(move |minute| hour * 3600 + minute * 60)
            })
    }

    /// Firings within a day at or before `seconds` past midnight.
    fn fires_through(&self, seconds: i64) -> i64 {
        self.times_of_day().take_while(|time| *time <= seconds).count() as i64
    }

    fn first_time_after(&self, seconds: i64) -> Option<i64> {
        self.times_of_day().find(|time| *time > seconds)
    }

    fn fires_every_day(&self) -> bool {
        self.months == ALL_MONTHS
            && self.days_of_month == ALL_DAYS_OF_MONTH
            && self.days_of_week == ALL_DAYS_OF_WEEK
    }

    fn matching_days(&self, first_day: i64, last_day: i64) -> i64 {
        if last_day < first_day {
            return 0;
        }
        if self.fires_every_day() {
            return last_day - first_day + 1;
        }

        let Some(mut date) = date_of_day(first_day) else {
            return 0;
        };
        let mut count = 0;
        for _ in first_day..=last_day {
            if self.matches_date(date) {
                count += 1;
            }
            match date.next_day() {
                Some(next) => date = next,
                None => break,
            }
        }
        count
    }

    fn day_matches(&self, day: i64) -> bool {
        date_of_day(day).is_some_and(|date| self.matches_date(date))
    }

    fn matches_date(&self, date: Date) -> bool {
        let month = u8::from(date.month());
        if self.months & (1 << month) == 0 {
            return false;
        }

        let dom_matches = self.days_of_month & (1 << date.day()) != 0;
        let dow_matches = self.days_of_week & (1 << date.weekday().number_days_from_sunday()) != 0;
        if !self.dom_star && !self.dow_star {
            dom_matches || dow_matches
        } else {
            dom_matches && dow_matches
        }
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn date_of_day(day: i64) -> Option<Date> {
    let julian = i32::try_from(UNIX_EPOCH_JULIAN_DAY.checked_add(day)?).ok()?;
    Date::from_julian_day(julian).ok()
}

fn is_star(field: &str) -> bool {
    field.starts_with('*') || field.starts_with('?')
}

fn expand_macro(expression: &str) -> Result<&str, String> {
    if !expression.starts_with('@') {
        return Ok(expression);
    }
    match expression.to_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        other => Err(format!("unknown macro {}", other)),
    }
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, String> {
    let mut mask = 0u64;

    for part in field.split(',') {
        if part.is_empty() {
            return Err(format!("empty list item in {} field", spec.name));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}' in {} field", step, spec.name))?;
                if step == 0 {
                    return Err(format!("step must be positive in {} field", spec.name));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" || range == "?" {
            (spec.min, spec.max)
        } else if let Some((start, end)) = range.split_once('-') {
            (parse_value(start, spec)?, parse_value(end, spec)?)
        } else {
            let value = parse_value(range, spec)?;
            match step {
                Some(_) => (value, spec.max),
                None => (value, value),
            }
        };

        if start > end {
            return Err(format!(
                "range {}-{} is reversed in {} field",
                start, end, spec.name
            ));
        }

        for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
            mask |= 1 << value;
        }
    }

    Ok(mask)
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, String> {
    let value = match raw.parse::<u32>() {
        Ok(value) => value,
        Err(_) => {
            let lowered = raw.to_lowercase();
            spec.names
                .iter()
                .position(|name| *name == lowered)
                .map(|index| index as u32 + spec.first_name_value)
                .ok_or_else(|| format!("invalid value '{}' in {} field", raw, spec.name))?
        }
    };

    if value < spec.min || value > spec.max {
        return Err(format!(
            "value {} out of range {}-{} in {} field",
            value, spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}
