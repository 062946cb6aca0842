//! Cron expression parsing and evaluation.

use crate::error::ScheduleError;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// A parsed cron schedule, evaluated in UTC.
///
/// Accepts the classic five-field form (`min hour dom month dow`), which
/// fires at second zero and numbers weekdays 0-6 from Sunday (7 is also
/// Sunday), and the six- and seven-field forms of the `cron` crate (leading
/// seconds, optional trailing year, weekdays 1-7 from Sunday).
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parses a cron expression.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCronExpression` if the expression does not parse.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason,
        };
        let normalized = normalize(expression).map_err(invalid)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// Returns the expression as given.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the first instant strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Counts instants in `(from, until]`.
    #[must_use]
    pub fn count_between(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> usize {
        self.schedule
            .after(&from)
            .take_while(|instant| *instant <= until)
            .count()
    }
}

/// Rewrites a five-field expression into the `cron` crate's grammar.
fn normalize(expression: &str) -> Result<String, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, day, month, weekday] => Ok(format!(
            "0 {minute} {hour} {day} {month} {}",
            shift_weekdays(weekday)?
        )),
        _ => Ok(fields.join(" ")),
    }
}

/// Maps a classic weekday field (0-7, Sunday = 0 or 7) onto the `cron`
/// crate's numbering (1-7, Sunday = 1).
///
/// Numeric items are expanded to explicit day lists so ranges and steps keep
/// their meaning. Named days are already unambiguous and pass through.
fn shift_weekdays(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut items = Vec::new();
    for item in field.split(',') {
        if !item.chars().all(|c| c.is_ascii_digit() || matches!(c, '*' | '-' | '/')) {
            items.push(item.to_string());
            continue;
        }
        let mut days: Vec<u32> = weekday_values(item)?
            .into_iter()
            .map(|day| day % 7 + 1)
            .collect();
        days.sort_unstable();
        days.dedup();
        items.extend(days.iter().map(u32::to_string));
    }
    Ok(items.join(","))
}

/// Expands `*`, `n`, `a-b`, each optionally followed by `/step`.
fn weekday_values(item: &str) -> Result<Vec<u32>, String> {
    let number = |text: &str| -> Result<u32, String> {
        match text.parse::<u32>() {
            Ok(day) if day <= 7 => Ok(day),
            _ => Err(format!("invalid day of week '{text}' in '{item}'")),
        }
    };

    let (base, step) = match item.split_once('/') {
        Some((base, step)) => match step.parse::<u32>() {
            Ok(step) if step > 0 => (base, step),
            _ => return Err(format!("invalid step in '{item}'")),
        },
        None => (item, 1),
    };

    let (first, last) = match base.split_once('-') {
        _ if base == "*" => (0, 6),
        Some((first, last)) => (number(first)?, number(last)?),
        None if item.contains('/') => (number(base)?, 6),
        None => {
            let day = number(base)?;
            (day, day)
        }
    };
    if first > last {
        return Err(format!("descending range '{item}'"));
    }

    Ok((first..=last).step_by(step as usize).collect())
}
