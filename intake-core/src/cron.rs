//! Cron expression validation and parsing.
//!
//! The grammar is classic five-field cron (`minute hour day-of-month month
//! day-of-week`) with an optional prepended seconds field. Fields accept
//! integers, ranges (`a-b`), lists (`a,b,c`), steps (`*/n`), and `*`.
//! Day-of-week is indexed 0–6 with 0 = Sunday, the convention the rest of
//! the system's configuration uses; [`parse_schedule`] translates to the
//! Quartz-style indexing the `cron` crate expects.

use crate::error::ConnectorError;
use cron::Schedule;
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*(/\d+)?|\d+(-\d+)?(/\d+)?(,\d+(-\d+)?(/\d+)?)*)$").expect("valid field regex")
});

/// Validate a cron expression and return it with whitespace normalized.
///
/// Accepts five or six space-separated fields; anything else is a
/// [`ConnectorError::Configuration`].
pub fn normalize_cron(expression: &str) -> Result<String, ConnectorError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 && fields.len() != 6 {
        return Err(ConnectorError::Configuration(format!(
            "invalid cron expression '{}': expected 5 or 6 fields, got {}",
            expression.trim(),
            fields.len()
        )));
    }
    for field in &fields {
        if !FIELD.is_match(field) {
            return Err(ConnectorError::Configuration(format!(
                "invalid cron expression '{}': bad field '{}'",
                expression.trim(),
                field
            )));
        }
    }
    Ok(fields.join(" "))
}

/// Shift numeric day-of-week literals from 0-indexed (0 = Sunday) to the
/// 1-indexed convention of the `cron` crate.
fn shift_day_of_week(field: &str) -> String {
    if field.contains('*') {
        return field.to_string();
    }
    let shift_part = |part: &str| -> String {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => (r, Some(s)),
            None => (part, None),
        };
        let shifted: String = range
            .split('-')
            .map(|n| match n.parse::<u8>() {
                Ok(v) => (v + 1).to_string(),
                Err(_) => n.to_string(),
            })
            .collect::<Vec<_>>()
            .join("-");
        match step {
            Some(s) => format!("{shifted}/{s}"),
            None => shifted,
        }
    };
    field.split(',').map(shift_part).collect::<Vec<_>>().join(",")
}

/// Parse a validated expression into a [`Schedule`] for next-fire
/// computation. Five-field expressions get a zero seconds field prepended.
pub fn parse_schedule(expression: &str) -> Result<Schedule, ConnectorError> {
    let normalized = normalize_cron(expression)?;
    let mut fields: Vec<String> = normalized.split(' ').map(str::to_string).collect();
    if fields.len() == 5 {
        fields.insert(0, "0".to_string());
    }
    let last = fields.len() - 1;
    fields[last] = shift_day_of_week(&fields[last]);
    let six = fields.join(" ");
    Schedule::from_str(&six).map_err(|e| {
        ConnectorError::Configuration(format!("invalid cron expression '{expression}': {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn accepts_standard_expressions() {
        assert_eq!(normalize_cron("0 * * * *").unwrap(), "0 * * * *");
        assert_eq!(normalize_cron("0 */6 * * *").unwrap(), "0 */6 * * *");
        assert_eq!(normalize_cron("* * * * * 0").unwrap(), "* * * * * 0");
        assert_eq!(normalize_cron("0,30 1-5 * * 1,3,5").unwrap(), "0,30 1-5 * * 1,3,5");
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_cron("0   *   *   *   *").unwrap(), "0 * * * *");
        assert_eq!(normalize_cron("  0 * * * *  ").unwrap(), "0 * * * *");
    }

    #[test]
    fn rejects_wrong_field_counts() {
        assert!(normalize_cron("invalid cron").is_err());
        assert!(normalize_cron("* * * *").is_err());
        assert!(normalize_cron("* * * * * * *").is_err());
        assert!(normalize_cron("").is_err());
    }

    #[test]
    fn rejects_garbage_fields() {
        assert!(normalize_cron("a * * * *").is_err());
        assert!(normalize_cron("0 * * * %").is_err());
    }

    #[test]
    fn parses_to_schedule_with_upcoming_fires() {
        let schedule = parse_schedule("0 */6 * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());

        let with_seconds = parse_schedule("30 0 * * * *").unwrap();
        assert!(with_seconds.upcoming(Utc).next().is_some());
    }

    #[test]
    fn sunday_zero_is_translated() {
        // 0 = Sunday in our grammar; the cron crate indexes from 1.
        let schedule = parse_schedule("0 0 * * 0").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn day_of_week_shift() {
        assert_eq!(shift_day_of_week("0"), "1");
        assert_eq!(shift_day_of_week("1-5"), "2-6");
        assert_eq!(shift_day_of_week("0,6"), "1,7");
        assert_eq!(shift_day_of_week("*"), "*");
        assert_eq!(shift_day_of_week("*/2"), "*/2");
    }
}
