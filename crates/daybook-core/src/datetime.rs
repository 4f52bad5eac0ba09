use anyhow::{Context, anyhow};
use chrono::{
    DateTime, Datelike, Duration, Local, NaiveDate, SecondsFormat, Utc, Weekday,
};
use chrono_tz::Tz;
use regex::Regex;

pub const TIMEZONE_ENV_VAR: &str = "DAYBOOK_TIMEZONE";

/// Calendar used to turn instants into calendar dates.
///
/// Every "today", rollover comparison, and filter window is evaluated in the
/// same calendar so that a task completed late in the evening does not land
/// on tomorrow's date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Calendar {
    #[default]
    Local,
    Fixed(Tz),
}

impl Calendar {
    /// Resolves the calendar from the configured timezone, then
    /// `DAYBOOK_TIMEZONE`, then the system local timezone.
    #[tracing::instrument]
    pub fn resolve(configured: Option<&str>) -> Self {
        if let Some(raw) = configured
            && let Some(tz) = parse_timezone(raw, "config:timezone")
        {
            return Self::Fixed(tz);
        }

        if let Ok(raw) = std::env::var(TIMEZONE_ENV_VAR)
            && let Some(tz) = parse_timezone(&raw, TIMEZONE_ENV_VAR)
        {
            return Self::Fixed(tz);
        }

        tracing::debug!("no timezone configured, using system local time");
        Self::Local
    }

    #[must_use]
    pub fn date_of(&self, dt: DateTime<Utc>) -> NaiveDate {
        match self {
            Self::Local => dt.with_timezone(&Local).date_naive(),
            Self::Fixed(tz) => dt.with_timezone(tz).date_naive(),
        }
    }

    #[must_use]
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.date_of(now)
    }

    pub fn name(&self) -> String {
        match self {
            Self::Local => "local".to_string(),
            Self::Fixed(tz) => tz.name().to_string(),
        }
    }
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::info!(source, timezone = %trimmed, "configured calendar timezone");
            Some(tz)
        }
        Err(err) => {
            tracing::error!(
                source,
                timezone = %trimmed,
                error = %err,
                "failed to parse timezone id"
            );
            None
        }
    }
}

/// Parses a user supplied due date relative to `today`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_date_expr(input: &str, today: NaiveDate) -> anyhow::Result<NaiveDate> {
    let token = input.trim();
    let lower = token.to_ascii_lowercase();

    match lower.as_str() {
        "today" => return Ok(today),
        "tomorrow" => return Ok(add_days(today, 1)),
        "yesterday" => return Ok(add_days(today, -1)),
        _ => {}
    }

    if let Some(target) = parse_weekday_name(&lower) {
        return Ok(next_weekday_date(today, target));
    }

    if let Some(month) = parse_month_name(&lower) {
        let mut year = today.year();
        let this_year = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| anyhow!("invalid month value: {month}"))?;
        if this_year <= today {
            year = year.saturating_add(1);
        }
        return NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| anyhow!("invalid month/year candidate"));
    }

    let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

    if let Some(caps) = rel_re.captures(&lower) {
        let num: i64 = caps
            .name("num")
            .map(|m| m.as_str())
            .ok_or_else(|| anyhow!("missing relative amount"))?
            .parse()
            .context("invalid relative number")?;
        let days = match caps.name("unit").map(|m| m.as_str()) {
            Some("d") => num,
            Some("w") => num.saturating_mul(7),
            other => return Err(anyhow!("unknown relative unit: {other:?}")),
        };
        let signed = if caps.name("sign").map(|m| m.as_str()) == Some("-") {
            -days
        } else {
            days
        };
        return today
            .checked_add_signed(Duration::days(signed))
            .ok_or_else(|| anyhow!("relative date out of range: {input}"));
    }

    if let Some(date) = parse_wire_date(token) {
        return Ok(date);
    }

    Err(anyhow!("unrecognized date expression: {input}")).with_context(|| {
        "supported formats: today/tomorrow/yesterday, weekday names (e.g. \
         monday), month names (e.g. march), +Nd/-Nd/+Nw/-Nw, YYYY-MM-DD"
    })
}

fn parse_weekday_name(token: &str) -> Option<Weekday> {
    match token.trim() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn next_weekday_date(from: NaiveDate, target: Weekday) -> NaiveDate {
    let from_idx = from.weekday().num_days_from_monday() as i64;
    let target_idx = target.num_days_from_monday() as i64;
    let mut delta = (7 + target_idx - from_idx) % 7;
    if delta == 0 {
        delta = 7;
    }
    add_days(from, delta)
}

fn parse_month_name(token: &str) -> Option<u32> {
    match token.trim() {
        "january" | "jan" => Some(1),
        "february" | "feb" => Some(2),
        "march" | "mar" => Some(3),
        "april" | "apr" => Some(4),
        "may" => Some(5),
        "june" | "jun" => Some(6),
        "july" | "jul" => Some(7),
        "august" | "aug" => Some(8),
        "september" | "sep" | "sept" => Some(9),
        "october" | "oct" => Some(10),
        "november" | "nov" => Some(11),
        "december" | "dec" => Some(12),
        _ => None,
    }
}

pub(crate) fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days))
        .unwrap_or(date)
}

pub(crate) fn first_day_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

pub(crate) fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month >= 12 {
        (year.saturating_add(1), 1_u32)
    } else {
        (year, month + 1)
    };
    add_days(first_day_of_month(next_year, next_month), -1)
}

/// Formats a due date the way it is persisted (`YYYY-MM-DD`).
pub fn format_wire_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Reads a persisted due date. Full timestamps are accepted and truncated to
/// their UTC date.
pub fn parse_wire_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}

/// Formats a completion instant as an ISO-8601 UTC string with milliseconds.
pub fn format_wire_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_wire_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
