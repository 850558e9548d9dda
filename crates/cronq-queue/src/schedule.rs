use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;

use crate::{
    error::{QueueError, Result},
    types::JobKind,
};

/// Compute the next execution instant of a recurrence spec, strictly after
/// `reference` for cron expressions and exactly `reference + interval` for
/// duration intervals.
///
/// Cron expressions are evaluated in `tz`. A spec matching neither grammar is
/// a configuration error.
pub fn next_run_date_from(spec: &str, reference: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>> {
    if let Some(schedule) = parse_cron(spec) {
        return schedule
            .after(&reference.with_timezone(&tz))
            .next()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| QueueError::InvalidSchedule(format!("{spec}: no upcoming occurrence")));
    }

    if let Some(interval) = parse_duration(spec) {
        return reference
            .checked_add_signed(interval)
            .ok_or_else(|| QueueError::InvalidSchedule(format!("{spec}: out of range")));
    }

    Err(QueueError::InvalidSchedule(spec.to_string()))
}

/// Epoch-seconds form of [`next_run_date_from`]. Uses the current time as the
/// reference when the job has never run.
pub fn next_run_date(spec: &str, last_executed: Option<i64>, tz: Tz) -> Result<i64> {
    let reference = match last_executed {
        Some(ts) => from_timestamp(ts)?,
        None => Utc::now(),
    };
    next_run_date_from(spec, reference, tz).map(|dt| dt.timestamp())
}

/// Whether a job with the given facet is due at `now`.
///
/// Immediate jobs are always due. Recurring jobs are due once the next run
/// date computed from `date_executed` (or `now` if never executed) has
/// passed. Scheduled jobs are due at/after their time, never when it is 0.
pub fn is_due(kind: &JobKind, date_executed: Option<i64>, now: DateTime<Utc>, tz: Tz) -> Result<bool> {
    match kind {
        JobKind::Immediate => Ok(true),
        JobKind::Recurring { spec } => {
            let reference = match date_executed {
                Some(ts) => from_timestamp(ts)?,
                None => now,
            };
            Ok(next_run_date_from(spec, reference, tz)? <= now)
        }
        JobKind::Scheduled { at } => Ok(*at != 0 && *at <= now.timestamp()),
    }
}

/// `next_run` value stored when a job is first persisted.
pub fn initial_next_run(kind: &JobKind, now: DateTime<Utc>, tz: Tz) -> Result<Option<i64>> {
    match kind {
        JobKind::Immediate => Ok(Some(now.timestamp())),
        JobKind::Recurring { spec } => next_run_date_from(spec, now, tz).map(|dt| Some(dt.timestamp())),
        JobKind::Scheduled { at: 0 } => Ok(None),
        JobKind::Scheduled { at } => Ok(Some(*at)),
    }
}

/// `next_run` value stored after a successful run started at `executed_at`.
/// Only recurring jobs come back; the others are terminal.
pub fn next_run_after(kind: &JobKind, executed_at: i64, tz: Tz) -> Result<Option<i64>> {
    match kind {
        JobKind::Recurring { spec } => next_run_date(spec, Some(executed_at), tz).map(Some),
        JobKind::Immediate | JobKind::Scheduled { .. } => Ok(None),
    }
}

/// True when `spec` is a valid cron expression.
pub fn is_cron_expression(spec: &str) -> bool {
    parse_cron(spec).is_some()
}

/// True when `spec` is a valid duration interval.
pub fn is_duration_interval(spec: &str) -> bool {
    parse_duration(spec).is_some()
}

/// Validate a recurrence spec against both grammars.
pub fn validate(spec: &str) -> Result<()> {
    if is_cron_expression(spec) || is_duration_interval(spec) {
        Ok(())
    } else {
        Err(QueueError::InvalidSchedule(spec.to_string()))
    }
}

/// Parse a cron expression.
///
/// Classic 5-field expressions (`min hour dom month dow`, Sunday = 0 or 7)
/// are converted to the seconds-first form the `cron` crate expects.
/// Six/seven-field expressions and `@daily`-style macros pass through
/// unchanged, so their weekday field follows the `cron` crate numbering
/// (Sunday = 1, Saturday = 7).
pub fn parse_cron(spec: &str) -> Option<cron::Schedule> {
    let spec = spec.trim();
    if spec.is_empty() {
        return None;
    }
    if spec.starts_with('@') {
        return cron::Schedule::from_str(spec).ok();
    }

    let fields: Vec<&str> = spec.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            weekday_names(fields[4])
        ),
        6 | 7 => fields.join(" "),
        _ => return None,
    };
    cron::Schedule::from_str(&normalized).ok()
}

// Classic cron numbers weekdays 0-6 from Sunday (7 is Sunday too); the `cron`
// crate numbers them 1-7. Names are unambiguous in both.
fn weekday_names(field: &str) -> String {
    const NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

    let name = |part: &str| match part.parse::<usize>() {
        Ok(n) if n <= 7 => NAMES[n % 7].to_string(),
        _ => part.to_string(),
    };

    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((b, s)) => (b, Some(s)),
                None => (item, None),
            };
            // Numeric ranges are listed day by day: `5-7` ends on Sunday,
            // which has no name-range equivalent.
            if let Some(days) = numeric_range(base, step) {
                let mut names: Vec<&str> = Vec::new();
                for day in days {
                    let day = NAMES[day % 7];
                    if !names.contains(&day) {
                        names.push(day);
                    }
                }
                return names.join(",");
            }
            let base = base.split('-').map(name).collect::<Vec<_>>().join("-");
            match step {
                Some(s) => format!("{base}/{s}"),
                None => base,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn numeric_range(base: &str, step: Option<&str>) -> Option<impl Iterator<Item = usize>> {
    let (lo, hi) = base.split_once('-')?;
    let (lo, hi) = (lo.parse::<usize>().ok()?, hi.parse::<usize>().ok()?);
    let step = match step {
        Some(s) => s.parse::<usize>().ok().filter(|s| *s > 0)?,
        None => 1,
    };
    (lo <= hi && hi <= 7).then(|| (lo..=hi).step_by(step))
}

/// Parse a duration interval.
///
/// Accepts `"<N> <unit>"` (seconds, minutes, hours, days, weeks; singular,
/// plural or abbreviated; optional leading `+`) and ISO-8601 durations built
/// from weeks, days, hours, minutes and seconds (`PT30M`, `P1DT2H`).
/// Calendar units (months, years) have no fixed length and are rejected.
pub fn parse_duration(spec: &str) -> Option<TimeDelta> {
    let s = spec.trim();
    if let Some(iso) = s.strip_prefix(|c: char| c == 'P' || c == 'p') {
        return parse_iso_duration(iso);
    }

    let s = s.strip_prefix('+').unwrap_or(s).trim();
    let mut parts = s.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?.to_ascii_lowercase();
    if parts.next().is_some() || amount <= 0 {
        return None;
    }

    let unit_secs = match unit.as_str() {
        "second" | "seconds" | "sec" | "secs" => 1,
        "minute" | "minutes" | "min" | "mins" => 60,
        "hour" | "hours" => 3_600,
        "day" | "days" => 86_400,
        "week" | "weeks" => 604_800,
        _ => return None,
    };
    TimeDelta::try_seconds(amount.checked_mul(unit_secs)?)
}

fn parse_iso_duration(body: &str) -> Option<TimeDelta> {
    let (date, time) = match body.split_once(|c: char| c == 'T' || c == 't') {
        Some((d, t)) => (d, Some(t)),
        None => (body, None),
    };

    let mut total = sum_units(date, &[('W', 604_800), ('D', 86_400)])?;
    if let Some(time) = time {
        if time.is_empty() {
            return None;
        }
        total = total.checked_add(sum_units(time, &[('H', 3_600), ('M', 60), ('S', 1)])?)?;
    }
    if total <= 0 {
        return None;
    }
    TimeDelta::try_seconds(total)
}

fn sum_units(part: &str, units: &[(char, i64)]) -> Option<i64> {
    let mut total: i64 = 0;
    let mut digits = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let factor = units.iter().find(|(u, _)| u.eq_ignore_ascii_case(&c))?.1;
        let n: i64 = digits.parse().ok()?;
        digits.clear();
        total = total.checked_add(n.checked_mul(factor)?)?;
    }
    if !digits.is_empty() {
        return None;
    }
    Some(total)
}

fn from_timestamp(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| QueueError::InvalidSchedule(format!("timestamp out of range: {ts}")))
}

/// Builder for common 5-field cron expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    fields: [String; 5],
}

impl CronSpec {
    fn new(minute: &str, hour: &str, dom: &str, month: &str, dow: &str) -> Self {
        Self {
            fields: [minute, hour, dom, month, dow].map(String::from),
        }
    }

    /// `* * * * *`
    pub fn every_minute() -> Self {
        Self::new("*", "*", "*", "*", "*")
    }

    /// `*/N * * * *`
    pub fn every_minutes(minutes: u32) -> Self {
        if minutes <= 1 {
            return Self::every_minute();
        }
        Self::new(&format!("*/{minutes}"), "*", "*", "*", "*")
    }

    /// `0 * * * *`
    pub fn every_hour() -> Self {
        Self::new("0", "*", "*", "*", "*")
    }

    /// `0 0 * * *`
    pub fn every_day() -> Self {
        Self::new("0", "0", "*", "*", "*")
    }

    /// Every day at `HH` or `HH:MM`.
    pub fn daily_at(time: &str) -> Result<Self> {
        let invalid = || QueueError::InvalidSchedule(format!("invalid time of day: {time}"));
        let mut tokens = time.trim().split(':');
        let hour: u32 = tokens.next().and_then(|h| h.parse().ok()).ok_or_else(invalid)?;
        let minute: u32 = match tokens.next() {
            Some(m) => m.parse().map_err(|_| invalid())?,
            None => 0,
        };
        if tokens.next().is_some() || hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(Self::new(&minute.to_string(), &hour.to_string(), "*", "*", "*"))
    }

    /// `0 0 * * 0`, Sundays at midnight.
    pub fn every_week() -> Self {
        Self::new("0", "0", "*", "*", "0")
    }

    /// `0 0 1 * *`
    pub fn every_month() -> Self {
        Self::new("0", "0", "1", "*", "*")
    }

    /// `0 0 1 1 *`
    pub fn every_year() -> Self {
        Self::new("0", "0", "1", "1", "*")
    }

    pub fn expression(&self) -> String {
        self.fields.join(" ")
    }
}

impl std::fmt::Display for CronSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn five_minute_cron_from_noon() {
        let noon = at(2026, 10, 19, 12, 0, 0);
        let next = next_run_date_from("*/5 * * * *", noon, Tz::UTC).unwrap();
        assert_eq!(next, at(2026, 10, 19, 12, 5, 0));

        let kind = JobKind::Recurring {
            spec: "*/5 * * * *".into(),
        };
        let executed = Some(noon.timestamp());
        assert!(!is_due(&kind, executed, at(2026, 10, 19, 12, 3, 0), Tz::UTC).unwrap());
        assert!(is_due(&kind, executed, at(2026, 10, 19, 12, 6, 0), Tz::UTC).unwrap());
    }

    #[test]
    fn cron_result_is_strictly_after_reference() {
        let references = [
            at(2026, 1, 1, 0, 0, 0),
            at(2026, 2, 28, 23, 59, 59),
            at(2026, 10, 19, 12, 5, 0),
            at(2027, 12, 31, 23, 59, 0),
        ];
        for expr in ["* * * * *", "*/5 * * * *", "0 3 * * *", "30 4 1 * *", "0 0 * * 0"] {
            for reference in references {
                let next = next_run_date_from(expr, reference, Tz::UTC).unwrap();
                assert!(next > reference, "{expr} from {reference} gave {next}");
            }
        }
    }

    #[test]
    fn duration_adds_exactly() {
        let reference = at(2026, 10, 19, 12, 0, 0);
        let cases = [
            ("5 minutes", 300),
            ("1 day", 86_400),
            ("30 Minutes", 1_800),
            ("+2 hours", 7_200),
            ("1 week", 604_800),
            ("45 sec", 45),
            ("PT30M", 1_800),
            ("P1DT2H", 93_600),
            ("P2W", 1_209_600),
        ];
        for (spec, secs) in cases {
            let next = next_run_date_from(spec, reference, Tz::UTC).unwrap();
            assert_eq!(next - reference, TimeDelta::seconds(secs), "{spec}");
        }
    }

    #[test]
    fn epoch_form_uses_last_executed() {
        let last = at(2026, 10, 19, 12, 0, 0).timestamp();
        assert_eq!(next_run_date("10 minutes", Some(last), Tz::UTC).unwrap(), last + 600);
    }

    #[test]
    fn never_executed_uses_now() {
        let before = Utc::now().timestamp();
        let next = next_run_date("1 hour", None, Tz::UTC).unwrap();
        assert!(next >= before + 3_600);
        assert!(next <= Utc::now().timestamp() + 3_600);
    }

    #[test]
    fn neither_grammar_is_invalid() {
        for spec in ["", "often", "5 fortnights", "0 minutes", "P1M", "PT", "61 * * * *", "* * *"] {
            assert!(
                matches!(
                    next_run_date_from(spec, Utc::now(), Tz::UTC),
                    Err(QueueError::InvalidSchedule(_))
                ),
                "{spec:?} should be invalid"
            );
            assert!(validate(spec).is_err());
        }
    }

    #[test]
    fn sunday_may_be_zero_or_seven() {
        // 2026-10-21 is a Wednesday; the next Sunday is the 25th.
        let wednesday = at(2026, 10, 21, 12, 0, 0);
        let sunday = at(2026, 10, 25, 0, 0, 0);
        assert_eq!(next_run_date_from("0 0 * * 0", wednesday, Tz::UTC).unwrap(), sunday);
        assert_eq!(next_run_date_from("0 0 * * 7", wednesday, Tz::UTC).unwrap(), sunday);
        assert_eq!(
            next_run_date_from("0 9 * * 1-5", wednesday, Tz::UTC).unwrap(),
            at(2026, 10, 22, 9, 0, 0)
        );
        assert_eq!(
            next_run_date_from("0 9 * * 1-7", wednesday, Tz::UTC).unwrap(),
            at(2026, 10, 22, 9, 0, 0)
        );
        assert_eq!(
            next_run_date_from("0 9 * * 5-7", wednesday, Tz::UTC).unwrap(),
            at(2026, 10, 23, 9, 0, 0)
        );
        let saturday = at(2026, 10, 24, 12, 0, 0);
        assert_eq!(
            next_run_date_from("0 9 * * 5-7", saturday, Tz::UTC).unwrap(),
            at(2026, 10, 25, 9, 0, 0)
        );
        assert_eq!(
            next_run_date_from("0 9 * * 1-5/2", wednesday, Tz::UTC).unwrap(),
            at(2026, 10, 23, 9, 0, 0)
        );
    }

    #[test]
    fn weekday_ranges_are_listed_by_name() {
        assert_eq!(weekday_names("1-5"), "MON,TUE,WED,THU,FRI");
        assert_eq!(weekday_names("0-7"), "SUN,MON,TUE,WED,THU,FRI,SAT");
        assert_eq!(weekday_names("5-7,1"), "FRI,SAT,SUN,MON");
        assert_eq!(weekday_names("*/2"), "*/2");
        assert_eq!(weekday_names("MON-FRI"), "MON-FRI");
    }

    #[test]
    fn six_field_and_macro_pass_through() {
        let reference = at(2026, 10, 19, 12, 0, 0);
        assert_eq!(
            next_run_date_from("30 0 12 * * *", reference, Tz::UTC).unwrap(),
            at(2026, 10, 19, 12, 0, 30)
        );
        assert_eq!(
            next_run_date_from("@daily", reference, Tz::UTC).unwrap(),
            at(2026, 10, 20, 0, 0, 0)
        );
        // Six fields keep the `cron` crate numbering, where 1 is Sunday.
        assert_eq!(
            next_run_date_from("0 0 0 * * 1", reference, Tz::UTC).unwrap(),
            at(2026, 10, 25, 0, 0, 0)
        );
    }

    #[test]
    fn cron_respects_configured_zone() {
        // Sofia is UTC+3 in July.
        let reference = at(2026, 7, 1, 0, 0, 0);
        let next = next_run_date_from("0 9 * * *", reference, chrono_tz::Europe::Sofia).unwrap();
        assert_eq!(next, at(2026, 7, 1, 6, 0, 0));
    }

    #[test]
    fn unset_schedule_time_is_never_due() {
        let kind = JobKind::Scheduled { at: 0 };
        for now in [at(1970, 1, 1, 0, 0, 1), Utc::now(), at(2100, 1, 1, 0, 0, 0)] {
            assert!(!is_due(&kind, None, now, Tz::UTC).unwrap());
        }
        assert_eq!(initial_next_run(&kind, Utc::now(), Tz::UTC).unwrap(), None);
    }

    #[test]
    fn scheduled_due_at_and_after_its_time() {
        let time = at(2026, 10, 19, 12, 0, 0);
        let kind = JobKind::Scheduled {
            at: time.timestamp(),
        };
        assert!(!is_due(&kind, None, at(2026, 10, 19, 11, 59, 59), Tz::UTC).unwrap());
        assert!(is_due(&kind, None, time, Tz::UTC).unwrap());
        assert!(is_due(&kind, None, at(2026, 10, 20, 0, 0, 0), Tz::UTC).unwrap());
    }

    #[test]
    fn immediate_is_always_due() {
        assert!(is_due(&JobKind::Immediate, None, Utc::now(), Tz::UTC).unwrap());
    }

    #[test]
    fn recurring_not_due_right_after_run() {
        let kind = JobKind::Recurring {
            spec: "5 minutes".into(),
        };
        let ran = at(2026, 10, 19, 12, 0, 0);
        assert!(!is_due(&kind, Some(ran.timestamp()), ran, Tz::UTC).unwrap());
        assert!(is_due(&kind, Some(ran.timestamp()), at(2026, 10, 19, 12, 5, 0), Tz::UTC).unwrap());
    }

    #[test]
    fn terminal_kinds_have_no_next_run() {
        let ran = at(2026, 10, 19, 12, 0, 0).timestamp();
        assert_eq!(next_run_after(&JobKind::Immediate, ran, Tz::UTC).unwrap(), None);
        assert_eq!(next_run_after(&JobKind::Scheduled { at: ran }, ran, Tz::UTC).unwrap(), None);
        assert_eq!(
            next_run_after(&JobKind::Recurring { spec: "1 hour".into() }, ran, Tz::UTC).unwrap(),
            Some(ran + 3_600)
        );
    }

    #[test]
    fn cron_spec_builders() {
        assert_eq!(CronSpec::every_minute().expression(), "* * * * *");
        assert_eq!(CronSpec::every_minutes(5).expression(), "*/5 * * * *");
        assert_eq!(CronSpec::every_hour().expression(), "0 * * * *");
        assert_eq!(CronSpec::every_day().expression(), "0 0 * * *");
        assert_eq!(CronSpec::daily_at("03:30").unwrap().expression(), "30 3 * * *");
        assert_eq!(CronSpec::daily_at("7").unwrap().expression(), "0 7 * * *");
        assert_eq!(CronSpec::every_week().expression(), "0 0 * * 0");
        assert_eq!(CronSpec::every_month().expression(), "0 0 1 * *");
        assert_eq!(CronSpec::every_year().to_string(), "0 0 1 1 *");
        assert!(CronSpec::daily_at("25:00").is_err());
        assert!(CronSpec::daily_at("noon").is_err());

        for spec in [
            CronSpec::every_minute(),
            CronSpec::every_week(),
            CronSpec::every_year(),
        ] {
            assert!(is_cron_expression(&spec.expression()));
        }
    }
}
