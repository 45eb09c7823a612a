//! Human-readable descriptions of cron expressions.
//!
//! Accepts the seconds-first format the backends run (`sec min hour dom month
//! dow [year]`). The output backs an advisory tooltip, so anything that cannot
//! be described yields [`UNKNOWN`] instead of an error.

/// Returned for expressions that cannot be described.
pub const UNKNOWN: &str = "??";

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];
const MONTH_ABBREVIATIONS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

// 1 = Sunday, same as the `cron` crate.
const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];
const WEEKDAY_ABBREVIATIONS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Seconds,
    Minutes,
    Hours,
    DayOfMonth,
    Month,
    DayOfWeek,
    Year,
}

impl Field {
    fn bounds(self) -> (u32, u32) {
        match self {
            Field::Seconds | Field::Minutes => (0, 59),
            Field::Hours => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (1, 7),
            Field::Year => (1970, 2099),
        }
    }

    fn abbreviations(self) -> &'static [&'static str] {
        match self {
            Field::Month => &MONTH_ABBREVIATIONS,
            Field::DayOfWeek => &WEEKDAY_ABBREVIATIONS,
            _ => &[],
        }
    }

    /// `?` is only meaningful in the two day fields.
    fn allows_question_mark(self) -> bool {
        matches!(self, Field::DayOfMonth | Field::DayOfWeek)
    }
}

/// Shape of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Every,
    Value(u32),
    List(Vec<u32>),
    Range(u32, u32),
    Step { start: u32, step: u32 },
    LastDay,
}

/// Describe a cron expression, or return `"??"`.
///
/// ```
/// use hourglass_scheduler::cron_describe::describe;
///
/// assert_eq!(
///     describe("0 0 0 10,20 * ?"),
///     "At 0 seconds, 0 minutes, midnight, on days 10, 20 of every month, every day of the week."
/// );
/// assert_eq!(describe("not a cron"), "??");
/// ```
pub fn describe(expression: &str) -> String {
    try_describe(expression).unwrap_or_else(|| UNKNOWN.to_string())
}

fn try_describe(expression: &str) -> Option<String> {
    let upper = expression.trim().to_uppercase();
    let parts: Vec<&str> = upper.split_whitespace().collect();
    if parts.len() != 6 && parts.len() != 7 {
        return None;
    }

    let seconds = render(Field::Seconds, &parse(Field::Seconds, parts[0])?);
    let minutes = render(Field::Minutes, &parse(Field::Minutes, parts[1])?);
    let hours = render(Field::Hours, &parse(Field::Hours, parts[2])?);
    let day_of_month = render(Field::DayOfMonth, &parse(Field::DayOfMonth, parts[3])?);
    let month = render(Field::Month, &parse(Field::Month, parts[4])?);
    let day_of_week = render(Field::DayOfWeek, &parse(Field::DayOfWeek, parts[5])?);

    let mut description =
        format!("At {seconds}, {minutes}, {hours}, {day_of_month} of {month}, {day_of_week}");
    if let Some(year) = parts.get(6) {
        description.push_str(", ");
        description.push_str(&render(Field::Year, &parse(Field::Year, year)?));
    }
    description.push('.');
    Some(description)
}

fn parse(field: Field, text: &str) -> Option<Pattern> {
    if text == "*" || (text == "?" && field.allows_question_mark()) {
        return Some(Pattern::Every);
    }
    if text == "L" && field == Field::DayOfMonth {
        return Some(Pattern::LastDay);
    }

    if let Some((start, step)) = text.split_once('/') {
        let start = if start == "*" {
            0
        } else {
            parse_value(field, start)?
        };
        let step: u32 = step.parse().ok()?;
        if step == 0 {
            return None;
        }
        return Some(Pattern::Step { start, step });
    }

    if text.contains(',') {
        let values = text
            .split(',')
            .map(|v| parse_value(field, v))
            .collect::<Option<Vec<_>>>()?;
        return Some(Pattern::List(values));
    }

    if let Some((from, to)) = text.split_once('-') {
        return Some(Pattern::Range(parse_value(field, from)?, parse_value(field, to)?));
    }

    parse_value(field, text).map(Pattern::Value)
}

/// A single number or name, within the field's bounds.
fn parse_value(field: Field, text: &str) -> Option<u32> {
    let (min, max) = field.bounds();
    let value = match text.parse::<u32>() {
        Ok(n) => n,
        Err(_) => {
            let position = field.abbreviations().iter().position(|a| *a == text)?;
            position as u32 + 1
        }
    };
    (min..=max).contains(&value).then_some(value)
}

fn render(field: Field, pattern: &Pattern) -> String {
    match field {
        Field::Seconds => render_unit(pattern, "second", "seconds"),
        Field::Minutes => render_unit(pattern, "minute", "minutes"),
        Field::Hours => render_hours(pattern),
        Field::DayOfMonth => render_day_of_month(pattern),
        Field::Month => render_named(pattern, "month", "months", month_name),
        Field::DayOfWeek => render_day_of_week(pattern),
        Field::Year => render_year(pattern),
    }
}

fn join(values: &[u32], name: impl Fn(u32) -> String) -> String {
    values.iter().map(|v| name(*v)).collect::<Vec<_>>().join(", ")
}

fn step_clause(step: u32, start: u32, singular: &str, plural: &str) -> String {
    if step == 1 {
        format!("every {singular} starting at {start}")
    } else {
        format!("every {step} {plural} starting at {start}")
    }
}

fn render_unit(pattern: &Pattern, singular: &str, plural: &str) -> String {
    match pattern {
        Pattern::Every => format!("every {singular}"),
        Pattern::Value(1) => format!("1 {singular}"),
        Pattern::Value(v) => format!("{v} {plural}"),
        Pattern::List(values) => format!("{} {plural}", join(values, |v| v.to_string())),
        Pattern::Range(from, to) => format!("from {from} to {to} {plural}"),
        Pattern::Step { start, step } => step_clause(*step, *start, singular, plural),
        Pattern::LastDay => UNKNOWN.to_string(),
    }
}

fn hour_name(hour: u32) -> String {
    match hour {
        0 => "midnight".to_string(),
        12 => "noon".to_string(),
        h if h < 12 => format!("{h} AM"),
        h => format!("{} PM", h - 12),
    }
}

fn render_hours(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Every => "every hour".to_string(),
        Pattern::Value(h) => hour_name(*h),
        Pattern::List(values) => join(values, hour_name),
        Pattern::Range(from, to) => format!("from {} to {}", hour_name(*from), hour_name(*to)),
        Pattern::Step { start, step } => step_clause(*step, *start, "hour", "hours"),
        Pattern::LastDay => UNKNOWN.to_string(),
    }
}

fn render_day_of_month(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Every => "every day".to_string(),
        Pattern::Value(d) => format!("on day {d}"),
        Pattern::List(values) => format!("on days {}", join(values, |v| v.to_string())),
        Pattern::Range(from, to) => format!("on days from {from} to {to}"),
        Pattern::Step { start, step } => step_clause(*step, *start, "day", "days"),
        Pattern::LastDay => "on the last day".to_string(),
    }
}

fn month_name(month: u32) -> String {
    MONTH_NAMES[(month - 1) as usize].to_string()
}

fn weekday_name(day: u32) -> String {
    WEEKDAY_NAMES[(day - 1) as usize].to_string()
}

fn render_named(
    pattern: &Pattern,
    singular: &str,
    plural: &str,
    name: fn(u32) -> String,
) -> String {
    match pattern {
        Pattern::Every => format!("every {singular}"),
        Pattern::Value(v) => name(*v),
        Pattern::List(values) => join(values, name),
        Pattern::Range(from, to) => format!("from {} to {}", name(*from), name(*to)),
        Pattern::Step { start, step } => step_clause(*step, *start, singular, plural),
        Pattern::LastDay => UNKNOWN.to_string(),
    }
}

fn render_day_of_week(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Every => "every day of the week".to_string(),
        Pattern::Value(d) => format!("on {}", weekday_name(*d)),
        Pattern::List(values) => format!("on {}", join(values, weekday_name)),
        Pattern::Range(from, to) => {
            format!("from {} to {}", weekday_name(*from), weekday_name(*to))
        }
        Pattern::Step { start, step } => {
            step_clause(*step, *start, "day of the week", "days of the week")
        }
        Pattern::LastDay => UNKNOWN.to_string(),
    }
}

fn render_year(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Every => "every year".to_string(),
        Pattern::Value(y) => format!("in {y}"),
        Pattern::List(values) => format!("in {}", join(values, |v| v.to_string())),
        Pattern::Range(from, to) => format!("from {from} to {to}"),
        Pattern::Step { start, step } => step_clause(*step, *start, "year", "years"),
        Pattern::LastDay => UNKNOWN.to_string(),
    }
}
