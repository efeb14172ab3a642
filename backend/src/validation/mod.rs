//! Row Validator: apply an entity schema to one raw row.
//!
//! Produces the row's canonical data plus its hard `errors` and soft
//! `warnings`:
//!
//! - missing required values, failed number/date coercion, out-of-range
//!   numbers, unknown codes and dates outside the reporting period are
//!   **errors** (the row cannot be committed)
//! - unusually large numbers, codes given through an alias and rule
//!   violations declared with [`Severity::Warning`] are **warnings**
//!
//! Dates are read as `YYYY-MM-DD` first, then `DD/MM/YYYY`, always with a
//! four-digit year. `03/14/2025` is rejected rather than read month-first and
//! `14/03/25` is rejected rather than read as year 25.
//!
//! Numbers accept a decimal comma (`7,5`) and either grouping style
//! (`1,250.00`, `1.250,00`). A lone comma before exactly three digits
//! (`1,250`) could be either and is rejected.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};
use std::collections::BTreeMap;

use crate::models::{CanonicalData, FieldIssue, HeaderMapping, RawRow};
use crate::schema::{CrossFieldRule, EntitySchema, FieldKind, FieldSpec, ReportingPeriod, Severity};

/// Accepted date layouts, tried in order.
pub const DATE_FORMATS: [(&str, &str); 2] = [("%Y-%m-%d", "YYYY-MM-DD"), ("%d/%m/%Y", "DD/MM/YYYY")];

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Shapes of [`DATE_FORMATS`] with the year pinned to four digits.
static DATE_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}-\d{1,2}-\d{1,2}|\d{1,2}/\d{1,2}/\d{4})$").expect("valid date regex"));

/// `1,250,000` or `1,250.5`
static COMMA_GROUPED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?[1-9]\d{0,2}(,\d{3})+(\.\d*)?$").expect("valid number regex"));

/// `1.250.000,5` or `1.250,5`
static DOT_GROUPED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?[1-9]\d{0,2}(\.\d{3})+,\d*$").expect("valid number regex"));

/// `1,250`: thousands or three decimals
static AMBIGUOUS_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?[1-9]\d{0,2},\d{3}$").expect("valid number regex"));

/// Output of validating one row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowValidation {
    pub canonical_data: CanonicalData,
    pub errors: Vec<FieldIssue>,
    pub warnings: Vec<FieldIssue>,
}

impl RowValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, issue: FieldIssue) {
        self.errors.push(issue);
    }

    fn warning(&mut self, issue: FieldIssue) {
        self.warnings.push(issue);
    }
}

/// Parse a date in one of [`DATE_FORMATS`].
pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    let value = value.trim();
    DATE_SHAPE_RE
        .is_match(value)
        .then(|| {
            DATE_FORMATS
                .iter()
                .find_map(|(format, _)| NaiveDate::parse_from_str(value, format).ok())
        })
        .flatten()
        .ok_or_else(|| {
            let accepted: Vec<&str> = DATE_FORMATS.iter().map(|(_, label)| *label).collect();
            format!("Invalid date '{}': expected {}", value, accepted.join(" or "))
        })
}

/// Parse a number, tolerating currency symbols, spaces and a decimal comma.
pub fn parse_number(value: &str) -> Result<f64, String> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '$' | '€' | '£'))
        .collect();

    if AMBIGUOUS_COMMA_RE.is_match(&cleaned) {
        let whole = cleaned.replace(',', "");
        let decimal = cleaned.replace(',', ".");
        return Err(format!(
            "'{}' is ambiguous: write {} or {}",
            value.trim(),
            whole,
            decimal
        ));
    }

    let normalized = if COMMA_GROUPED_RE.is_match(&cleaned) {
        cleaned.replace(',', "")
    } else if DOT_GROUPED_RE.is_match(&cleaned) {
        cleaned.replace('.', "").replace(',', ".")
    } else if cleaned.matches(',').count() == 1 && !cleaned.contains('.') {
        cleaned.replace(',', ".")
    } else {
        cleaned
    };

    normalized
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("'{}' is not a number", value.trim()))
}

/// Validate one raw row against the schema.
///
/// When several headers map to the same field, the first non-empty value wins.
pub fn validate_row(
    row: &RawRow,
    mapping: &HeaderMapping,
    schema: &EntitySchema,
    period: Option<&ReportingPeriod>,
) -> RowValidation {
    let mut raw: BTreeMap<&str, &str> = BTreeMap::new();
    for (header, value) in &row.cells {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if let Some(key) = mapping.canonical_for(header) {
            raw.entry(key).or_insert(value);
        }
    }

    let mut result = RowValidation::default();

    for field in &schema.fields {
        match raw.get(field.key.as_str()) {
            None if field.required => {
                result.error(FieldIssue::new(
                    &field.key,
                    format!("{} is required", field.display_name()),
                ));
            }
            None => {}
            Some(value) => {
                if let Some(coerced) = coerce_field(field, value, period, &mut result) {
                    result.canonical_data.insert(field.key.clone(), coerced);
                }
            }
        }
    }

    for rule in &schema.rules {
        apply_rule(rule, &raw, schema, &mut result);
    }

    result
}

/// Coerce one present value. Returns `None` when an error was recorded.
fn coerce_field(
    field: &FieldSpec,
    value: &str,
    period: Option<&ReportingPeriod>,
    result: &mut RowValidation,
) -> Option<Value> {
    let name = field.display_name();
    let issue = |message: String| FieldIssue::new(&field.key, message).with_value(value);

    match &field.kind {
        FieldKind::Text { max_len } => {
            if let Some(max) = max_len {
                if value.chars().count() > *max {
                    result.error(issue(format!("{} exceeds {} characters", name, max)));
                    return None;
                }
            }
            Some(Value::String(value.to_string()))
        }

        FieldKind::Email => {
            let email = value.to_lowercase();
            if !EMAIL_RE.is_match(&email) {
                result.error(issue(format!("{} is not a valid email address", name)));
                return None;
            }
            Some(Value::String(email))
        }

        FieldKind::Number {
            min,
            max,
            warn_above,
            integer,
        } => {
            let number = match parse_number(value) {
                Ok(number) => number,
                Err(message) => {
                    result.error(issue(format!("{} must be a number: {}", name, message)));
                    return None;
                }
            };
            if *integer && number.fract() != 0.0 {
                result.error(issue(format!("{} must be a whole number", name)));
                return None;
            }
            let below = min.is_some_and(|m| number < m);
            let above = max.is_some_and(|m| number > m);
            if below || above {
                let message = match (min, max) {
                    (Some(lo), Some(hi)) => format!("{} must be between {} and {}", name, lo, hi),
                    (Some(lo), None) => format!("{} must be at least {}", name, lo),
                    (None, Some(hi)) => format!("{} must be at most {}", name, hi),
                    (None, None) => format!("{} is out of range", name),
                };
                result.error(issue(message));
                return None;
            }
            if let Some(soft) = warn_above {
                if number > *soft {
                    result.warning(issue(format!("{} of {} is unusually high", name, number)));
                }
            }
            Some(number_value(number))
        }

        FieldKind::Date {
            not_before,
            not_after,
            period_bound,
        } => {
            let date = match parse_date(value) {
                Ok(date) => date,
                Err(message) => {
                    result.error(issue(format!("{}: {}", name, message)));
                    return None;
                }
            };
            if let Some(earliest) = not_before {
                if date < *earliest {
                    result.error(issue(format!("{} {} is before {}", name, date, earliest)));
                    return None;
                }
            }
            if let Some(latest) = not_after {
                if date > *latest {
                    result.error(issue(format!("{} {} is after {}", name, date, latest)));
                    return None;
                }
            }
            if let (true, Some(period)) = (*period_bound, period) {
                if !period.contains(date) {
                    result.error(issue(format!(
                        "{} {} is outside the reporting period {} to {}",
                        name, date, period.start, period.end
                    )));
                    return None;
                }
            }
            Some(Value::String(date.format("%Y-%m-%d").to_string()))
        }

        FieldKind::Enum { values, aliases } => {
            if let Some(code) = values.iter().find(|v| v.eq_ignore_ascii_case(value)) {
                return Some(Value::String(code.clone()));
            }
            let lowered = value.to_lowercase();
            if let Some((_, code)) = aliases.iter().find(|(alias, _)| alias.to_lowercase() == lowered) {
                result.warning(issue(format!("Interpreted '{}' as {}", value, code)));
                return Some(Value::String(code.clone()));
            }
            result.error(issue(format!("{} must be one of {}", name, values.join(", "))));
            None
        }
    }
}

fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        Value::from(number as i64)
    } else {
        Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn apply_rule(
    rule: &CrossFieldRule,
    raw: &BTreeMap<&str, &str>,
    schema: &EntitySchema,
    result: &mut RowValidation,
) {
    let label = |fields: &[String]| -> String {
        fields
            .iter()
            .map(|f| schema.field(f).map(|s| s.display_name()).unwrap_or(f))
            .collect::<Vec<_>>()
            .join(" / ")
    };

    match rule {
        CrossFieldRule::AtLeastOne { fields, message } => {
            if !fields.iter().any(|f| raw.contains_key(f.as_str())) {
                let message = message
                    .clone()
                    .unwrap_or_else(|| format!("One of {} is required", label(fields)));
                result.error(FieldIssue::new(fields.join("|"), message));
            }
        }
        CrossFieldRule::Exclusive {
            fields,
            severity,
            message,
        } => {
            let present = fields.iter().filter(|f| raw.contains_key(f.as_str())).count();
            if present > 1 {
                let message = message
                    .clone()
                    .unwrap_or_else(|| format!("Only one of {} may be set", label(fields)));
                let issue = FieldIssue::new(fields.join("|"), message);
                match severity {
                    Severity::Error => result.error(issue),
                    Severity::Warning => result.warning(issue),
                }
            }
        }
    }
}
