use std::{cmp::Ordering, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use semver::Version;

use crate::{
    api::{Constraint, Operator},
    error::EvaluationError,
    Context,
};

/// Check that every constraint is satisfied by `context`.
///
/// Constraints are evaluated in order and the first unsatisfied one short-circuits to `false`.
/// An empty list is satisfied. An error means the constraint could not be evaluated at all; callers
/// must treat it as not satisfied.
pub fn check<'a>(
    context: &Context,
    constraints: impl IntoIterator<Item = &'a Constraint>,
) -> Result<bool, EvaluationError> {
    for constraint in constraints {
        if !constraint.eval(context)? {
            return Ok(false);
        }
    }
    Ok(true)
}

impl Constraint {
    /// Evaluate a single constraint. `inverted` flips the outcome but never an error.
    pub fn eval(&self, context: &Context) -> Result<bool, EvaluationError> {
        let value = context.field(&self.context_name);
        let result = self.operator.eval(self, value)?;
        Ok(result != self.inverted)
    }
}

impl Operator {
    fn eval(&self, constraint: &Constraint, value: Option<&str>) -> Result<bool, EvaluationError> {
        // Absent fields behave like empty strings everywhere except for dates.
        let s = value.unwrap_or_default();

        Ok(match self {
            Operator::In => constraint.values.iter().any(|v| v == s),
            Operator::NotIn => !constraint.values.iter().any(|v| v == s),

            Operator::StrContains => match_str(constraint, s, |s, v| s.contains(v)),
            Operator::StrStartsWith => match_str(constraint, s, |s, v| s.starts_with(v)),
            Operator::StrEndsWith => match_str(constraint, s, |s, v| s.ends_with(v)),

            Operator::NumEq | Operator::NumLt | Operator::NumLte | Operator::NumGt | Operator::NumGte => {
                let lhs = parse_number(s)?;
                let rhs = parse_number(constraint.value.as_deref().unwrap_or_default())?;
                let ordering = lhs.cmp(&rhs);
                match self {
                    Operator::NumEq => ordering == Ordering::Equal,
                    Operator::NumLt => ordering == Ordering::Less,
                    Operator::NumLte => ordering != Ordering::Greater,
                    Operator::NumGt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }
            }

            Operator::DateBefore | Operator::DateAfter => {
                let lhs = match value {
                    Some(v) if !v.is_empty() => parse_date(v)?,
                    _ => Utc::now(),
                };
                let rhs = parse_date(constraint.value.as_deref().unwrap_or_default())?;
                if *self == Operator::DateBefore {
                    lhs < rhs
                } else {
                    lhs > rhs
                }
            }

            Operator::SemverEq | Operator::SemverLt | Operator::SemverGt => {
                let lhs = parse_semver(s)?;
                let rhs = parse_semver(constraint.value.as_deref().unwrap_or_default())?;
                // Build metadata does not take part in precedence.
                let ordering = (lhs.major, lhs.minor, lhs.patch, &lhs.pre)
                    .cmp(&(rhs.major, rhs.minor, rhs.patch, &rhs.pre));
                match self {
                    Operator::SemverEq => ordering == Ordering::Equal,
                    Operator::SemverLt => ordering == Ordering::Less,
                    _ => ordering == Ordering::Greater,
                }
            }

            Operator::Unknown(name) => return Err(EvaluationError::UnknownOperator(name.clone())),
        })
    }
}

fn match_str(constraint: &Constraint, s: &str, f: impl Fn(&str, &str) -> bool) -> bool {
    if constraint.case_insensitive {
        let s = s.to_lowercase();
        constraint
            .values
            .iter()
            .any(|v| f(&s, &v.to_lowercase()))
    } else {
        constraint.values.iter().any(|v| f(s, v))
    }
}

fn parse_number(s: &str) -> Result<Decimal, EvaluationError> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|err| EvaluationError::InvalidNumber {
            value: s.to_owned(),
            reason: err.to_string(),
        })
}

fn parse_date(s: &str) -> Result<DateTime<Utc>, EvaluationError> {
    DateTime::parse_from_rfc3339(s)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|err| EvaluationError::InvalidDate {
            value: s.to_owned(),
            reason: err.to_string(),
        })
}

fn parse_semver(s: &str) -> Result<Version, EvaluationError> {
    Version::parse(s).map_err(|err| EvaluationError::InvalidSemver {
        value: s.to_owned(),
        reason: err.to_string(),
    })
}
