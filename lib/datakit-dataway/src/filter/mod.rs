//! Point filters.
//!
//! A filter is a list of condition groups, written as `{ ... }` and separated by `;`, `,` or nothing. A point matches
//! the filter when it matches any group. Inside a group, conditions combine with `and`/`&&` and `or`/`||` (`and` binds
//! tighter) and can be parenthesized:
//!
//! ```text
//! { source = 'nginx' and status >= 500 } ; { service in ['api', 'web'] or message match ['^panic'] }
//! ```
//!
//! Operators are `=`/`==`, `!=`, `<`, `<=`, `>`, `>=`, and the list operators `in`, `notin`, `match` and `notmatch`.
//! Values are quoted strings, numbers, `true`, `false` or `nil`. Keys that are not plain identifiers can be
//! backquoted. Keywords are case-insensitive.
//!
//! A key is looked up in the point's tags, then its fields, then among the name keys of its category (`source`,
//! `measurement`, `class` or `service`), which resolve to the point's name.

use datakit_point::{Category, FieldValue, Point};
use regex::Regex;
use snafu::{ResultExt as _, Snafu};

mod parser;
use self::parser::{Literal, Op, RawCondition, RawExpr};

const SNIPPET_LEN: usize = 32;

/// Filter error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum FilterError {
    #[snafu(display("malformed filter at byte {}: '{}'", offset, snippet))]
    Malformed { offset: usize, snippet: String },

    #[snafu(display("invalid pattern '{}': {}", pattern, source))]
    InvalidPattern { pattern: String, source: regex::Error },

    #[snafu(display("'{}' expects string patterns", op))]
    NonStringPattern { op: &'static str },

    #[snafu(display("cannot evaluate '{} {}': operands must both be numbers or both be strings", key, op))]
    Incomparable { key: String, op: &'static str },
}

/// A compiled filter.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    groups: Vec<Expr>,
}

impl Filter {
    /// Parses and compiles a filter.
    ///
    /// # Errors
    ///
    /// If the filter is malformed, or one of its patterns is not a valid regular expression, an error is returned.
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let raw = parser::parse_groups(input).map_err(|offset| FilterError::Malformed {
            offset,
            snippet: input[offset..].chars().take(SNIPPET_LEN).collect(),
        })?;

        let groups = raw.into_iter().map(Expr::compile).collect::<Result<_, _>>()?;
        Ok(Self { groups })
    }

    /// Parses and compiles several filters into one that matches whenever any of them does.
    ///
    /// # Errors
    ///
    /// If any filter fails to parse, an error is returned.
    pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> Result<Self, FilterError> {
        let mut groups = Vec::new();
        for input in inputs {
            groups.extend(Self::parse(input.as_ref())?.groups);
        }
        Ok(Self { groups })
    }

    /// Returns `true` if the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Evaluates the filter against a point of the given category.
    ///
    /// Groups are tried in order until one matches.
    ///
    /// # Errors
    ///
    /// If a condition cannot be evaluated on this point, such as an ordering comparison between a string and a number,
    /// an error is returned.
    pub fn matches(&self, category: Category, point: &Point) -> Result<bool, FilterError> {
        let subject = Subject { category, point };
        for group in &self.groups {
            if group.eval(&subject)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[derive(Clone, Debug)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Condition(Condition),
}

impl Expr {
    fn compile(raw: RawExpr) -> Result<Self, FilterError> {
        Ok(match raw {
            RawExpr::Or(exprs) => Expr::Or(exprs.into_iter().map(Expr::compile).collect::<Result<_, _>>()?),
            RawExpr::And(exprs) => Expr::And(exprs.into_iter().map(Expr::compile).collect::<Result<_, _>>()?),
            RawExpr::Condition(raw) => Expr::Condition(Condition::compile(raw)?),
        })
    }

    fn eval(&self, subject: &Subject<'_>) -> Result<bool, FilterError> {
        match self {
            Expr::Or(exprs) => {
                for expr in exprs {
                    if expr.eval(subject)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expr::And(exprs) => {
                for expr in exprs {
                    if !expr.eval(subject)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expr::Condition(condition) => condition.eval(subject),
        }
    }
}

#[derive(Clone, Debug)]
struct Condition {
    key: String,
    op: Op,
    values: Vec<Literal>,
    patterns: Vec<Regex>,
}

impl Condition {
    fn compile(raw: RawCondition) -> Result<Self, FilterError> {
        let mut patterns = Vec::new();
        if matches!(raw.op, Op::Match | Op::NotMatch) {
            for value in &raw.values {
                let Literal::String(pattern) = value else {
                    return Err(FilterError::NonStringPattern { op: raw.op.as_str() });
                };
                patterns.push(Regex::new(pattern).context(InvalidPattern { pattern })?);
            }
        }

        Ok(Self {
            key: raw.key,
            op: raw.op,
            values: raw.values,
            patterns,
        })
    }

    fn eval(&self, subject: &Subject<'_>) -> Result<bool, FilterError> {
        let actual = subject.lookup(&self.key);

        Ok(match self.op {
            Op::Eq => self.values.iter().any(|v| equals(actual.as_ref(), v)),
            Op::Ne => !self.values.iter().any(|v| equals(actual.as_ref(), v)),
            Op::In => self.values.iter().any(|v| equals(actual.as_ref(), v)),
            Op::NotIn => !self.values.iter().any(|v| equals(actual.as_ref(), v)),
            Op::Match => self.is_match(actual.as_ref()),
            Op::NotMatch => !self.is_match(actual.as_ref()),
            Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                let ordering = self
                    .values
                    .first()
                    .and_then(|expected| compare(actual.as_ref(), expected))
                    .ok_or_else(|| FilterError::Incomparable {
                        key: self.key.clone(),
                        op: self.op.as_str(),
                    })?;

                match self.op {
                    Op::Lt => ordering.is_lt(),
                    Op::Le => ordering.is_le(),
                    Op::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }
            }
        })
    }

    fn is_match(&self, actual: Option<&Value<'_>>) -> bool {
        match actual {
            Some(Value::Str(s)) => self.patterns.iter().any(|re| re.is_match(s)),
            _ => false,
        }
    }
}

/// A value looked up on a point.
#[derive(Debug)]
enum Value<'a> {
    Str(&'a str),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Value<'_> {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Str(_) | Value::Bool(_) => None,
        }
    }
}

impl<'a> From<&'a FieldValue> for Value<'a> {
    fn from(value: &'a FieldValue) -> Self {
        match value {
            FieldValue::Int(v) => Value::Int(*v),
            FieldValue::UInt(v) => Value::UInt(*v),
            FieldValue::Float(v) => Value::Float(*v),
            FieldValue::Bool(v) => Value::Bool(*v),
            FieldValue::String(v) => Value::Str(v),
        }
    }
}

fn literal_as_f64(literal: &Literal) -> Option<f64> {
    match literal {
        Literal::Int(v) => Some(*v as f64),
        Literal::Float(v) => Some(*v),
        _ => None,
    }
}

fn equals(actual: Option<&Value<'_>>, expected: &Literal) -> bool {
    match (actual, expected) {
        (None, Literal::Nil) => true,
        (None, _) | (Some(_), Literal::Nil) => false,
        (Some(Value::Str(a)), Literal::String(b)) => a == b,
        (Some(Value::Bool(a)), Literal::Bool(b)) => a == b,
        (Some(Value::Int(a)), Literal::Int(b)) => a == b,
        (Some(Value::UInt(a)), Literal::Int(b)) => i64::try_from(*a).is_ok_and(|a| a == *b),
        (Some(actual), expected) => match (actual.as_f64(), literal_as_f64(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn compare(actual: Option<&Value<'_>>, expected: &Literal) -> Option<std::cmp::Ordering> {
    match (actual?, expected) {
        (Value::Str(a), Literal::String(b)) => Some((*a).cmp(b.as_str())),
        (Value::Int(a), Literal::Int(b)) => Some(a.cmp(b)),
        (actual, expected) => actual.as_f64()?.partial_cmp(&literal_as_f64(expected)?),
    }
}

struct Subject<'a> {
    category: Category,
    point: &'a Point,
}

impl<'a> Subject<'a> {
    fn lookup(&self, key: &str) -> Option<Value<'a>> {
        if let Some(tag) = self.point.get_tag(key) {
            return Some(Value::Str(tag));
        }
        if let Some(field) = self.point.get_field(key) {
            return Some(field.into());
        }
        is_name_key(self.category, key).then(|| Value::Str(self.point.name()))
    }
}

/// Returns `true` if `key` refers to the point name in `category`.
fn is_name_key(category: Category, key: &str) -> bool {
    match key {
        "source" => true,
        "measurement" => matches!(category, Category::Metric | Category::MetricDeprecated),
        "class" => matches!(category, Category::Object | Category::CustomObject),
        "service" => matches!(category, Category::Tracing | Category::Profiling),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Point {
        Point::builder("nginx")
            .with_tag("host", "web-01")
            .with_tag("env", "prod")
            .with_field("status", 502i64)
            .with_field("latency", 1.5)
            .with_field("bytes", 2048u64)
            .with_field("ok", false)
            .with_field("message", "upstream timed out")
            .with_time(1)
            .build()
            .unwrap()
    }

    fn eval(filter: &str, category: Category) -> Result<bool, FilterError> {
        Filter::parse(filter).unwrap().matches(category, &point())
    }

    fn check(filter: &str) -> bool {
        eval(filter, Category::Logging).unwrap()
    }

    #[test]
    fn equality() {
        assert!(check("{ host = 'web-01' }"));
        assert!(check("{ host == \"web-01\" }"));
        assert!(!check("{ host = 'web-02' }"));
        assert!(check("{ host != 'web-02' }"));
        assert!(check("{ status = 502 }"));
        assert!(check("{ status = 502.0 }"));
        assert!(check("{ bytes = 2048 }"));
        assert!(check("{ latency = 1.5 }"));
        assert!(check("{ ok = false }"));
        assert!(!check("{ status = '502' }"));
    }

    #[test]
    fn missing_keys() {
        assert!(check("{ missing = nil }"));
        assert!(!check("{ missing = 'x' }"));
        assert!(check("{ missing != 'x' }"));
        assert!(!check("{ host = nil }"));
        assert!(check("{ missing notin ['x'] }"));
        assert!(check("{ missing notmatch ['.*'] }"));
        assert!(!check("{ missing in ['x'] }"));
        assert!(check("{ missing in ['x', nil] }"));
    }

    #[test]
    fn ordering() {
        assert!(check("{ status >= 500 }"));
        assert!(!check("{ status < 500 }"));
        assert!(check("{ latency > 1 }"));
        assert!(check("{ bytes <= 2048 }"));
        assert!(check("{ host > 'web-00' }"));
        assert!(eval("{ status > 'abc' }", Category::Logging).is_err());
        assert!(eval("{ host > 1 }", Category::Logging).is_err());
        assert!(eval("{ missing > 1 }", Category::Logging).is_err());
    }

    #[test]
    fn lists_and_patterns() {
        assert!(check("{ env in ['dev', 'prod'] }"));
        assert!(!check("{ env notin ['dev', 'prod'] }"));
        assert!(check("{ message match ['^upstream', 'nothing'] }"));
        assert!(!check("{ message notmatch ['timed out$'] }"));
        assert!(!check("{ status match ['5..'] }"));
    }

    #[test]
    fn logic() {
        assert!(check("{ host = 'web-01' and (env = 'dev' or status = 502) }"));
        assert!(!check("{ host = 'web-01' && env = 'dev' }"));
        assert!(check("{ host = 'web-02' || env = 'prod' && ok = false }"));
        assert!(check("{ host = 'web-02' } ; { env = 'prod' }"));
    }

    #[test]
    fn name_keys_depend_on_category() {
        assert!(eval("{ source = 'nginx' }", Category::Logging).unwrap());
        assert!(eval("{ source = 'nginx' }", Category::Object).unwrap());
        assert!(eval("{ measurement = 'nginx' }", Category::Metric).unwrap());
        assert!(!eval("{ measurement = 'nginx' }", Category::Logging).unwrap());
        assert!(eval("{ class = 'nginx' }", Category::CustomObject).unwrap());
        assert!(eval("{ service = 'nginx' }", Category::Tracing).unwrap());
        assert!(!eval("{ service = 'nginx' }", Category::Logging).unwrap());
    }

    #[test]
    fn tags_shadow_name_keys() {
        let point = Point::builder("nginx")
            .with_tag("source", "custom")
            .with_field("f", 1i64)
            .build()
            .unwrap();
        let filter = Filter::parse("{ source = 'custom' }").unwrap();
        assert!(filter.matches(Category::Logging, &point).unwrap());
    }

    #[test]
    fn compile_errors() {
        assert!(matches!(
            Filter::parse("{ message match ['('] }"),
            Err(FilterError::InvalidPattern { .. })
        ));
        assert!(matches!(
            Filter::parse("{ message match [1] }"),
            Err(FilterError::NonStringPattern { .. })
        ));
        assert!(matches!(
            Filter::parse("{ source = }"),
            Err(FilterError::Malformed { .. })
        ));
    }

    #[test]
    fn parse_all_combines_groups() {
        let filter = Filter::parse_all(&["{ host = 'nope' }", "{ env = 'prod' }"]).unwrap();
        assert!(filter.matches(Category::Logging, &point()).unwrap());
        assert!(Filter::parse_all::<&str>(&[]).unwrap().is_empty());
    }
}
