use std::{collections::BTreeMap, fmt};

use snafu::{ensure, Snafu};

use crate::lineproto;

/// A typed field value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    String(String),
}

impl FieldValue {
    /// Returns the value as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::UInt(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Bool(_) | FieldValue::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UInt(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

/// Point construction error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum PointError {
    #[snafu(display("point name must not be empty"))]
    EmptyName,

    #[snafu(display("point '{}' has no fields", name))]
    NoFields { name: String },

    #[snafu(display("empty key in point '{}'", name))]
    EmptyKey { name: String },

    #[snafu(display("empty value for tag '{}'", key))]
    EmptyTagValue { key: String },

    #[snafu(display("line break in name, tag, or field key '{}'", value))]
    LineBreak { value: String },

    #[snafu(display("field '{}' is not a finite number", key))]
    NonFiniteFloat { key: String },
}

/// A single measurement.
///
/// Tags and fields are kept sorted by key so that the serialized form is stable.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    name: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    time: i64,
}

impl Point {
    /// Starts building a point with the given name.
    pub fn builder(name: impl Into<String>) -> PointBuilder {
        PointBuilder {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            time: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn get_field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Timestamp, in nanoseconds since the Unix epoch.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Returns the line protocol form of this point.
    pub fn to_line_protocol(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        lineproto::write_point(f, self)
    }
}

/// Builder for [`Point`].
pub struct PointBuilder {
    name: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    time: i64,
}

impl PointBuilder {
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Sets the timestamp, in nanoseconds since the Unix epoch.
    pub fn with_time(mut self, time: i64) -> Self {
        self.time = time;
        self
    }

    /// Validates and builds the point.
    ///
    /// # Errors
    ///
    /// The point must have a non-empty name and at least one field. Names, tag keys, tag values and field keys must be
    /// non-empty and contain no line breaks, and float fields must be finite.
    pub fn build(self) -> Result<Point, PointError> {
        ensure!(!self.name.is_empty(), EmptyName);
        ensure!(!self.fields.is_empty(), NoFields { name: &self.name });
        ensure_single_line(&self.name)?;

        for (key, value) in &self.tags {
            ensure!(!key.is_empty(), EmptyKey { name: &self.name });
            ensure!(!value.is_empty(), EmptyTagValue { key });
            ensure_single_line(key)?;
            ensure_single_line(value)?;
        }

        for (key, value) in &self.fields {
            ensure!(!key.is_empty(), EmptyKey { name: &self.name });
            ensure_single_line(key)?;
            if let FieldValue::Float(v) = value {
                ensure!(v.is_finite(), NonFiniteFloat { key });
            }
        }

        Ok(Point {
            name: self.name,
            tags: self.tags,
            fields: self.fields,
            time: self.time,
        })
    }
}

fn ensure_single_line(value: &str) -> Result<(), PointError> {
    ensure!(!value.contains(['\n', '\r']), LineBreak { value });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_invalid_points() {
        assert!(matches!(
            Point::builder("").with_field("f", 1i64).build(),
            Err(PointError::EmptyName)
        ));
        assert!(matches!(Point::builder("cpu").build(), Err(PointError::NoFields { .. })));
        assert!(matches!(
            Point::builder("cpu").with_tag("host", "").with_field("f", 1i64).build(),
            Err(PointError::EmptyTagValue { .. })
        ));
        assert!(matches!(
            Point::builder("cpu").with_field("f", f64::NAN).build(),
            Err(PointError::NonFiniteFloat { .. })
        ));
        assert!(matches!(
            Point::builder("cpu\nload").with_field("f", 1i64).build(),
            Err(PointError::LineBreak { .. })
        ));
    }

    #[test]
    fn accessors() {
        let point = Point::builder("cpu")
            .with_tag("host", "web-1")
            .with_field("usage", 12.5)
            .with_field("cores", 8u64)
            .with_time(42)
            .build()
            .unwrap();

        assert_eq!(point.name(), "cpu");
        assert_eq!(point.get_tag("host"), Some("web-1"));
        assert_eq!(point.get_field("usage"), Some(&FieldValue::Float(12.5)));
        assert_eq!(point.get_field("cores").and_then(FieldValue::as_f64), Some(8.0));
        assert_eq!(point.time(), 42);
    }
}
