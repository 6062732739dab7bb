use std::{fmt, str::FromStr};

use snafu::Snafu;

/// Kind of data carried by a write.
///
/// Every category except the dynamic ones maps to a fixed write path on the dataway. The integer values are stable:
/// they are persisted in cached batches.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Category {
    Unknown,
    /// Written to a URL supplied with each write rather than a fixed path.
    DynamicDw,
    /// Older metric path, kept for collectors that still use it.
    MetricDeprecated,
    Metric,
    Network,
    KeyEvent,
    Object,
    CustomObject,
    Logging,
    Tracing,
    Rum,
    Security,
    Profiling,
    DialTesting,
}

/// The given name does not refer to any category.
#[derive(Debug, Snafu)]
#[snafu(display("unknown category '{}'", name))]
pub struct UnknownCategory {
    name: String,
}

impl Category {
    /// All categories, in integer order.
    pub const ALL: [Category; 14] = [
        Category::Unknown,
        Category::DynamicDw,
        Category::MetricDeprecated,
        Category::Metric,
        Category::Network,
        Category::KeyEvent,
        Category::Object,
        Category::CustomObject,
        Category::Logging,
        Category::Tracing,
        Category::Rum,
        Category::Security,
        Category::Profiling,
        Category::DialTesting,
    ];

    /// Returns the persisted integer value of this category.
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns the category for a persisted integer value.
    pub fn from_i32(value: i32) -> Option<Self> {
        usize::try_from(value).ok().and_then(|idx| Self::ALL.get(idx).copied())
    }

    /// Returns the dataway write path for this category, if it has one.
    pub const fn url_path(self) -> Option<&'static str> {
        match self {
            Category::MetricDeprecated => Some("/v1/write/metrics"),
            Category::Metric => Some("/v1/write/metric"),
            Category::Network => Some("/v1/write/network"),
            Category::KeyEvent => Some("/v1/write/keyevent"),
            Category::Object => Some("/v1/write/object"),
            Category::CustomObject => Some("/v1/write/custom_object"),
            Category::Logging => Some("/v1/write/logging"),
            Category::Tracing => Some("/v1/write/tracing"),
            Category::Rum => Some("/v1/write/rum"),
            Category::Security => Some("/v1/write/security"),
            Category::Profiling => Some("/v1/write/profiling"),
            Category::Unknown | Category::DynamicDw | Category::DialTesting => None,
        }
    }

    /// Returns the short name of this category, as used in configuration and metric labels.
    pub const fn name(self) -> &'static str {
        match self {
            Category::Unknown => "unknown",
            Category::DynamicDw => "dynamic_dw",
            Category::MetricDeprecated => "metrics",
            Category::Metric => "metric",
            Category::Network => "network",
            Category::KeyEvent => "keyevent",
            Category::Object => "object",
            Category::CustomObject => "custom_object",
            Category::Logging => "logging",
            Category::Tracing => "tracing",
            Category::Rum => "rum",
            Category::Security => "security",
            Category::Profiling => "profiling",
            Category::DialTesting => "dialtesting",
        }
    }

    /// Returns an iterator over all categories that have a fixed write path.
    pub fn with_write_paths() -> impl Iterator<Item = Category> {
        Self::ALL.into_iter().filter(|c| c.url_path().is_some())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    /// Parses either a short name (`logging`) or a write path (`/v1/write/logging`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s) || c.url_path() == Some(s))
            .ok_or_else(|| UnknownCategory { name: s.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_values_are_stable() {
        assert_eq!(Category::Unknown.as_i32(), 0);
        assert_eq!(Category::DynamicDw.as_i32(), 1);
        assert_eq!(Category::Metric.as_i32(), 3);
        assert_eq!(Category::Logging.as_i32(), 8);
        assert_eq!(Category::DialTesting.as_i32(), 13);

        for category in Category::ALL {
            assert_eq!(Category::from_i32(category.as_i32()), Some(category));
        }
        assert_eq!(Category::from_i32(-1), None);
        assert_eq!(Category::from_i32(14), None);
    }

    #[test]
    fn parse_by_name_or_path() {
        assert_eq!("logging".parse::<Category>().unwrap(), Category::Logging);
        assert_eq!("Logging".parse::<Category>().unwrap(), Category::Logging);
        assert_eq!("/v1/write/metric".parse::<Category>().unwrap(), Category::Metric);
        assert_eq!("metrics".parse::<Category>().unwrap(), Category::MetricDeprecated);
        assert!("/v1/write/nope".parse::<Category>().is_err());
    }

    #[test]
    fn dynamic_categories_have_no_path() {
        assert_eq!(Category::DynamicDw.url_path(), None);
        assert_eq!(Category::DialTesting.url_path(), None);
        assert_eq!(Category::with_write_paths().count(), 11);
    }
}
