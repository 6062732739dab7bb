//! Point model for Datakit telemetry.
//!
//! A [`Point`] is a single measurement (name, tags, typed fields, nanosecond timestamp). Points are tagged with a
//! [`Category`] when written, and travel over the wire in the line protocol (see [`lineproto`]).

mod category;
pub use self::category::{Category, UnknownCategory};

mod encoding;
pub use self::encoding::Encoding;

pub mod lineproto;

mod point;
pub use self::point::{FieldValue, Point, PointBuilder, PointError};

#[cfg(any(test, feature = "test-util"))]
pub mod random;
