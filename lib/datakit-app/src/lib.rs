//! Application-level helpers shared by datakit binaries.

pub mod logging;
