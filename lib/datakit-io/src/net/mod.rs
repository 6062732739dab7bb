//! Networking primitives.

pub mod client;
pub mod dns;
pub mod util;
