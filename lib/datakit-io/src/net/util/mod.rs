//! Networking helpers.

pub mod retry;
