//! I/O building blocks for shipping data to a dataway: HTTP client, DNS caching, retries, compression, and the disk
//! cache used to hold batches that could not be delivered.

pub mod compression;
pub mod diskcache;
pub mod net;
