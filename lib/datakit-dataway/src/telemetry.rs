//! Write path telemetry.

use datakit_point::Category;
use metrics::counter;

use crate::body::Body;

const STATUS_TOTAL: &str = "total";

/// Status label used when no response was received.
pub(crate) const STATUS_UNKNOWN: &str = "unknown";

/// Records the bytes and points of a body sent to a dataway.
///
/// Every value is recorded twice: once under the `total` status, and once under `status`.
pub(crate) fn record_body_sent(body: &Body, status: &str) {
    let category = body.category().name();
    let sent = body.len() as u64;
    let raw = body.raw_len() as u64;
    let points = body.npts() as u64;

    for status in [STATUS_TOTAL, status] {
        let status = status.to_string();
        counter!("datakit_io_dataway_bytes_total", "category" => category, "enc" => "gzip", "status" => status.clone())
            .increment(sent);
        counter!("datakit_io_dataway_bytes_total", "category" => category, "enc" => "raw", "status" => status.clone())
            .increment(raw);
        counter!("datakit_io_dataway_point_total", "category" => category, "status" => status).increment(points);
    }
}

/// Records one pass of a sinker over a batch of points.
pub(crate) fn record_sink(category: Category, sinked: usize, not_sinked: usize) {
    let category = category.name();
    counter!("datakit_io_dataway_sink_total", "category" => category).increment(1);
    counter!("datakit_io_dataway_sink_point_total", "category" => category).increment(sinked as u64);
    counter!("datakit_io_dataway_not_sink_point_total", "category" => category).increment(not_sinked as u64);
}
