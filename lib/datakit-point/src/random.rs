//! Random point generation for tests and benchmarks.

use rand::{distr::Alphanumeric, Rng};

use crate::Point;

/// Generates `n` random, valid points.
///
/// Points carry a handful of tags and fields of every type, with random string contents. Timestamps increase with the
/// point index so generated batches keep a stable order.
pub fn random_points(n: usize) -> Vec<Point> {
    let mut rng = rand::rng();
    (0..n).map(|i| random_point(&mut rng, i)).collect()
}

fn random_point<R: Rng>(rng: &mut R, idx: usize) -> Point {
    let base_time = 1_700_000_000_000_000_000i64;
    let message_len = rng.random_range(8..64);

    let point = Point::builder(format!("rand-{}", random_string(rng, 6)))
        .with_tag("host", format!("host-{}", random_string(rng, 4)))
        .with_tag("service", random_string(rng, 10))
        .with_field("count", rng.random_range(-1000i64..1000))
        .with_field("total", rng.random_range(0u64..1_000_000))
        .with_field("ratio", rng.random::<f64>())
        .with_field("ok", rng.random::<bool>())
        .with_field("message", random_string(rng, message_len))
        .with_time(base_time + idx as i64)
        .build();

    match point {
        Ok(point) => point,
        Err(e) => unreachable!("generated point is always valid: {}", e),
    }
}

fn random_string<R: Rng>(rng: &mut R, len: usize) -> String {
    rng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineproto::parse;

    #[test]
    fn random_points_round_trip() {
        let points = random_points(50);
        let encoded = points.iter().map(Point::to_line_protocol).collect::<Vec<_>>().join("\n");
        assert_eq!(parse(&encoded).unwrap(), points);
    }
}
