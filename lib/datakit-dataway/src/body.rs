use std::{io, ops::Range};

use bytes::Bytes;
use datakit_io::compression::{compress, gunzip, is_gzip, CompressionScheme};
use datakit_point::{lineproto, Category, Encoding, Point};

/// Default upper bound on the raw size of a body.
pub const MAX_KODO_BODY: usize = 10 * 1024 * 1024;

/// A request body: a batch of encoded points, possibly gzip-compressed.
#[derive(Clone, Debug)]
pub struct Body {
    category: Category,
    encoding: Encoding,
    buf: Bytes,
    raw_len: usize,
    npts: usize,
    gzipped: bool,
    range: Range<usize>,
}

impl Body {
    async fn encode(category: Category, raw: Vec<u8>, npts: usize, gzip: bool, range: Range<usize>) -> io::Result<Self> {
        let raw_len = raw.len();
        let buf = if gzip {
            compress(CompressionScheme::gzip_default(), &raw).await?
        } else {
            raw
        };

        Ok(Self {
            category,
            encoding: Encoding::LineProtocol,
            buf: Bytes::from(buf),
            raw_len,
            npts,
            gzipped: gzip,
            range,
        })
    }

    /// Rebuilds a body from a cached payload.
    ///
    /// Compression is detected from the payload itself. The point count is recovered by decoding the points, since
    /// string fields may span several lines.
    ///
    /// # Errors
    ///
    /// If the payload looks compressed but cannot be decompressed, or does not hold valid points, an error is returned.
    pub async fn from_cached(category: Category, encoding: Encoding, payload: Bytes) -> io::Result<Self> {
        let gzipped = is_gzip(&payload);
        let (raw_len, npts) = if gzipped {
            let raw = gunzip(&payload).await?;
            (raw.len(), count_points(encoding, &raw)?)
        } else {
            (payload.len(), count_points(encoding, &payload)?)
        };

        Ok(Self {
            category,
            encoding,
            buf: payload,
            raw_len,
            npts,
            gzipped,
            range: 0..npts,
        })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Returns the bytes sent on the wire.
    pub fn buf(&self) -> &Bytes {
        &self.buf
    }

    /// Returns the size of the bytes sent on the wire.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the size of the encoded points before compression.
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// Returns the number of points in this body.
    pub fn npts(&self) -> usize {
        self.npts
    }

    pub fn is_gzipped(&self) -> bool {
        self.gzipped
    }

    /// Returns the indexes, in the input slice, of the points in this body.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }
}

fn count_points(encoding: Encoding, raw: &[u8]) -> io::Result<usize> {
    match encoding {
        Encoding::LineProtocol => {
            let text = std::str::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let points = lineproto::parse_with_default_time(text, 0)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(points.len())
        }
    }
}

/// Splits `points` into bodies whose raw size stays below `max_bytes`.
///
/// Lines are accumulated greedily, in order. Before a line would bring the current buffer (its separator included) to
/// `max_bytes` or more, the buffer is closed and a new one started. A single point that alone reaches `max_bytes` still
/// gets a body of its own.
///
/// # Errors
///
/// If compression fails, an error is returned.
pub async fn build_bodies(category: Category, points: &[Point], max_bytes: usize, gzip: bool) -> io::Result<Vec<Body>> {
    let mut bodies = Vec::new();
    let mut buf = Vec::new();
    let mut start = 0;

    for (idx, point) in points.iter().enumerate() {
        let line = point.to_line_protocol();

        if !buf.is_empty() && buf.len() + 1 + line.len() >= max_bytes {
            let raw = std::mem::take(&mut buf);
            bodies.push(Body::encode(category, raw, idx - start, gzip, start..idx).await?);
            start = idx;
        }

        if !buf.is_empty() {
            buf.push(b'\n');
        }
        buf.extend_from_slice(line.as_bytes());
    }

    if !buf.is_empty() {
        bodies.push(Body::encode(category, buf, points.len() - start, gzip, start..points.len()).await?);
    }

    Ok(bodies)
}

#[cfg(test)]
mod tests {
    use datakit_point::{lineproto, random::random_points};
    use proptest::prelude::*;

    use super::*;

    async fn decode(body: &Body) -> Vec<Point> {
        let raw = if body.is_gzipped() {
            gunzip(body.buf()).await.unwrap()
        } else {
            body.buf().to_vec()
        };
        lineproto::parse(std::str::from_utf8(&raw).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn single_body_when_under_limit() {
        let points = random_points(100);
        let bodies = build_bodies(Category::Logging, &points, MAX_KODO_BODY, true).await.unwrap();

        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].npts(), 100);
        assert_eq!(bodies[0].range(), 0..100);
        assert!(bodies[0].is_gzipped());
        assert!(is_gzip(bodies[0].buf()));
        assert_eq!(decode(&bodies[0]).await, points);
    }

    #[tokio::test]
    async fn split_preserves_order_and_points() {
        let points = random_points(500);
        for gzip in [true, false] {
            let bodies = build_bodies(Category::Metric, &points, 4096, gzip).await.unwrap();
            assert!(bodies.len() > 1);

            let mut decoded = Vec::new();
            let mut next = 0;
            for body in &bodies {
                assert_eq!(body.range().start, next);
                next = body.range().end;

                let pts = decode(body).await;
                assert_eq!(pts.len(), body.npts());
                decoded.extend(pts);
            }

            assert_eq!(next, points.len());
            assert_eq!(decoded, points);
        }
    }

    #[tokio::test]
    async fn raw_size_stays_below_limit() {
        let points = random_points(300);
        for max_bytes in [512, 1000, 4096, 64 * 1024] {
            let bodies = build_bodies(Category::Logging, &points, max_bytes, false).await.unwrap();
            for body in &bodies {
                assert!(
                    body.raw_len() < max_bytes,
                    "body of {} bytes with limit {}",
                    body.raw_len(),
                    max_bytes
                );
                assert_eq!(body.raw_len(), body.len());
            }
        }
    }

    #[tokio::test]
    async fn oversized_point_gets_own_body() {
        let points = random_points(3);
        let bodies = build_bodies(Category::Logging, &points, 16, false).await.unwrap();

        assert_eq!(bodies.len(), 3);
        for (idx, body) in bodies.iter().enumerate() {
            assert_eq!(body.npts(), 1);
            assert_eq!(body.range(), idx..idx + 1);
        }
    }

    #[tokio::test]
    async fn no_points_no_bodies() {
        let bodies = build_bodies(Category::Logging, &[], MAX_KODO_BODY, true).await.unwrap();
        assert!(bodies.is_empty());
    }

    #[tokio::test]
    async fn rebuilt_from_cache() {
        let points = random_points(10);
        let original = build_bodies(Category::Logging, &points, MAX_KODO_BODY, true).await.unwrap();
        let cached = Body::from_cached(Category::Logging, Encoding::LineProtocol, original[0].buf().clone())
            .await
            .unwrap();

        assert!(cached.is_gzipped());
        assert_eq!(cached.npts(), 10);
        assert_eq!(cached.raw_len(), original[0].raw_len());

        let plain = Body::from_cached(Category::Logging, Encoding::LineProtocol, Bytes::from_static(b"a f=1i 1\nb f=2i 2\n"))
            .await
            .unwrap();
        assert!(!plain.is_gzipped());
        assert_eq!(plain.npts(), 2);
    }

    #[tokio::test]
    async fn multiline_strings_count_as_one_point() {
        let points = vec![
            Point::builder("syslog")
                .with_field("message", "line one\nline two\nline three")
                .with_time(1)
                .build()
                .unwrap(),
            Point::builder("syslog").with_field("message", "single").with_time(2).build().unwrap(),
        ];

        for gzip in [true, false] {
            let original = build_bodies(Category::Logging, &points, MAX_KODO_BODY, gzip).await.unwrap();
            assert_eq!(original.len(), 1);
            assert_eq!(original[0].npts(), 2);

            let cached = Body::from_cached(Category::Logging, Encoding::LineProtocol, original[0].buf().clone())
                .await
                .unwrap();
            assert_eq!(cached.npts(), 2);
        }
    }

    #[tokio::test]
    async fn corrupted_cache_payload() {
        let result = Body::from_cached(Category::Logging, Encoding::LineProtocol, Bytes::from_static(b"not points")).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn property_test_partition(npoints in 0usize..120, max_bytes in 32usize..8192) {
            let points = random_points(npoints);
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let bodies = rt.block_on(build_bodies(Category::Logging, &points, max_bytes, false)).unwrap();

            let mut next = 0;
            for body in &bodies {
                prop_assert_eq!(body.range().start, next);
                prop_assert_eq!(body.range().len(), body.npts());
                prop_assert!(body.npts() > 0);
                prop_assert!(body.raw_len() < max_bytes || body.npts() == 1);
                next = body.range().end;
            }
            prop_assert_eq!(next, points.len());
        }
    }
}
