use bytes::Bytes;
use prost::Message;

use crate::body::Body;

/// Cached form of a body that failed to be delivered.
#[derive(Clone, PartialEq, Message)]
pub struct CacheData {
    #[prost(int32, tag = "1")]
    pub category: i32,

    #[prost(int32, tag = "2")]
    pub payload_type: i32,

    #[prost(bytes = "bytes", tag = "3")]
    pub payload: Bytes,
}

impl CacheData {
    /// Captures the payload of `body`, as sent on the wire.
    pub fn from_body(body: &Body) -> Self {
        Self {
            category: body.category().as_i32(),
            payload_type: body.encoding().as_i32(),
            payload: body.buf().clone(),
        }
    }

    /// Encodes this entry for the fail cache.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }
}

#[cfg(test)]
mod tests {
    use datakit_point::{Category, Encoding};

    use super::*;

    #[test]
    fn wire_layout() {
        let data = CacheData {
            category: Category::Logging.as_i32(),
            payload_type: Encoding::LineProtocol.as_i32(),
            payload: Bytes::from_static(b"abc"),
        };

        // payload_type is zero, so it is omitted.
        assert_eq!(data.to_bytes().as_ref(), &[0x08, 0x08, 0x1a, 0x03, b'a', b'b', b'c']);
        assert_eq!(CacheData::decode(data.to_bytes()).unwrap(), data);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(CacheData::decode(Bytes::from_static(&[0xff, 0xff, 0xff])).is_err());
    }
}
