/// Payload encoding of a batch of points.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Encoding {
    #[default]
    LineProtocol,
}

impl Encoding {
    /// Returns the persisted integer value of this encoding.
    pub const fn as_i32(self) -> i32 {
        match self {
            Encoding::LineProtocol => 0,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Encoding::LineProtocol),
            _ => None,
        }
    }

    /// Returns the HTTP content type for payloads in this encoding.
    pub const fn content_type(self) -> &'static str {
        match self {
            Encoding::LineProtocol => "application/line-protocol",
        }
    }
}
