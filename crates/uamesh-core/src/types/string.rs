//! String, ByteString and StatusCode
//!
//! Null and empty are distinct in memory even though both are accepted from
//! the wire. A null value encodes its length as -1.

/// UTF-8 string that may be null
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UaString(Option<String>);

impl UaString {
    pub fn null() -> Self {
        Self(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// True for null and for the empty string
    pub fn is_empty(&self) -> bool {
        self.0.as_ref().map_or(true, |s| s.is_empty())
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<String> for UaString {
    fn from(s: String) -> Self {
        Self(Some(s))
    }
}

impl From<&str> for UaString {
    fn from(s: &str) -> Self {
        Self(Some(s.to_owned()))
    }
}

impl std::fmt::Display for UaString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or(""))
    }
}

/// Byte sequence that may be null
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteString(Option<Vec<u8>>);

impl ByteString {
    pub fn null() -> Self {
        Self(None)
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(Some(bytes))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, |b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.0.as_deref()
    }
}

impl From<&[u8]> for ByteString {
    fn from(bytes: &[u8]) -> Self {
        Self(Some(bytes.to_vec()))
    }
}

/// XmlElement shares the ByteString wire form
pub type XmlElement = ByteString;

/// 32-bit OPC UA status code; 0 is Good
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0);
    pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);
    pub const BAD_ENCODING_ERROR: StatusCode = StatusCode(0x8006_0000);
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    pub const BAD_CONNECTION_REJECTED: StatusCode = StatusCode(0x80AC_0000);
    pub const BAD_SECURE_CHANNEL_CLOSED: StatusCode = StatusCode(0x8086_0000);
    pub const BAD_REQUEST_INTERRUPTED: StatusCode = StatusCode(0x8084_0000);

    pub fn is_good(self) -> bool {
        self.0 == 0
    }

    /// High bit set means the operation failed
    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}
