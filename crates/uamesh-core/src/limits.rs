//! Configurable codec limits
//!
//! Decoders reject wire data exceeding these bounds with
//! [`Status::OutOfMemory`](crate::Status::OutOfMemory); encoders reject
//! excessive nesting with [`Status::EncodingError`](crate::Status::EncodingError).

/// Default maximum byte length of a decoded String or ByteString
pub const DEFAULT_MAX_STRING_LENGTH: i32 = 16 * 1024;

/// Default maximum element count of a decoded array (and matrix product)
pub const DEFAULT_MAX_ARRAY_LENGTH: i32 = 16 * 1024;

/// Default maximum Variant/DataValue mutual containment depth
pub const DEFAULT_MAX_VARIANT_NESTED_LEVEL: u32 = 5;

/// Default maximum DiagnosticInfo recursion depth
pub const DEFAULT_MAX_DIAG_INFO_NESTED_LEVEL: u32 = 5;

/// Bounds applied by the builtin and structured codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecLimits {
    /// Longest String/ByteString accepted on decode, in bytes
    pub max_string_length: i32,
    /// Longest array accepted on decode; also bounds matrix extents products
    pub max_array_length: i32,
    /// Deepest Variant/DataValue containment accepted on encode and decode
    pub max_variant_nested_level: u32,
    /// Deepest DiagnosticInfo recursion accepted on encode and decode
    pub max_diag_info_nested_level: u32,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            max_array_length: DEFAULT_MAX_ARRAY_LENGTH,
            max_variant_nested_level: DEFAULT_MAX_VARIANT_NESTED_LEVEL,
            max_diag_info_nested_level: DEFAULT_MAX_DIAG_INFO_NESTED_LEVEL,
        }
    }
}
