//! Shared codec context and the generic array codec

use crate::buffer::Buffer;
use crate::builtin;
use crate::encodeable::EncodeableRegistry;
use crate::limits::CodecLimits;
use crate::namespace::NamespaceTable;
use crate::status::{Result, Status};

/// Borrowed view of everything the structured codec needs: limits for
/// bounded decoding, the namespace table and the encodeable-type registry
/// for ExtensionObject bodies
#[derive(Clone, Copy)]
pub struct CodecCtx<'a> {
    pub limits: &'a CodecLimits,
    pub namespaces: &'a NamespaceTable,
    pub types: &'a EncodeableRegistry,
}

/// Owning bundle of codec parameters, shared by a channel or scheduler
#[derive(Debug)]
pub struct CodecConfig {
    pub limits: CodecLimits,
    pub namespaces: NamespaceTable,
    pub types: EncodeableRegistry,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            limits: CodecLimits::default(),
            namespaces: NamespaceTable::default(),
            types: EncodeableRegistry::with_defaults(),
        }
    }
}

impl CodecConfig {
    pub fn ctx(&self) -> CodecCtx<'_> {
        CodecCtx {
            limits: &self.limits,
            namespaces: &self.namespaces,
            types: &self.types,
        }
    }
}

/// Write a length-prefixed array. A negative length never reaches the wire;
/// the caller guarantees `items.len()` fits an i32.
pub fn encode_array<T>(
    items: &[T],
    buf: &mut Buffer,
    mut encode: impl FnMut(&T, &mut Buffer) -> Result<()>,
) -> Result<()> {
    if items.len() > i32::MAX as usize {
        return Err(Status::EncodingError);
    }
    builtin::encode_i32(items.len() as i32, buf)?;
    for item in items {
        encode(item, buf)?;
    }
    Ok(())
}

/// Read a length-prefixed array. A length of -1 is normalized to an empty
/// array; a length above `max_array_length` is `OutOfMemory`. On a
/// mid-array failure the elements decoded so far are dropped.
pub fn decode_array<T>(
    buf: &mut Buffer,
    limits: &CodecLimits,
    mut decode: impl FnMut(&mut Buffer) -> Result<T>,
) -> Result<Vec<T>> {
    let length = builtin::decode_i32(buf)?;
    if length < 0 {
        return Ok(Vec::new());
    }
    if length > limits.max_array_length {
        return Err(Status::OutOfMemory);
    }
    let mut items = Vec::with_capacity(length as usize);
    for _ in 0..length {
        items.push(decode(buf)?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_roundtrip() {
        let limits = CodecLimits::default();
        let values = [10u32, 20, 30];
        let mut buf = Buffer::new(64);
        encode_array(&values, &mut buf, |v, b| builtin::encode_u32(*v, b)).unwrap();
        buf.set_position(0).unwrap();
        let decoded = decode_array(&mut buf, &limits, builtin::decode_u32).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn negative_length_is_empty() {
        let limits = CodecLimits::default();
        let mut buf = Buffer::new(8);
        builtin::encode_i32(-1, &mut buf).unwrap();
        buf.set_position(0).unwrap();
        let decoded = decode_array(&mut buf, &limits, builtin::decode_u32).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn length_limit() {
        let limits = CodecLimits {
            max_array_length: 2,
            ..CodecLimits::default()
        };
        let mut buf = Buffer::new(32);
        encode_array(&[1u8, 2, 3], &mut buf, |v, b| builtin::encode_u8(*v, b)).unwrap();
        buf.set_position(0).unwrap();
        assert_eq!(
            decode_array(&mut buf, &limits, builtin::decode_u8),
            Err(Status::OutOfMemory)
        );
    }

    #[test]
    fn failure_at_first_element_clears_nothing() {
        let limits = CodecLimits::default();
        let mut buf = Buffer::new(8);
        builtin::encode_i32(2, &mut buf).unwrap();
        // No element bytes follow: the first decode fails short
        buf.set_position(0).unwrap();
        assert_eq!(
            decode_array(&mut buf, &limits, builtin::decode_u32),
            Err(Status::EncodingError)
        );
    }
}
