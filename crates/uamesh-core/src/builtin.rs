//! Byte-level codec for the primitive builtin types
//!
//! All integers, floats and lengths are little-endian on the wire. Encoders
//! fail with `EncodingError` on a short buffer; decoders fail with
//! `EncodingError` on a short read and `OutOfMemory` when a decoded length
//! exceeds the configured limits.

use crate::buffer::Buffer;
use crate::endian::{self, Endianness};
use crate::limits::CodecLimits;
use crate::status::{Result, Status};
use crate::types::string::{ByteString, UaString};

/// DateTime is an int64 tick count since the OPC UA epoch (1601-01-01 UTC)
pub type DateTime = i64;

fn wire2(v: u16) -> [u8; 2] {
    let v = match endian::integer_endianness() {
        Endianness::Big => endian::swap2(v),
        _ => v,
    };
    v.to_ne_bytes()
}

fn host2(raw: [u8; 2]) -> u16 {
    let v = u16::from_ne_bytes(raw);
    match endian::integer_endianness() {
        Endianness::Big => endian::swap2(v),
        _ => v,
    }
}

fn wire4(v: u32) -> [u8; 4] {
    let v = match endian::integer_endianness() {
        Endianness::Big => endian::swap4(v),
        _ => v,
    };
    v.to_ne_bytes()
}

fn host4(raw: [u8; 4]) -> u32 {
    let v = u32::from_ne_bytes(raw);
    match endian::integer_endianness() {
        Endianness::Big => endian::swap4(v),
        _ => v,
    }
}

fn wire8(v: u64) -> [u8; 8] {
    endian::normalize_int(v).to_ne_bytes()
}

fn host8(raw: [u8; 8]) -> u64 {
    endian::normalize_int(u64::from_ne_bytes(raw))
}

pub fn encode_u8(v: u8, buf: &mut Buffer) -> Result<()> {
    buf.write(&[v])?;
    Ok(())
}

pub fn decode_u8(buf: &mut Buffer) -> Result<u8> {
    Ok(buf.read_array::<1>()?[0])
}

pub fn encode_i8(v: i8, buf: &mut Buffer) -> Result<()> {
    encode_u8(v as u8, buf)
}

pub fn decode_i8(buf: &mut Buffer) -> Result<i8> {
    Ok(decode_u8(buf)? as i8)
}

/// A boolean is one byte, 0 or 1
pub fn encode_bool(v: bool, buf: &mut Buffer) -> Result<()> {
    encode_u8(u8::from(v), buf)
}

/// Any non-zero byte is normalized to `true`
pub fn decode_bool(buf: &mut Buffer) -> Result<bool> {
    Ok(decode_u8(buf)? != 0)
}

pub fn encode_u16(v: u16, buf: &mut Buffer) -> Result<()> {
    buf.write(&wire2(v))?;
    Ok(())
}

pub fn decode_u16(buf: &mut Buffer) -> Result<u16> {
    Ok(host2(buf.read_array()?))
}

pub fn encode_i16(v: i16, buf: &mut Buffer) -> Result<()> {
    encode_u16(v as u16, buf)
}

pub fn decode_i16(buf: &mut Buffer) -> Result<i16> {
    Ok(decode_u16(buf)? as i16)
}

pub fn encode_u32(v: u32, buf: &mut Buffer) -> Result<()> {
    buf.write(&wire4(v))?;
    Ok(())
}

pub fn decode_u32(buf: &mut Buffer) -> Result<u32> {
    Ok(host4(buf.read_array()?))
}

pub fn encode_i32(v: i32, buf: &mut Buffer) -> Result<()> {
    encode_u32(v as u32, buf)
}

pub fn decode_i32(buf: &mut Buffer) -> Result<i32> {
    Ok(decode_u32(buf)? as i32)
}

pub fn encode_u64(v: u64, buf: &mut Buffer) -> Result<()> {
    buf.write(&wire8(v))?;
    Ok(())
}

pub fn decode_u64(buf: &mut Buffer) -> Result<u64> {
    Ok(host8(buf.read_array()?))
}

pub fn encode_i64(v: i64, buf: &mut Buffer) -> Result<()> {
    encode_u64(v as u64, buf)
}

pub fn decode_i64(buf: &mut Buffer) -> Result<i64> {
    Ok(decode_u64(buf)? as i64)
}

pub fn encode_f32(v: f32, buf: &mut Buffer) -> Result<()> {
    let bits = endian::normalize_float_bits(v.to_bits());
    buf.write(&bits.to_ne_bytes())?;
    Ok(())
}

pub fn decode_f32(buf: &mut Buffer) -> Result<f32> {
    let bits = endian::normalize_float_bits(u32::from_ne_bytes(buf.read_array()?));
    Ok(f32::from_bits(bits))
}

pub fn encode_f64(v: f64, buf: &mut Buffer) -> Result<()> {
    let bits = endian::normalize_double_bits(v.to_bits());
    buf.write(&bits.to_ne_bytes())?;
    Ok(())
}

pub fn decode_f64(buf: &mut Buffer) -> Result<f64> {
    let bits = endian::normalize_double_bits(u64::from_ne_bytes(buf.read_array()?));
    Ok(f64::from_bits(bits))
}

pub fn encode_datetime(v: DateTime, buf: &mut Buffer) -> Result<()> {
    encode_i64(v, buf)
}

pub fn decode_datetime(buf: &mut Buffer) -> Result<DateTime> {
    decode_i64(buf)
}

/// Null encodes as length -1, empty as length 0, otherwise the bytes follow
/// the int32 length
pub fn encode_byte_string(v: &ByteString, buf: &mut Buffer) -> Result<()> {
    match v.as_bytes() {
        None => encode_i32(-1, buf),
        Some(bytes) => {
            if bytes.len() > i32::MAX as usize {
                return Err(Status::EncodingError);
            }
            encode_i32(bytes.len() as i32, buf)?;
            buf.write(bytes)?;
            Ok(())
        }
    }
}

/// A negative length is null; a length above `max_string_length` is
/// `OutOfMemory`
pub fn decode_byte_string(buf: &mut Buffer, limits: &CodecLimits) -> Result<ByteString> {
    let length = decode_i32(buf)?;
    if length < 0 {
        return Ok(ByteString::null());
    }
    if length > limits.max_string_length {
        return Err(Status::OutOfMemory);
    }
    let mut bytes = vec![0u8; length as usize];
    buf.read(&mut bytes)?;
    Ok(ByteString::from_vec(bytes))
}

pub fn encode_string(v: &UaString, buf: &mut Buffer) -> Result<()> {
    match v.as_str() {
        None => encode_i32(-1, buf),
        Some(s) => {
            if s.len() > i32::MAX as usize {
                return Err(Status::EncodingError);
            }
            encode_i32(s.len() as i32, buf)?;
            buf.write(s.as_bytes())?;
            Ok(())
        }
    }
}

pub fn decode_string(buf: &mut Buffer, limits: &CodecLimits) -> Result<UaString> {
    let length = decode_i32(buf)?;
    if length < 0 {
        return Ok(UaString::null());
    }
    if length > limits.max_string_length {
        return Err(Status::OutOfMemory);
    }
    let mut bytes = vec![0u8; length as usize];
    buf.read(&mut bytes)?;
    let s = String::from_utf8(bytes).map_err(|_| Status::EncodingError)?;
    Ok(UaString::from(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T, E, D>(value: T, encode: E, decode: D) -> T
    where
        E: Fn(T, &mut Buffer) -> Result<()>,
        D: Fn(&mut Buffer) -> Result<T>,
        T: Copy,
    {
        let mut buf = Buffer::new(64);
        encode(value, &mut buf).unwrap();
        buf.set_position(0).unwrap();
        decode(&mut buf).unwrap()
    }

    #[test]
    fn integer_roundtrips() {
        assert_eq!(roundtrip(0xAB_u8, encode_u8, decode_u8), 0xAB);
        assert_eq!(roundtrip(-2_i16, encode_i16, decode_i16), -2);
        assert_eq!(roundtrip(0xDEAD_u16, encode_u16, decode_u16), 0xDEAD);
        assert_eq!(roundtrip(-314_i32, encode_i32, decode_i32), -314);
        assert_eq!(
            roundtrip(0xDEAD_BEEF_u32, encode_u32, decode_u32),
            0xDEAD_BEEF
        );
        assert_eq!(roundtrip(i64::MIN, encode_i64, decode_i64), i64::MIN);
        assert_eq!(roundtrip(u64::MAX, encode_u64, decode_u64), u64::MAX);
    }

    #[test]
    fn integers_are_little_endian_on_wire() {
        let mut buf = Buffer::new(8);
        encode_u32(0x0102_0304, &mut buf).unwrap();
        assert_eq!(buf.as_bytes(), &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn float_roundtrips() {
        assert_eq!(roundtrip(1.5_f32, encode_f32, decode_f32), 1.5);
        assert_eq!(roundtrip(-2.25_f64, encode_f64, decode_f64), -2.25);
    }

    #[test]
    fn double_wire_format() {
        let mut buf = Buffer::new(8);
        encode_f64(-1.5, &mut buf).unwrap();
        assert_eq!(
            buf.as_bytes(),
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF8, 0xBF]
        );
    }

    #[test]
    fn bool_normalizes_nonzero() {
        let mut buf = Buffer::from_bytes(&[7]);
        assert!(decode_bool(&mut buf).unwrap());
    }

    #[test]
    fn null_string_roundtrip() {
        let limits = CodecLimits::default();
        let mut buf = Buffer::new(8);
        encode_string(&UaString::null(), &mut buf).unwrap();
        assert_eq!(buf.as_bytes(), &[0xFF, 0xFF, 0xFF, 0xFF]);
        buf.set_position(0).unwrap();
        let decoded = decode_string(&mut buf, &limits).unwrap();
        assert!(decoded.is_null());
    }

    #[test]
    fn empty_string_stays_distinct_from_null() {
        let limits = CodecLimits::default();
        let mut buf = Buffer::new(8);
        encode_string(&UaString::from(""), &mut buf).unwrap();
        buf.set_position(0).unwrap();
        let decoded = decode_string(&mut buf, &limits).unwrap();
        assert!(!decoded.is_null());
        assert_eq!(decoded.as_str(), Some(""));
    }

    #[test]
    fn string_length_limit() {
        let limits = CodecLimits {
            max_string_length: 4,
            ..CodecLimits::default()
        };
        let mut buf = Buffer::new(32);
        encode_string(&UaString::from("abcd"), &mut buf).unwrap();
        buf.set_position(0).unwrap();
        assert!(decode_string(&mut buf, &limits).is_ok());

        let mut buf = Buffer::new(32);
        encode_string(&UaString::from("abcde"), &mut buf).unwrap();
        buf.set_position(0).unwrap();
        assert_eq!(decode_string(&mut buf, &limits), Err(Status::OutOfMemory));
    }

    #[test]
    fn short_read_is_encoding_error() {
        let mut buf = Buffer::from_bytes(&[1, 2]);
        assert_eq!(decode_u32(&mut buf), Err(Status::EncodingError));
    }
}
