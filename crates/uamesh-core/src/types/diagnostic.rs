//! DiagnosticInfo with bounded recursion
//!
//! Seven optional fields, presence carried by an encoding byte. The inner
//! recursion is depth-limited: exceeding the limit is `EncodingError` on
//! encode and `OutOfMemory` on decode.

use crate::buffer::Buffer;
use crate::builtin;
use crate::limits::CodecLimits;
use crate::status::{Result, Status};
use crate::types::string::{StatusCode, UaString};

const HAS_SYMBOLIC_ID: u8 = 0x01;
const HAS_NAMESPACE_URI: u8 = 0x02;
const HAS_LOCALE: u8 = 0x04;
const HAS_LOCALIZED_TEXT: u8 = 0x08;
const HAS_ADDITIONAL_INFO: u8 = 0x10;
const HAS_INNER_STATUS_CODE: u8 = 0x20;
const HAS_INNER_DIAGNOSTIC_INFO: u8 = 0x40;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticInfo {
    pub symbolic_id: Option<i32>,
    pub namespace_uri: Option<i32>,
    pub locale: Option<i32>,
    pub localized_text: Option<i32>,
    pub additional_info: UaString,
    pub inner_status_code: Option<StatusCode>,
    pub inner: Option<Box<DiagnosticInfo>>,
}

impl DiagnosticInfo {
    fn mask(&self) -> u8 {
        let mut mask = 0;
        if self.symbolic_id.is_some() {
            mask |= HAS_SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            mask |= HAS_NAMESPACE_URI;
        }
        if self.locale.is_some() {
            mask |= HAS_LOCALE;
        }
        if self.localized_text.is_some() {
            mask |= HAS_LOCALIZED_TEXT;
        }
        if !self.additional_info.is_empty() {
            mask |= HAS_ADDITIONAL_INFO;
        }
        if self.inner_status_code.is_some() {
            mask |= HAS_INNER_STATUS_CODE;
        }
        if self.inner.is_some() {
            mask |= HAS_INNER_DIAGNOSTIC_INFO;
        }
        mask
    }

    pub fn encode(&self, buf: &mut Buffer, limits: &CodecLimits) -> Result<()> {
        self.encode_nested(buf, limits, 0)
    }

    fn encode_nested(&self, buf: &mut Buffer, limits: &CodecLimits, nested: u32) -> Result<()> {
        let mask = self.mask();
        builtin::encode_u8(mask, buf)?;
        if let Some(v) = self.symbolic_id {
            builtin::encode_i32(v, buf)?;
        }
        if let Some(v) = self.namespace_uri {
            builtin::encode_i32(v, buf)?;
        }
        if let Some(v) = self.locale {
            builtin::encode_i32(v, buf)?;
        }
        if let Some(v) = self.localized_text {
            builtin::encode_i32(v, buf)?;
        }
        if mask & HAS_ADDITIONAL_INFO != 0 {
            builtin::encode_string(&self.additional_info, buf)?;
        }
        if let Some(code) = self.inner_status_code {
            builtin::encode_u32(code.0, buf)?;
        }
        if let Some(inner) = &self.inner {
            if nested + 1 > limits.max_diag_info_nested_level {
                return Err(Status::EncodingError);
            }
            inner.encode_nested(buf, limits, nested + 1)?;
        }
        Ok(())
    }

    pub fn decode(buf: &mut Buffer, limits: &CodecLimits) -> Result<Self> {
        Self::decode_nested(buf, limits, 0)
    }

    fn decode_nested(buf: &mut Buffer, limits: &CodecLimits, nested: u32) -> Result<Self> {
        let mask = builtin::decode_u8(buf)?;
        let mut info = DiagnosticInfo::default();
        if mask & HAS_SYMBOLIC_ID != 0 {
            info.symbolic_id = Some(builtin::decode_i32(buf)?);
        }
        if mask & HAS_NAMESPACE_URI != 0 {
            info.namespace_uri = Some(builtin::decode_i32(buf)?);
        }
        if mask & HAS_LOCALE != 0 {
            info.locale = Some(builtin::decode_i32(buf)?);
        }
        if mask & HAS_LOCALIZED_TEXT != 0 {
            info.localized_text = Some(builtin::decode_i32(buf)?);
        }
        if mask & HAS_ADDITIONAL_INFO != 0 {
            info.additional_info = builtin::decode_string(buf, limits)?;
        }
        if mask & HAS_INNER_STATUS_CODE != 0 {
            info.inner_status_code = Some(StatusCode(builtin::decode_u32(buf)?));
        }
        if mask & HAS_INNER_DIAGNOSTIC_INFO != 0 {
            if nested + 1 > limits.max_diag_info_nested_level {
                return Err(Status::OutOfMemory);
            }
            info.inner = Some(Box::new(Self::decode_nested(buf, limits, nested + 1)?));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested(depth: u32) -> DiagnosticInfo {
        let mut info = DiagnosticInfo {
            symbolic_id: Some(7),
            ..DiagnosticInfo::default()
        };
        for _ in 0..depth {
            info = DiagnosticInfo {
                inner_status_code: Some(StatusCode::BAD_UNEXPECTED_ERROR),
                inner: Some(Box::new(info)),
                ..DiagnosticInfo::default()
            };
        }
        info
    }

    #[test]
    fn roundtrip_all_fields() {
        let limits = CodecLimits::default();
        let info = DiagnosticInfo {
            symbolic_id: Some(1),
            namespace_uri: Some(2),
            locale: Some(3),
            localized_text: Some(4),
            additional_info: UaString::from("context"),
            inner_status_code: Some(StatusCode::BAD_TIMEOUT),
            inner: Some(Box::new(DiagnosticInfo {
                symbolic_id: Some(9),
                ..DiagnosticInfo::default()
            })),
        };
        let mut buf = Buffer::new(256);
        info.encode(&mut buf, &limits).unwrap();
        buf.set_position(0).unwrap();
        assert_eq!(DiagnosticInfo::decode(&mut buf, &limits).unwrap(), info);
    }

    #[test]
    fn depth_at_limit_passes() {
        let limits = CodecLimits::default();
        let info = nested(limits.max_diag_info_nested_level);
        let mut buf = Buffer::new(1024);
        info.encode(&mut buf, &limits).unwrap();
        buf.set_position(0).unwrap();
        assert_eq!(DiagnosticInfo::decode(&mut buf, &limits).unwrap(), info);
    }

    #[test]
    fn depth_past_limit_fails_both_ways() {
        let limits = CodecLimits::default();
        let info = nested(limits.max_diag_info_nested_level + 1);
        let mut buf = Buffer::new(1024);
        assert_eq!(
            info.encode(&mut buf, &limits),
            Err(Status::EncodingError)
        );

        // Hand-build a wire form one level too deep
        let mut buf = Buffer::new(1024);
        let relaxed = CodecLimits {
            max_diag_info_nested_level: limits.max_diag_info_nested_level + 1,
            ..limits
        };
        info.encode(&mut buf, &relaxed).unwrap();
        buf.set_position(0).unwrap();
        assert_eq!(
            DiagnosticInfo::decode(&mut buf, &limits),
            Err(Status::OutOfMemory)
        );
    }
}
