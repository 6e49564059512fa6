//! QualifiedName and LocalizedText

use crate::buffer::Buffer;
use crate::builtin;
use crate::limits::CodecLimits;
use crate::status::Result;
use crate::types::string::UaString;

/// Name qualified by a namespace index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualifiedName {
    pub namespace_index: u16,
    pub name: UaString,
}

impl QualifiedName {
    pub fn new(namespace_index: u16, name: impl Into<UaString>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
        }
    }

    pub fn encode(&self, buf: &mut Buffer) -> Result<()> {
        builtin::encode_u16(self.namespace_index, buf)?;
        builtin::encode_string(&self.name, buf)
    }

    pub fn decode(buf: &mut Buffer, limits: &CodecLimits) -> Result<Self> {
        let namespace_index = builtin::decode_u16(buf)?;
        let name = builtin::decode_string(buf, limits)?;
        Ok(Self {
            namespace_index,
            name,
        })
    }
}

const LOCALIZED_TEXT_LOCALE: u8 = 0x01;
const LOCALIZED_TEXT_TEXT: u8 = 0x02;

/// Human-readable text with an optional locale tag; absent fields are left
/// off the wire
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizedText {
    pub locale: UaString,
    pub text: UaString,
}

impl LocalizedText {
    pub fn new(locale: impl Into<UaString>, text: impl Into<UaString>) -> Self {
        Self {
            locale: locale.into(),
            text: text.into(),
        }
    }

    pub fn encode(&self, buf: &mut Buffer) -> Result<()> {
        let mut mask = 0;
        if !self.locale.is_empty() {
            mask |= LOCALIZED_TEXT_LOCALE;
        }
        if !self.text.is_empty() {
            mask |= LOCALIZED_TEXT_TEXT;
        }
        builtin::encode_u8(mask, buf)?;
        if mask & LOCALIZED_TEXT_LOCALE != 0 {
            builtin::encode_string(&self.locale, buf)?;
        }
        if mask & LOCALIZED_TEXT_TEXT != 0 {
            builtin::encode_string(&self.text, buf)?;
        }
        Ok(())
    }

    pub fn decode(buf: &mut Buffer, limits: &CodecLimits) -> Result<Self> {
        let mask = builtin::decode_u8(buf)?;
        let locale = if mask & LOCALIZED_TEXT_LOCALE != 0 {
            builtin::decode_string(buf, limits)?
        } else {
            UaString::null()
        };
        let text = if mask & LOCALIZED_TEXT_TEXT != 0 {
            builtin::decode_string(buf, limits)?
        } else {
            UaString::null()
        };
        Ok(Self { locale, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_roundtrip() {
        let limits = CodecLimits::default();
        let qname = QualifiedName::new(2, "Temperature");
        let mut buf = Buffer::new(64);
        qname.encode(&mut buf).unwrap();
        buf.set_position(0).unwrap();
        assert_eq!(QualifiedName::decode(&mut buf, &limits).unwrap(), qname);
    }

    #[test]
    fn localized_text_partial_fields() {
        let limits = CodecLimits::default();
        let text = LocalizedText {
            locale: UaString::null(),
            text: UaString::from("boiler online"),
        };
        let mut buf = Buffer::new(64);
        text.encode(&mut buf).unwrap();
        assert_eq!(buf.as_bytes()[0], LOCALIZED_TEXT_TEXT);
        buf.set_position(0).unwrap();
        assert_eq!(LocalizedText::decode(&mut buf, &limits).unwrap(), text);
    }
}
