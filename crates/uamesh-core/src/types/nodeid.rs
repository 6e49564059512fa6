//! NodeId and ExpandedNodeId
//!
//! The first wire byte carries the identifier form in its low four bits and
//! the ExpandedNodeId presence flags in the high bits. Writers always pick
//! the smallest adequate numeric form.

use crate::buffer::Buffer;
use crate::builtin;
use crate::limits::CodecLimits;
use crate::status::{Result, Status};
use crate::types::guid::Guid;
use crate::types::string::{ByteString, UaString};

const FORM_TWO_BYTES: u8 = 0x00;
const FORM_FOUR_BYTES: u8 = 0x01;
const FORM_NUMERIC: u8 = 0x02;
const FORM_STRING: u8 = 0x03;
const FORM_GUID: u8 = 0x04;
const FORM_BYTE_STRING: u8 = 0x05;

/// NamespaceUri follows the NodeId
pub const FLAG_NAMESPACE_URI: u8 = 0x80;
/// ServerIndex follows the NodeId (and the NamespaceUri if present)
pub const FLAG_SERVER_INDEX: u8 = 0x40;

/// Identifier payload of a NodeId
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u32),
    String(UaString),
    Guid(Box<Guid>),
    ByteString(ByteString),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl Default for NodeId {
    fn default() -> Self {
        Self::numeric(0, 0)
    }
}

impl NodeId {
    pub fn numeric(namespace: u16, id: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(id),
        }
    }

    pub fn string(namespace: u16, id: impl Into<UaString>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(id.into()),
        }
    }

    pub fn guid(namespace: u16, guid: Guid) -> Self {
        Self {
            namespace,
            identifier: Identifier::Guid(Box::new(guid)),
        }
    }

    pub fn byte_string(namespace: u16, id: ByteString) -> Self {
        Self {
            namespace,
            identifier: Identifier::ByteString(id),
        }
    }

    /// The null NodeId is ns=0, numeric 0
    pub fn is_null(&self) -> bool {
        self.namespace == 0 && matches!(self.identifier, Identifier::Numeric(0))
    }

    /// Smallest form able to carry this identifier
    fn wire_form(&self) -> u8 {
        match &self.identifier {
            Identifier::Numeric(id) => {
                if self.namespace == 0 && *id <= u8::MAX as u32 {
                    FORM_TWO_BYTES
                } else if self.namespace <= u8::MAX as u16 && *id <= u16::MAX as u32 {
                    FORM_FOUR_BYTES
                } else {
                    FORM_NUMERIC
                }
            }
            Identifier::String(_) => FORM_STRING,
            Identifier::Guid(_) => FORM_GUID,
            Identifier::ByteString(_) => FORM_BYTE_STRING,
        }
    }

    pub fn encode(&self, buf: &mut Buffer) -> Result<()> {
        self.encode_with_flags(buf, 0)
    }

    pub(crate) fn encode_with_flags(&self, buf: &mut Buffer, flags: u8) -> Result<()> {
        let form = self.wire_form();
        builtin::encode_u8(form | flags, buf)?;
        match (&self.identifier, form) {
            (Identifier::Numeric(id), FORM_TWO_BYTES) => builtin::encode_u8(*id as u8, buf),
            (Identifier::Numeric(id), FORM_FOUR_BYTES) => {
                builtin::encode_u8(self.namespace as u8, buf)?;
                builtin::encode_u16(*id as u16, buf)
            }
            (Identifier::Numeric(id), _) => {
                builtin::encode_u16(self.namespace, buf)?;
                builtin::encode_u32(*id, buf)
            }
            (Identifier::String(s), _) => {
                builtin::encode_u16(self.namespace, buf)?;
                builtin::encode_string(s, buf)
            }
            (Identifier::Guid(g), _) => {
                builtin::encode_u16(self.namespace, buf)?;
                g.encode(buf)
            }
            (Identifier::ByteString(b), _) => {
                builtin::encode_u16(self.namespace, buf)?;
                builtin::encode_byte_string(b, buf)
            }
        }
    }

    pub fn decode(buf: &mut Buffer, limits: &CodecLimits) -> Result<Self> {
        let (node_id, _) = Self::decode_with_flags(buf, limits)?;
        Ok(node_id)
    }

    pub(crate) fn decode_with_flags(buf: &mut Buffer, limits: &CodecLimits) -> Result<(Self, u8)> {
        let encoding = builtin::decode_u8(buf)?;
        let node_id = match encoding & 0x0F {
            FORM_TWO_BYTES => NodeId::numeric(0, builtin::decode_u8(buf)? as u32),
            FORM_FOUR_BYTES => {
                let namespace = builtin::decode_u8(buf)? as u16;
                let id = builtin::decode_u16(buf)? as u32;
                NodeId::numeric(namespace, id)
            }
            FORM_NUMERIC => {
                let namespace = builtin::decode_u16(buf)?;
                let id = builtin::decode_u32(buf)?;
                NodeId::numeric(namespace, id)
            }
            FORM_STRING => {
                let namespace = builtin::decode_u16(buf)?;
                let id = builtin::decode_string(buf, limits)?;
                NodeId {
                    namespace,
                    identifier: Identifier::String(id),
                }
            }
            FORM_GUID => {
                let namespace = builtin::decode_u16(buf)?;
                let guid = Guid::decode(buf)?;
                NodeId::guid(namespace, guid)
            }
            FORM_BYTE_STRING => {
                let namespace = builtin::decode_u16(buf)?;
                let id = builtin::decode_byte_string(buf, limits)?;
                NodeId {
                    namespace,
                    identifier: Identifier::ByteString(id),
                }
            }
            _ => return Err(Status::EncodingError),
        };
        Ok((node_id, encoding & 0xF0))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.identifier {
            Identifier::Numeric(id) => write!(f, "ns={};i={}", self.namespace, id),
            Identifier::String(s) => write!(f, "ns={};s={}", self.namespace, s),
            Identifier::Guid(g) => write!(f, "ns={};g={}", self.namespace, g),
            Identifier::ByteString(b) => write!(f, "ns={};b={}b", self.namespace, b.len()),
        }
    }
}

/// NodeId qualified by an optional namespace URI and server index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedNodeId {
    pub node_id: NodeId,
    pub namespace_uri: UaString,
    pub server_index: u32,
}

impl ExpandedNodeId {
    pub fn local(node_id: NodeId) -> Self {
        Self {
            node_id,
            namespace_uri: UaString::null(),
            server_index: 0,
        }
    }

    pub fn encode(&self, buf: &mut Buffer) -> Result<()> {
        let mut flags = 0;
        if !self.namespace_uri.is_empty() {
            flags |= FLAG_NAMESPACE_URI;
        }
        if self.server_index > 0 {
            flags |= FLAG_SERVER_INDEX;
        }
        self.node_id.encode_with_flags(buf, flags)?;
        if flags & FLAG_NAMESPACE_URI != 0 {
            builtin::encode_string(&self.namespace_uri, buf)?;
        }
        if flags & FLAG_SERVER_INDEX != 0 {
            builtin::encode_u32(self.server_index, buf)?;
        }
        Ok(())
    }

    pub fn decode(buf: &mut Buffer, limits: &CodecLimits) -> Result<Self> {
        let (node_id, flags) = NodeId::decode_with_flags(buf, limits)?;
        let namespace_uri = if flags & FLAG_NAMESPACE_URI != 0 {
            builtin::decode_string(buf, limits)?
        } else {
            UaString::null()
        };
        let server_index = if flags & FLAG_SERVER_INDEX != 0 {
            builtin::decode_u32(buf)?
        } else {
            0
        };
        Ok(Self {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(node_id: &NodeId) -> (NodeId, u32) {
        let limits = CodecLimits::default();
        let mut buf = Buffer::new(256);
        node_id.encode(&mut buf).unwrap();
        let encoded_len = buf.position();
        buf.set_position(0).unwrap();
        let decoded = NodeId::decode(&mut buf, &limits).unwrap();
        assert_eq!(buf.position(), encoded_len);
        (decoded, encoded_len)
    }

    #[test]
    fn two_byte_form() {
        let (decoded, len) = roundtrip(&NodeId::numeric(0, 42));
        assert_eq!(decoded, NodeId::numeric(0, 42));
        assert_eq!(len, 2);
    }

    #[test]
    fn four_byte_form() {
        let (decoded, len) = roundtrip(&NodeId::numeric(5, 300));
        assert_eq!(decoded, NodeId::numeric(5, 300));
        assert_eq!(len, 4);
    }

    #[test]
    fn numeric_form() {
        let (decoded, len) = roundtrip(&NodeId::numeric(300, 0x0001_0000));
        assert_eq!(decoded, NodeId::numeric(300, 0x0001_0000));
        assert_eq!(len, 7);
    }

    #[test]
    fn string_form() {
        let id = NodeId::string(1, "Boiler");
        let (decoded, _) = roundtrip(&id);
        assert_eq!(decoded, id);
    }

    #[test]
    fn guid_form() {
        let id = NodeId::guid(2, Guid::new(1, 2, 3, [4; 8]));
        let (decoded, len) = roundtrip(&id);
        assert_eq!(decoded, id);
        assert_eq!(len, 1 + 2 + 16);
    }

    #[test]
    fn byte_string_form() {
        let id = NodeId::byte_string(3, ByteString::from(&b"opaque"[..]));
        let (decoded, _) = roundtrip(&id);
        assert_eq!(decoded, id);
    }

    #[test]
    fn expanded_with_uri_and_server_index() {
        let limits = CodecLimits::default();
        let expanded = ExpandedNodeId {
            node_id: NodeId::numeric(0, 85),
            namespace_uri: UaString::from("urn:demo"),
            server_index: 7,
        };
        let mut buf = Buffer::new(64);
        expanded.encode(&mut buf).unwrap();
        // Flags ride the high bits of the first byte
        assert_eq!(
            buf.as_bytes()[0] & 0xF0,
            FLAG_NAMESPACE_URI | FLAG_SERVER_INDEX
        );
        buf.set_position(0).unwrap();
        assert_eq!(ExpandedNodeId::decode(&mut buf, &limits).unwrap(), expanded);
    }

    #[test]
    fn unknown_form_rejected() {
        let limits = CodecLimits::default();
        let mut buf = Buffer::from_bytes(&[0x0E]);
        assert_eq!(
            NodeId::decode(&mut buf, &limits),
            Err(Status::EncodingError)
        );
    }
}
