//! ExtensionObject
//!
//! An Object body is an in-memory convenience: on the wire it is a
//! length-prefixed ByteString whose TypeId names the body's binary encoding
//! id. Decoding restores the Object form when the registry knows the type.

use crate::buffer::Buffer;
use crate::builtin;
use crate::codec::CodecCtx;
use crate::encodeable::Encodeable;
use crate::status::{Result, Status};
use crate::types::nodeid::{ExpandedNodeId, Identifier, NodeId};
use crate::types::string::{ByteString, XmlElement};

const ENCODING_NONE: u8 = 0x00;
const ENCODING_BYTE_STRING: u8 = 0x01;
const ENCODING_XML: u8 = 0x02;

#[derive(Debug)]
pub enum ExtensionObjectBody {
    None,
    ByteString(ByteString),
    Xml(XmlElement),
    Object(Box<dyn Encodeable>),
}

#[derive(Debug)]
pub struct ExtensionObject {
    pub type_id: ExpandedNodeId,
    pub body: ExtensionObjectBody,
}

impl Default for ExtensionObject {
    fn default() -> Self {
        Self::none()
    }
}

impl PartialEq for ExtensionObject {
    fn eq(&self, other: &Self) -> bool {
        if self.type_id != other.type_id {
            return false;
        }
        match (&self.body, &other.body) {
            (ExtensionObjectBody::None, ExtensionObjectBody::None) => true,
            (ExtensionObjectBody::ByteString(a), ExtensionObjectBody::ByteString(b)) => a == b,
            (ExtensionObjectBody::Xml(a), ExtensionObjectBody::Xml(b)) => a == b,
            (ExtensionObjectBody::Object(a), ExtensionObjectBody::Object(b)) => {
                a.eq_dyn(b.as_ref())
            }
            _ => false,
        }
    }
}

impl ExtensionObject {
    /// Null extension object: null TypeId, no body
    pub fn none() -> Self {
        Self {
            type_id: ExpandedNodeId::default(),
            body: ExtensionObjectBody::None,
        }
    }

    /// Wrap a registered structured value
    pub fn object(value: Box<dyn Encodeable>) -> Self {
        let desc = value.type_desc();
        Self {
            type_id: ExpandedNodeId::local(NodeId::numeric(0, desc.type_id)),
            body: ExtensionObjectBody::Object(value),
        }
    }

    pub fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        match &self.body {
            ExtensionObjectBody::None => {
                self.type_id.node_id.encode(buf)?;
                builtin::encode_u8(ENCODING_NONE, buf)
            }
            ExtensionObjectBody::ByteString(bytes) => {
                self.type_id.node_id.encode(buf)?;
                builtin::encode_u8(ENCODING_BYTE_STRING, buf)?;
                builtin::encode_byte_string(bytes, buf)
            }
            ExtensionObjectBody::Xml(xml) => {
                self.type_id.node_id.encode(buf)?;
                builtin::encode_u8(ENCODING_XML, buf)?;
                builtin::encode_byte_string(xml, buf)
            }
            ExtensionObjectBody::Object(value) => {
                let desc = value.type_desc();
                let namespace = ctx
                    .namespaces
                    .get_index(desc.namespace_uri)
                    .map_err(|_| Status::InvalidParameters)?;
                let type_id = NodeId::numeric(namespace, desc.binary_encoding_id);
                type_id.encode(buf)?;
                builtin::encode_u8(ENCODING_BYTE_STRING, buf)?;

                // Placeholder length, back-patched once the body is written
                let length_pos = buf.position();
                builtin::encode_i32(-1, buf)?;
                value.encode(buf, ctx)?;
                let end_pos = buf.position();
                let body_len = end_pos - (length_pos + 4);
                buf.set_position(length_pos)?;
                builtin::encode_i32(body_len as i32, buf)?;
                buf.set_position(end_pos)?;
                Ok(())
            }
        }
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        let node_id = NodeId::decode(buf, ctx.limits)?;
        let encoding = builtin::decode_u8(buf)?;
        let mut type_id = ExpandedNodeId::local(node_id);

        match encoding {
            ENCODING_NONE => Ok(Self {
                type_id,
                body: ExtensionObjectBody::None,
            }),
            ENCODING_XML => {
                let xml = builtin::decode_byte_string(buf, ctx.limits)?;
                Ok(Self {
                    type_id,
                    body: ExtensionObjectBody::Xml(xml),
                })
            }
            ENCODING_BYTE_STRING => {
                let desc = match &type_id.node_id.identifier {
                    Identifier::Numeric(id) => {
                        let ns_name = if type_id.node_id.namespace == 0 {
                            Some(None)
                        } else {
                            ctx.namespaces.get_name(type_id.node_id.namespace).map(Some)
                        };
                        ns_name.and_then(|name| ctx.types.get(name, *id))
                    }
                    _ => return Err(Status::EncodingError),
                };

                match desc {
                    Some(desc) => {
                        // Known type: decode the body structurally
                        let _body_len = builtin::decode_i32(buf)?;
                        let value = (desc.decode)(buf, ctx)?;
                        if let Some(uri) = desc.namespace_uri {
                            type_id.namespace_uri = uri.into();
                        }
                        Ok(Self {
                            type_id,
                            body: ExtensionObjectBody::Object(value),
                        })
                    }
                    None => {
                        // Unknown type: retain the raw bytes
                        tracing::debug!(type_id = %type_id.node_id, "extension object type not registered");
                        let bytes = builtin::decode_byte_string(buf, ctx.limits)?;
                        Ok(Self {
                            type_id,
                            body: ExtensionObjectBody::ByteString(bytes),
                        })
                    }
                }
            }
            _ => Err(Status::EncodingError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecConfig;
    use crate::messages::ChannelSecurityToken;

    #[test]
    fn none_roundtrip() {
        let config = CodecConfig::default();
        let obj = ExtensionObject::none();
        let mut buf = Buffer::new(64);
        obj.encode(&mut buf, &config.ctx()).unwrap();
        buf.set_position(0).unwrap();
        let decoded = ExtensionObject::decode(&mut buf, &config.ctx()).unwrap();
        assert_eq!(decoded, obj);
    }

    #[test]
    fn byte_string_body_roundtrip() {
        let config = CodecConfig::default();
        let obj = ExtensionObject {
            type_id: ExpandedNodeId::local(NodeId::numeric(4, 9999)),
            body: ExtensionObjectBody::ByteString(ByteString::from(&[1u8, 2, 3][..])),
        };
        let mut buf = Buffer::new(64);
        obj.encode(&mut buf, &config.ctx()).unwrap();
        buf.set_position(0).unwrap();
        let decoded = ExtensionObject::decode(&mut buf, &config.ctx()).unwrap();
        assert_eq!(decoded, obj);
    }

    #[test]
    fn object_body_roundtrips_through_registry() {
        let config = CodecConfig::default();
        let token = ChannelSecurityToken {
            channel_id: 42,
            token_id: 7,
            created_at: 1000,
            revised_lifetime: 60_000,
        };
        let obj = ExtensionObject::object(Box::new(token));
        let mut buf = Buffer::new(256);
        obj.encode(&mut buf, &config.ctx()).unwrap();
        buf.set_position(0).unwrap();
        let decoded = ExtensionObject::decode(&mut buf, &config.ctx()).unwrap();
        let ExtensionObjectBody::Object(value) = &decoded.body else {
            panic!("expected object body");
        };
        let decoded_token = value.downcast_ref::<ChannelSecurityToken>().unwrap();
        assert_eq!(decoded_token.channel_id, 42);
        assert_eq!(decoded_token.token_id, 7);
    }

    #[test]
    fn object_length_is_backpatched() {
        let config = CodecConfig::default();
        let token = ChannelSecurityToken {
            channel_id: 1,
            token_id: 2,
            created_at: 0,
            revised_lifetime: 0,
        };
        let obj = ExtensionObject::object(Box::new(token));
        let mut buf = Buffer::new(256);
        obj.encode(&mut buf, &config.ctx()).unwrap();
        // NodeId(4 bytes: FourBytes form) + encoding byte + i32 length + body (20 bytes)
        let bytes = buf.as_bytes();
        let length_offset = bytes.len() - 4 - 20;
        assert_eq!(
            &bytes[length_offset..length_offset + 4],
            &20i32.to_le_bytes()
        );
    }
}
