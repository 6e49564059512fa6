//! OPC UA service messages used by the secure channel
//!
//! Each message carries its registry descriptor; on the wire a message body
//! is the NodeId of its binary encoding id followed by the struct fields.

use std::any::Any;

use crate::buffer::Buffer;
use crate::builtin::{self, DateTime};
use crate::codec::{self, CodecCtx};
use crate::encodeable::{Encodeable, EncodeableType};
use crate::status::{Result, Status};
use crate::types::diagnostic::DiagnosticInfo;
use crate::types::extension::ExtensionObject;
use crate::types::nodeid::{Identifier, NodeId};
use crate::types::qualified::QualifiedName;
use crate::types::string::{ByteString, StatusCode, UaString};
use crate::types::variant::DataValue;

/// Message security mode, encoded as Int32
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageSecurityMode {
    #[default]
    Invalid,
    None,
    Sign,
    SignAndEncrypt,
}

impl MessageSecurityMode {
    pub fn encode(self, buf: &mut Buffer) -> Result<()> {
        builtin::encode_i32(self as i32, buf)
    }

    pub fn decode(buf: &mut Buffer) -> Result<Self> {
        match builtin::decode_i32(buf)? {
            0 => Ok(Self::Invalid),
            1 => Ok(Self::None),
            2 => Ok(Self::Sign),
            3 => Ok(Self::SignAndEncrypt),
            _ => Err(Status::EncodingError),
        }
    }
}

/// OPN request kind, encoded as Int32
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecurityTokenRequestType {
    #[default]
    Issue,
    Renew,
}

impl SecurityTokenRequestType {
    pub fn encode(self, buf: &mut Buffer) -> Result<()> {
        builtin::encode_i32(self as i32, buf)
    }

    pub fn decode(buf: &mut Buffer) -> Result<Self> {
        match builtin::decode_i32(buf)? {
            0 => Ok(Self::Issue),
            1 => Ok(Self::Renew),
            _ => Err(Status::EncodingError),
        }
    }
}

macro_rules! impl_encodeable {
    ($ty:ident) => {
        impl Encodeable for $ty {
            fn type_desc(&self) -> &'static EncodeableType {
                &$ty::TYPE
            }

            fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
                $ty::encode(self, buf, ctx)
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn eq_dyn(&self, other: &dyn Encodeable) -> bool {
                other.as_any().downcast_ref::<$ty>() == Some(self)
            }
        }

        impl $ty {
            fn decode_boxed(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Box<dyn Encodeable>> {
                Ok(Box::new(Self::decode(buf, ctx)?))
            }
        }
    };
}

/// Common header of every service request
#[derive(Debug, Default, PartialEq)]
pub struct RequestHeader {
    pub authentication_token: NodeId,
    pub timestamp: DateTime,
    pub request_handle: u32,
    pub return_diagnostics: u32,
    pub audit_entry_id: UaString,
    pub timeout_hint: u32,
    pub additional_header: ExtensionObject,
}

impl RequestHeader {
    pub const TYPE: EncodeableType = EncodeableType {
        name: "RequestHeader",
        type_id: 389,
        binary_encoding_id: 391,
        xml_encoding_id: 390,
        namespace_uri: None,
        decode: RequestHeader::decode_boxed,
    };

    pub fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        self.authentication_token.encode(buf)?;
        builtin::encode_datetime(self.timestamp, buf)?;
        builtin::encode_u32(self.request_handle, buf)?;
        builtin::encode_u32(self.return_diagnostics, buf)?;
        builtin::encode_string(&self.audit_entry_id, buf)?;
        builtin::encode_u32(self.timeout_hint, buf)?;
        self.additional_header.encode(buf, ctx)
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        Ok(Self {
            authentication_token: NodeId::decode(buf, ctx.limits)?,
            timestamp: builtin::decode_datetime(buf)?,
            request_handle: builtin::decode_u32(buf)?,
            return_diagnostics: builtin::decode_u32(buf)?,
            audit_entry_id: builtin::decode_string(buf, ctx.limits)?,
            timeout_hint: builtin::decode_u32(buf)?,
            additional_header: ExtensionObject::decode(buf, ctx)?,
        })
    }
}

impl_encodeable!(RequestHeader);

/// Common header of every service response
#[derive(Debug, Default, PartialEq)]
pub struct ResponseHeader {
    pub timestamp: DateTime,
    pub request_handle: u32,
    pub service_result: StatusCode,
    pub service_diagnostics: DiagnosticInfo,
    pub string_table: Vec<UaString>,
    pub additional_header: ExtensionObject,
}

impl ResponseHeader {
    pub const TYPE: EncodeableType = EncodeableType {
        name: "ResponseHeader",
        type_id: 392,
        binary_encoding_id: 394,
        xml_encoding_id: 393,
        namespace_uri: None,
        decode: ResponseHeader::decode_boxed,
    };

    pub fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        builtin::encode_datetime(self.timestamp, buf)?;
        builtin::encode_u32(self.request_handle, buf)?;
        builtin::encode_u32(self.service_result.0, buf)?;
        self.service_diagnostics.encode(buf, ctx.limits)?;
        codec::encode_array(&self.string_table, buf, builtin::encode_string)?;
        self.additional_header.encode(buf, ctx)
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        Ok(Self {
            timestamp: builtin::decode_datetime(buf)?,
            request_handle: builtin::decode_u32(buf)?,
            service_result: StatusCode(builtin::decode_u32(buf)?),
            service_diagnostics: DiagnosticInfo::decode(buf, ctx.limits)?,
            string_table: codec::decode_array(buf, ctx.limits, |b| {
                builtin::decode_string(b, ctx.limits)
            })?,
            additional_header: ExtensionObject::decode(buf, ctx)?,
        })
    }
}

impl_encodeable!(ResponseHeader);

/// Security token issued by an OPN response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSecurityToken {
    pub channel_id: u32,
    pub token_id: u32,
    pub created_at: DateTime,
    pub revised_lifetime: u32,
}

impl ChannelSecurityToken {
    pub const TYPE: EncodeableType = EncodeableType {
        name: "ChannelSecurityToken",
        type_id: 441,
        binary_encoding_id: 443,
        xml_encoding_id: 442,
        namespace_uri: None,
        decode: ChannelSecurityToken::decode_boxed,
    };

    pub fn encode(&self, buf: &mut Buffer, _ctx: &CodecCtx) -> Result<()> {
        builtin::encode_u32(self.channel_id, buf)?;
        builtin::encode_u32(self.token_id, buf)?;
        builtin::encode_datetime(self.created_at, buf)?;
        builtin::encode_u32(self.revised_lifetime, buf)
    }

    pub fn decode(buf: &mut Buffer, _ctx: &CodecCtx) -> Result<Self> {
        Ok(Self {
            channel_id: builtin::decode_u32(buf)?,
            token_id: builtin::decode_u32(buf)?,
            created_at: builtin::decode_datetime(buf)?,
            revised_lifetime: builtin::decode_u32(buf)?,
        })
    }
}

impl_encodeable!(ChannelSecurityToken);

#[derive(Debug, Default, PartialEq)]
pub struct OpenSecureChannelRequest {
    pub request_header: RequestHeader,
    pub client_protocol_version: u32,
    pub request_type: SecurityTokenRequestType,
    pub security_mode: MessageSecurityMode,
    pub client_nonce: ByteString,
    pub requested_lifetime: u32,
}

impl OpenSecureChannelRequest {
    pub const TYPE: EncodeableType = EncodeableType {
        name: "OpenSecureChannelRequest",
        type_id: 444,
        binary_encoding_id: 446,
        xml_encoding_id: 445,
        namespace_uri: None,
        decode: OpenSecureChannelRequest::decode_boxed,
    };

    pub fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        self.request_header.encode(buf, ctx)?;
        builtin::encode_u32(self.client_protocol_version, buf)?;
        self.request_type.encode(buf)?;
        self.security_mode.encode(buf)?;
        builtin::encode_byte_string(&self.client_nonce, buf)?;
        builtin::encode_u32(self.requested_lifetime, buf)
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(buf, ctx)?,
            client_protocol_version: builtin::decode_u32(buf)?,
            request_type: SecurityTokenRequestType::decode(buf)?,
            security_mode: MessageSecurityMode::decode(buf)?,
            client_nonce: builtin::decode_byte_string(buf, ctx.limits)?,
            requested_lifetime: builtin::decode_u32(buf)?,
        })
    }
}

impl_encodeable!(OpenSecureChannelRequest);

#[derive(Debug, Default, PartialEq)]
pub struct OpenSecureChannelResponse {
    pub response_header: ResponseHeader,
    pub server_protocol_version: u32,
    pub security_token: ChannelSecurityToken,
    pub server_nonce: ByteString,
}

impl OpenSecureChannelResponse {
    pub const TYPE: EncodeableType = EncodeableType {
        name: "OpenSecureChannelResponse",
        type_id: 447,
        binary_encoding_id: 449,
        xml_encoding_id: 448,
        namespace_uri: None,
        decode: OpenSecureChannelResponse::decode_boxed,
    };

    pub fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        self.response_header.encode(buf, ctx)?;
        builtin::encode_u32(self.server_protocol_version, buf)?;
        self.security_token.encode(buf, ctx)?;
        builtin::encode_byte_string(&self.server_nonce, buf)
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(buf, ctx)?,
            server_protocol_version: builtin::decode_u32(buf)?,
            security_token: ChannelSecurityToken::decode(buf, ctx)?,
            server_nonce: builtin::decode_byte_string(buf, ctx.limits)?,
        })
    }
}

impl_encodeable!(OpenSecureChannelResponse);

#[derive(Debug, Default, PartialEq)]
pub struct CloseSecureChannelRequest {
    pub request_header: RequestHeader,
}

impl CloseSecureChannelRequest {
    pub const TYPE: EncodeableType = EncodeableType {
        name: "CloseSecureChannelRequest",
        type_id: 450,
        binary_encoding_id: 452,
        xml_encoding_id: 451,
        namespace_uri: None,
        decode: CloseSecureChannelRequest::decode_boxed,
    };

    pub fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        self.request_header.encode(buf, ctx)
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(buf, ctx)?,
        })
    }
}

impl_encodeable!(CloseSecureChannelRequest);

/// Fault response standing in for any expected response type
#[derive(Debug, Default, PartialEq)]
pub struct ServiceFault {
    pub response_header: ResponseHeader,
}

impl ServiceFault {
    pub const TYPE: EncodeableType = EncodeableType {
        name: "ServiceFault",
        type_id: 395,
        binary_encoding_id: 397,
        xml_encoding_id: 396,
        namespace_uri: None,
        decode: ServiceFault::decode_boxed,
    };

    pub fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        self.response_header.encode(buf, ctx)
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(buf, ctx)?,
        })
    }
}

impl_encodeable!(ServiceFault);

#[derive(Debug, Default, PartialEq)]
pub struct ReadValueId {
    pub node_id: NodeId,
    pub attribute_id: u32,
    pub index_range: UaString,
    pub data_encoding: QualifiedName,
}

impl ReadValueId {
    pub const TYPE: EncodeableType = EncodeableType {
        name: "ReadValueId",
        type_id: 626,
        binary_encoding_id: 628,
        xml_encoding_id: 627,
        namespace_uri: None,
        decode: ReadValueId::decode_boxed,
    };

    pub fn encode(&self, buf: &mut Buffer, _ctx: &CodecCtx) -> Result<()> {
        self.node_id.encode(buf)?;
        builtin::encode_u32(self.attribute_id, buf)?;
        builtin::encode_string(&self.index_range, buf)?;
        self.data_encoding.encode(buf)
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        Ok(Self {
            node_id: NodeId::decode(buf, ctx.limits)?,
            attribute_id: builtin::decode_u32(buf)?,
            index_range: builtin::decode_string(buf, ctx.limits)?,
            data_encoding: QualifiedName::decode(buf, ctx.limits)?,
        })
    }
}

impl_encodeable!(ReadValueId);

#[derive(Debug, Default, PartialEq)]
pub struct ReadRequest {
    pub request_header: RequestHeader,
    pub max_age: f64,
    pub timestamps_to_return: i32,
    pub nodes_to_read: Vec<ReadValueId>,
}

impl ReadRequest {
    pub const TYPE: EncodeableType = EncodeableType {
        name: "ReadRequest",
        type_id: 629,
        binary_encoding_id: 631,
        xml_encoding_id: 630,
        namespace_uri: None,
        decode: ReadRequest::decode_boxed,
    };

    pub fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        self.request_header.encode(buf, ctx)?;
        builtin::encode_f64(self.max_age, buf)?;
        builtin::encode_i32(self.timestamps_to_return, buf)?;
        codec::encode_array(&self.nodes_to_read, buf, |e, b| e.encode(b, ctx))
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(buf, ctx)?,
            max_age: builtin::decode_f64(buf)?,
            timestamps_to_return: builtin::decode_i32(buf)?,
            nodes_to_read: codec::decode_array(buf, ctx.limits, |b| ReadValueId::decode(b, ctx))?,
        })
    }
}

impl_encodeable!(ReadRequest);

#[derive(Debug, Default, PartialEq)]
pub struct ReadResponse {
    pub response_header: ResponseHeader,
    pub results: Vec<DataValue>,
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl ReadResponse {
    pub const TYPE: EncodeableType = EncodeableType {
        name: "ReadResponse",
        type_id: 632,
        binary_encoding_id: 634,
        xml_encoding_id: 633,
        namespace_uri: None,
        decode: ReadResponse::decode_boxed,
    };

    pub fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        self.response_header.encode(buf, ctx)?;
        codec::encode_array(&self.results, buf, |e, b| e.encode(b, ctx))?;
        codec::encode_array(&self.diagnostic_infos, buf, |e, b| e.encode(b, ctx.limits))
    }

    pub fn decode(buf: &mut Buffer, ctx: &CodecCtx) -> Result<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(buf, ctx)?,
            results: codec::decode_array(buf, ctx.limits, |b| DataValue::decode(b, ctx))?,
            diagnostic_infos: codec::decode_array(buf, ctx.limits, |b| {
                DiagnosticInfo::decode(b, ctx.limits)
            })?,
        })
    }
}

impl_encodeable!(ReadResponse);

/// Descriptors registered by [`EncodeableRegistry::with_defaults`]
///
/// [`EncodeableRegistry::with_defaults`]: crate::encodeable::EncodeableRegistry::with_defaults
pub fn default_types() -> &'static [&'static EncodeableType] {
    &[
        &RequestHeader::TYPE,
        &ResponseHeader::TYPE,
        &ChannelSecurityToken::TYPE,
        &OpenSecureChannelRequest::TYPE,
        &OpenSecureChannelResponse::TYPE,
        &CloseSecureChannelRequest::TYPE,
        &ServiceFault::TYPE,
        &ReadValueId::TYPE,
        &ReadRequest::TYPE,
        &ReadResponse::TYPE,
    ]
}

/// Write a message body: the NodeId of the type's binary encoding id, then
/// the struct fields
pub fn encode_message(msg: &dyn Encodeable, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
    let desc = msg.type_desc();
    let namespace = ctx.namespaces.get_index(desc.namespace_uri)?;
    NodeId::numeric(namespace, desc.binary_encoding_id).encode(buf)?;
    msg.encode(buf, ctx)
}

/// Read the type NodeId of an incoming message and resolve it in the
/// registry
pub fn decode_message_type(buf: &mut Buffer, ctx: &CodecCtx) -> Result<&'static EncodeableType> {
    let node_id = NodeId::decode(buf, ctx.limits)?;
    let Identifier::Numeric(id) = node_id.identifier else {
        return Err(Status::EncodingError);
    };
    let ns_name = if node_id.namespace == 0 {
        None
    } else {
        match ctx.namespaces.get_name(node_id.namespace) {
            Some(name) => Some(name),
            None => return Err(Status::EncodingError),
        }
    };
    ctx.types.get(ns_name, id).ok_or(Status::EncodingError)
}

/// Decode a message body against the expected response type, also accepting
/// `fallback` (a ServiceFault in practice). Returns the resolved type and
/// the decoded value.
pub fn decode_message(
    buf: &mut Buffer,
    ctx: &CodecCtx,
    expected: &'static EncodeableType,
    fallback: &'static EncodeableType,
) -> Result<(&'static EncodeableType, Box<dyn Encodeable>)> {
    let received = decode_message_type(buf, ctx)?;
    if received != expected && received != fallback {
        return Err(Status::InvalidReceivedParameter);
    }
    let value = (received.decode)(buf, ctx)?;
    Ok((received, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecConfig;

    #[test]
    fn open_secure_channel_request_roundtrip() {
        let config = CodecConfig::default();
        let request = OpenSecureChannelRequest {
            request_header: RequestHeader {
                request_handle: 1,
                return_diagnostics: 1,
                audit_entry_id: UaString::from("audit1"),
                ..RequestHeader::default()
            },
            client_protocol_version: 0,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: MessageSecurityMode::None,
            client_nonce: ByteString::null(),
            requested_lifetime: 600_000,
        };
        let mut buf = Buffer::new(1024);
        encode_message(&request, &mut buf, &config.ctx()).unwrap();
        buf.set_position(0).unwrap();
        let (desc, value) = decode_message(
            &mut buf,
            &config.ctx(),
            &OpenSecureChannelRequest::TYPE,
            &ServiceFault::TYPE,
        )
        .unwrap();
        assert_eq!(desc, &OpenSecureChannelRequest::TYPE);
        let decoded = value.downcast_ref::<OpenSecureChannelRequest>().unwrap();
        assert_eq!(decoded, &request);
    }

    #[test]
    fn fault_accepted_in_place_of_response() {
        let config = CodecConfig::default();
        let fault = ServiceFault {
            response_header: ResponseHeader {
                request_handle: 9,
                service_result: StatusCode::BAD_TIMEOUT,
                ..ResponseHeader::default()
            },
        };
        let mut buf = Buffer::new(1024);
        encode_message(&fault, &mut buf, &config.ctx()).unwrap();
        buf.set_position(0).unwrap();
        let (desc, _) = decode_message(
            &mut buf,
            &config.ctx(),
            &ReadResponse::TYPE,
            &ServiceFault::TYPE,
        )
        .unwrap();
        assert_eq!(desc, &ServiceFault::TYPE);
    }

    #[test]
    fn unexpected_type_rejected() {
        let config = CodecConfig::default();
        let request = CloseSecureChannelRequest::default();
        let mut buf = Buffer::new(1024);
        encode_message(&request, &mut buf, &config.ctx()).unwrap();
        buf.set_position(0).unwrap();
        assert_eq!(
            decode_message(
                &mut buf,
                &config.ctx(),
                &ReadResponse::TYPE,
                &ServiceFault::TYPE,
            )
            .err(),
            Some(Status::InvalidReceivedParameter)
        );
    }

    #[test]
    fn read_request_roundtrip() {
        let config = CodecConfig::default();
        let request = ReadRequest {
            request_header: RequestHeader {
                request_handle: 3,
                ..RequestHeader::default()
            },
            max_age: 0.0,
            timestamps_to_return: 2,
            nodes_to_read: vec![ReadValueId {
                node_id: NodeId::string(1, "Boiler.Temperature"),
                attribute_id: 13,
                ..ReadValueId::default()
            }],
        };
        let mut buf = Buffer::new(1024);
        request.encode(&mut buf, &config.ctx()).unwrap();
        buf.set_position(0).unwrap();
        assert_eq!(ReadRequest::decode(&mut buf, &config.ctx()).unwrap(), request);
    }
}
