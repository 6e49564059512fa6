//! UADP network-message codec
//!
//! Layout: network-message header (version + flags, optional extended
//! flags, publisher id), optional group header, optional payload header
//! (dataset-writer ids), optional timestamp/picoseconds, optional security
//! header, dataset-message payload, trailing signature.
//!
//! The decoder resolves a security context per (token id, publisher id,
//! writer group id), verifies the signature over the whole message,
//! decrypts the payload in place and applies the per-(publisher, writer)
//! freshness rule before handing dataset messages to the caller.

use tracing::{debug, trace};

use uamesh_core::buffer::Buffer;
use uamesh_core::builtin;
use uamesh_core::codec::CodecCtx;
use uamesh_core::status::{Result, Status};
use uamesh_core::types::variant::Variant;

use crate::config::{PublisherId, SecurityMode};
use crate::crypto::{CryptoProvider, SymmetricKeySet, SYMMETRIC_SIGNATURE_SIZE};
use crate::security::{SubscriberSecurity, WriterTracker};

/// UADP protocol version written in the high nibble of the first byte
pub const UADP_VERSION: u8 = 1;

/// Bytes of message nonce carried in the security header
pub const MESSAGE_NONCE_LENGTH: usize = 8;

const FLAG_PUBLISHER_ID: u8 = 0x01;
const FLAG_GROUP_HEADER: u8 = 0x02;
const FLAG_PAYLOAD_HEADER: u8 = 0x04;
const FLAG_EXTENDED1: u8 = 0x08;

const EXT1_PUBLISHER_ID_TYPE_MASK: u8 = 0x07;
const EXT1_SECURITY: u8 = 0x10;
const EXT1_TIMESTAMP: u8 = 0x20;
const EXT1_PICOSECONDS: u8 = 0x40;

const GROUP_FLAG_WRITER_GROUP_ID: u8 = 0x01;
const GROUP_FLAG_GROUP_VERSION: u8 = 0x02;
const GROUP_FLAG_NETWORK_MESSAGE_NUMBER: u8 = 0x04;
const GROUP_FLAG_SEQUENCE_NUMBER: u8 = 0x08;

const SECURITY_FLAG_SIGNED: u8 = 0x01;
const SECURITY_FLAG_ENCRYPTED: u8 = 0x02;
const SECURITY_FLAG_FOOTER: u8 = 0x04;

const DSM_FLAG_VALID: u8 = 0x01;
const DSM_FIELD_ENCODING_MASK: u8 = 0x06;
const DSM_FIELD_ENCODING_VARIANT: u8 = 0x00;
const DSM_FLAG_SEQUENCE_NUMBER: u8 = 0x08;

/// Optional group header fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupHeader {
    pub writer_group_id: Option<u16>,
    pub group_version: Option<u32>,
    pub network_message_number: Option<u16>,
    pub sequence_number: Option<u16>,
}

/// One payload unit: dataset-writer id, optional sequence number, fields
#[derive(Debug, Default, PartialEq)]
pub struct DataSetMessage {
    pub writer_id: u16,
    pub sequence_number: Option<u16>,
    pub fields: Vec<Variant>,
}

/// Decoded or to-be-encoded network message
#[derive(Debug, Default, PartialEq)]
pub struct NetworkMessage {
    pub publisher_id: Option<PublisherId>,
    pub group_header: Option<GroupHeader>,
    pub timestamp: Option<i64>,
    pub picoseconds: Option<u16>,
    pub messages: Vec<DataSetMessage>,
}

/// Security material applied while encoding
pub struct SecurityParams<'a> {
    pub mode: SecurityMode,
    pub token_id: u32,
    pub message_nonce: [u8; MESSAGE_NONCE_LENGTH],
    pub keys: &'a SymmetricKeySet,
    pub provider: &'a CryptoProvider,
}

impl NetworkMessage {
    /// Serialize the message, signing and encrypting per `security`
    pub fn encode(&self, ctx: &CodecCtx, security: Option<&SecurityParams>) -> Result<Vec<u8>> {
        if self.messages.is_empty() || self.messages.len() > u8::MAX as usize {
            return Err(Status::InvalidParameters);
        }

        let mut buf = Buffer::new(1 << 16);

        let publisher_type = self.publisher_id.map(|id| match id {
            PublisherId::Byte(_) => 0u8,
            PublisherId::UInt16(_) => 1,
            PublisherId::UInt32(_) => 2,
            PublisherId::UInt64(_) => 3,
        });

        let security_enabled = security.map_or(false, |s| s.mode != SecurityMode::None);
        let mut ext1 = publisher_type.unwrap_or(0) & EXT1_PUBLISHER_ID_TYPE_MASK;
        if security_enabled {
            ext1 |= EXT1_SECURITY;
        }
        if self.timestamp.is_some() {
            ext1 |= EXT1_TIMESTAMP;
        }
        if self.picoseconds.is_some() {
            ext1 |= EXT1_PICOSECONDS;
        }

        let mut flags = 0u8;
        if self.publisher_id.is_some() {
            flags |= FLAG_PUBLISHER_ID;
        }
        if self.group_header.is_some() {
            flags |= FLAG_GROUP_HEADER;
        }
        flags |= FLAG_PAYLOAD_HEADER;
        if ext1 != 0 {
            flags |= FLAG_EXTENDED1;
        }

        builtin::encode_u8((UADP_VERSION << 4) | flags, &mut buf)?;
        if flags & FLAG_EXTENDED1 != 0 {
            builtin::encode_u8(ext1, &mut buf)?;
        }

        if let Some(publisher_id) = self.publisher_id {
            match publisher_id {
                PublisherId::Byte(v) => builtin::encode_u8(v, &mut buf)?,
                PublisherId::UInt16(v) => builtin::encode_u16(v, &mut buf)?,
                PublisherId::UInt32(v) => builtin::encode_u32(v, &mut buf)?,
                PublisherId::UInt64(v) => builtin::encode_u64(v, &mut buf)?,
            }
        }

        if let Some(group) = &self.group_header {
            let mut group_flags = 0u8;
            if group.writer_group_id.is_some() {
                group_flags |= GROUP_FLAG_WRITER_GROUP_ID;
            }
            if group.group_version.is_some() {
                group_flags |= GROUP_FLAG_GROUP_VERSION;
            }
            if group.network_message_number.is_some() {
                group_flags |= GROUP_FLAG_NETWORK_MESSAGE_NUMBER;
            }
            if group.sequence_number.is_some() {
                group_flags |= GROUP_FLAG_SEQUENCE_NUMBER;
            }
            builtin::encode_u8(group_flags, &mut buf)?;
            if let Some(v) = group.writer_group_id {
                builtin::encode_u16(v, &mut buf)?;
            }
            if let Some(v) = group.group_version {
                builtin::encode_u32(v, &mut buf)?;
            }
            if let Some(v) = group.network_message_number {
                builtin::encode_u16(v, &mut buf)?;
            }
            if let Some(v) = group.sequence_number {
                builtin::encode_u16(v, &mut buf)?;
            }
        }

        // Payload header: count then writer ids
        builtin::encode_u8(self.messages.len() as u8, &mut buf)?;
        for message in &self.messages {
            builtin::encode_u16(message.writer_id, &mut buf)?;
        }

        if let Some(v) = self.timestamp {
            builtin::encode_i64(v, &mut buf)?;
        }
        if let Some(v) = self.picoseconds {
            builtin::encode_u16(v, &mut buf)?;
        }

        let security = security.filter(|s| s.mode != SecurityMode::None);
        if let Some(security) = security {
            let mut security_flags = SECURITY_FLAG_SIGNED;
            if security.mode == SecurityMode::SignAndEncrypt {
                security_flags |= SECURITY_FLAG_ENCRYPTED;
            }
            builtin::encode_u8(security_flags, &mut buf)?;
            builtin::encode_u32(security.token_id, &mut buf)?;
            builtin::encode_u8(MESSAGE_NONCE_LENGTH as u8, &mut buf)?;
            buf.write(&security.message_nonce)?;
        }

        let payload_start = buf.position() as usize;

        // Message sizes precede the bodies when more than one is present
        let sizes_pos = buf.position() as usize;
        if self.messages.len() > 1 {
            for _ in &self.messages {
                builtin::encode_u16(0, &mut buf)?;
            }
        }
        let mut sizes = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            let start = buf.position();
            message.encode(&mut buf, ctx)?;
            sizes.push((buf.position() - start) as u16);
        }
        if self.messages.len() > 1 {
            let end = buf.position();
            buf.set_position(sizes_pos as u32)?;
            for size in &sizes {
                builtin::encode_u16(*size, &mut buf)?;
            }
            buf.set_position(end)?;
        }

        let mut bytes = buf.as_bytes().to_vec();

        if let Some(security) = security {
            if security.mode == SecurityMode::SignAndEncrypt {
                let (header, payload) = bytes.split_at(payload_start);
                let ciphertext = security.provider.symmetric_encrypt(
                    security.keys,
                    &security.message_nonce,
                    payload,
                    header,
                )?;
                bytes.truncate(payload_start);
                bytes.extend_from_slice(&ciphertext);
            }
            let signature = security
                .provider
                .symmetric_sign(&security.keys.sign_key, &bytes);
            bytes.extend_from_slice(&signature);
        }

        Ok(bytes)
    }

    /// Parse and authenticate a received datagram.
    ///
    /// Returns `Ok(None)` when the message carries a security header that
    /// resolves to no configured context: it is not addressed to this
    /// subscriber and is dropped silently. Dataset messages whose sequence
    /// number fails the freshness rule are dropped individually.
    pub fn decode(
        datagram: &[u8],
        ctx: &CodecCtx,
        security: &SubscriberSecurity,
        tracker: &mut WriterTracker,
    ) -> Result<Option<NetworkMessage>> {
        let mut buf = Buffer::from_bytes(datagram);

        let first = builtin::decode_u8(&mut buf)?;
        if first >> 4 != UADP_VERSION {
            return Err(Status::EncodingError);
        }
        let flags = first & 0x0F;
        let ext1 = if flags & FLAG_EXTENDED1 != 0 {
            builtin::decode_u8(&mut buf)?
        } else {
            0
        };

        let publisher_id = if flags & FLAG_PUBLISHER_ID != 0 {
            Some(match ext1 & EXT1_PUBLISHER_ID_TYPE_MASK {
                0 => PublisherId::Byte(builtin::decode_u8(&mut buf)?),
                1 => PublisherId::UInt16(builtin::decode_u16(&mut buf)?),
                2 => PublisherId::UInt32(builtin::decode_u32(&mut buf)?),
                3 => PublisherId::UInt64(builtin::decode_u64(&mut buf)?),
                _ => return Err(Status::NotSupported),
            })
        } else {
            None
        };

        let group_header = if flags & FLAG_GROUP_HEADER != 0 {
            let group_flags = builtin::decode_u8(&mut buf)?;
            let mut group = GroupHeader::default();
            if group_flags & GROUP_FLAG_WRITER_GROUP_ID != 0 {
                group.writer_group_id = Some(builtin::decode_u16(&mut buf)?);
            }
            if group_flags & GROUP_FLAG_GROUP_VERSION != 0 {
                group.group_version = Some(builtin::decode_u32(&mut buf)?);
            }
            if group_flags & GROUP_FLAG_NETWORK_MESSAGE_NUMBER != 0 {
                group.network_message_number = Some(builtin::decode_u16(&mut buf)?);
            }
            if group_flags & GROUP_FLAG_SEQUENCE_NUMBER != 0 {
                group.sequence_number = Some(builtin::decode_u16(&mut buf)?);
            }
            Some(group)
        } else {
            None
        };

        let writer_ids = if flags & FLAG_PAYLOAD_HEADER != 0 {
            let count = builtin::decode_u8(&mut buf)?;
            let mut ids = Vec::with_capacity(count as usize);
            for _ in 0..count {
                ids.push(builtin::decode_u16(&mut buf)?);
            }
            ids
        } else {
            Vec::new()
        };

        let timestamp = if ext1 & EXT1_TIMESTAMP != 0 {
            Some(builtin::decode_i64(&mut buf)?)
        } else {
            None
        };
        let picoseconds = if ext1 & EXT1_PICOSECONDS != 0 {
            Some(builtin::decode_u16(&mut buf)?)
        } else {
            None
        };

        let writer_group_id = group_header.and_then(|g| g.writer_group_id);

        // Authenticate and decrypt before touching the payload
        let mut plaintext_payload: Option<Vec<u8>> = None;
        let mut payload_end = datagram.len();

        if ext1 & EXT1_SECURITY != 0 {
            let security_flags = builtin::decode_u8(&mut buf)?;
            let token_id = builtin::decode_u32(&mut buf)?;
            let nonce_len = builtin::decode_u8(&mut buf)? as usize;
            let mut nonce = vec![0u8; nonce_len];
            buf.read(&mut nonce)?;
            if security_flags & SECURITY_FLAG_FOOTER != 0 {
                let _footer_size = builtin::decode_u16(&mut buf)?;
            }
            trace!(token_id, nonce = %hex::encode(&nonce), "security header");

            let (Some(publisher_id), Some(writer_group_id)) = (publisher_id, writer_group_id)
            else {
                trace!("secured message without publisher or group id, ignored");
                return Ok(None);
            };
            let Some(reader) = security.resolve(token_id, publisher_id, writer_group_id) else {
                trace!(
                    %publisher_id,
                    writer_group_id,
                    token_id,
                    "no security context, message not addressed to this subscriber"
                );
                return Ok(None);
            };

            let signed = security_flags & SECURITY_FLAG_SIGNED != 0;
            let encrypted = security_flags & SECURITY_FLAG_ENCRYPTED != 0;
            let mode_consistent = match reader.mode {
                SecurityMode::None => !signed && !encrypted,
                SecurityMode::Sign => signed && !encrypted,
                SecurityMode::SignAndEncrypt => signed && encrypted,
            };
            if !mode_consistent {
                return Err(Status::InvalidReceivedParameter);
            }

            if datagram.len() < SYMMETRIC_SIGNATURE_SIZE {
                return Err(Status::EncodingError);
            }
            payload_end = datagram.len() - SYMMETRIC_SIGNATURE_SIZE;
            let (message, signature) = datagram.split_at(payload_end);
            reader
                .provider
                .symmetric_verify(&reader.keys.sign_key, message, signature)?;

            if encrypted {
                let payload_start = buf.position() as usize;
                let header = &datagram[..payload_start];
                let ciphertext = &datagram[payload_start..payload_end];
                plaintext_payload = Some(reader.provider.symmetric_decrypt(
                    &reader.keys,
                    &nonce,
                    ciphertext,
                    header,
                )?);
            }
        } else if let (Some(publisher_id), Some(writer_group_id)) = (publisher_id, writer_group_id)
        {
            // A group configured for security must not accept plain messages
            if security
                .resolve(crate::config::SKS_DEFAULT_TOKEN_ID, publisher_id, writer_group_id)
                .is_some()
            {
                return Err(Status::InvalidReceivedParameter);
            }
        }

        // Continue in the decrypted payload when applicable
        let mut payload_buf;
        let payload = match plaintext_payload {
            Some(plaintext) => {
                payload_buf = Buffer::from_bytes(&plaintext);
                &mut payload_buf
            }
            None => {
                let start = buf.position() as usize;
                payload_buf = Buffer::from_bytes(&datagram[start..payload_end]);
                &mut payload_buf
            }
        };

        let count = if writer_ids.is_empty() { 1 } else { writer_ids.len() };
        if count > 1 {
            // Per-message sizes; bodies are decoded in order so the values
            // are read and dropped
            for _ in 0..count {
                let _size = builtin::decode_u16(payload)?;
            }
        }

        let mut messages = Vec::with_capacity(count);
        for index in 0..count {
            let writer_id = writer_ids.get(index).copied().unwrap_or(0);
            let message = DataSetMessage::decode(payload, ctx, writer_id)?;
            messages.push(message);
        }

        // Freshness: stale dataset messages are dropped one by one
        if let Some(publisher_id) = publisher_id {
            messages.retain(|message| match message.sequence_number {
                Some(sn) => {
                    let fresh = tracker.accept(publisher_id, message.writer_id, sn);
                    if !fresh {
                        debug!(
                            %publisher_id,
                            writer_id = message.writer_id,
                            sn,
                            "stale dataset message dropped"
                        );
                    }
                    fresh
                }
                None => true,
            });
        }

        Ok(Some(NetworkMessage {
            publisher_id,
            group_header,
            timestamp,
            picoseconds,
            messages,
        }))
    }
}

impl DataSetMessage {
    fn encode(&self, buf: &mut Buffer, ctx: &CodecCtx) -> Result<()> {
        let mut flags = DSM_FLAG_VALID | DSM_FIELD_ENCODING_VARIANT;
        if self.sequence_number.is_some() {
            flags |= DSM_FLAG_SEQUENCE_NUMBER;
        }
        builtin::encode_u8(flags, buf)?;
        if let Some(sn) = self.sequence_number {
            builtin::encode_u16(sn, buf)?;
        }
        if self.fields.len() > u16::MAX as usize {
            return Err(Status::InvalidParameters);
        }
        builtin::encode_u16(self.fields.len() as u16, buf)?;
        for field in &self.fields {
            field.encode(buf, ctx)?;
        }
        Ok(())
    }

    fn decode(buf: &mut Buffer, ctx: &CodecCtx, writer_id: u16) -> Result<Self> {
        let flags = builtin::decode_u8(buf)?;
        if flags & DSM_FLAG_VALID == 0 {
            return Err(Status::EncodingError);
        }
        if flags & DSM_FIELD_ENCODING_MASK != DSM_FIELD_ENCODING_VARIANT {
            return Err(Status::NotSupported);
        }
        let sequence_number = if flags & DSM_FLAG_SEQUENCE_NUMBER != 0 {
            Some(builtin::decode_u16(buf)?)
        } else {
            None
        };
        let field_count = builtin::decode_u16(buf)?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Variant::decode(buf, ctx)?);
        }
        Ok(Self {
            writer_id,
            sequence_number,
            fields,
        })
    }
}
