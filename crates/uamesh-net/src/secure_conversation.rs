//! Secure-Conversation chunk framing and security headers
//!
//! Wire format per message chunk: 3-byte ASCII type tag (`OPN`, `MSG`,
//! `CLO`, `ERR`), 1-byte chunk marker (`F` final, `C` intermediate, `A`
//! abort), 4-byte LE size of the whole chunk, 4-byte LE secure-channel id,
//! then the chunk body.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use uamesh_core::buffer::Buffer;
use uamesh_core::builtin;
use uamesh_core::limits::CodecLimits;
use uamesh_core::status::{Result as UaResult, Status};
use uamesh_core::types::string::{ByteString, UaString};

use crate::crypto::CryptoProvider;

/// Secure-Conversation protocol version sent in OPN
pub const PROTOCOL_VERSION: u32 = 0;

/// Bytes before the chunk body: type tag, chunk marker, size, channel id
pub const CHUNK_HEADER_SIZE: usize = 12;

/// Symmetric security header: token id
pub const SYMMETRIC_SECURITY_HEADER_SIZE: usize = 4;

/// Sequence header: sequence number + request id
pub const SEQUENCE_HEADER_SIZE: usize = 8;

/// Upper bound accepted for one chunk on the wire
pub const MAX_CHUNK_SIZE: usize = 1 << 20;

/// Framing errors surfaced by the chunk codec
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("chunk too large: {0} bytes (max {MAX_CHUNK_SIZE})")]
    TooLarge(usize),
    #[error("malformed chunk header")]
    Malformed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for Status {
    fn from(err: FrameError) -> Status {
        match err {
            FrameError::TooLarge(_) => Status::OutOfMemory,
            FrameError::Malformed => Status::EncodingError,
            FrameError::Io(_) => Status::Closed,
        }
    }
}

/// The four Secure-Conversation message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    OpenSecureChannel,
    SecureMessage,
    CloseSecureChannel,
    Error,
}

impl MessageType {
    fn tag(self) -> &'static [u8; 3] {
        match self {
            MessageType::OpenSecureChannel => b"OPN",
            MessageType::SecureMessage => b"MSG",
            MessageType::CloseSecureChannel => b"CLO",
            MessageType::Error => b"ERR",
        }
    }

    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"OPN" => Some(MessageType::OpenSecureChannel),
            b"MSG" => Some(MessageType::SecureMessage),
            b"CLO" => Some(MessageType::CloseSecureChannel),
            b"ERR" => Some(MessageType::Error),
            _ => None,
        }
    }
}

/// Final, intermediate or abort marker of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Final,
    Intermediate,
    Abort,
}

impl ChunkKind {
    fn marker(self) -> u8 {
        match self {
            ChunkKind::Final => b'F',
            ChunkKind::Intermediate => b'C',
            ChunkKind::Abort => b'A',
        }
    }

    fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            b'F' => Some(ChunkKind::Final),
            b'C' => Some(ChunkKind::Intermediate),
            b'A' => Some(ChunkKind::Abort),
            _ => None,
        }
    }
}

/// Parsed chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub message_type: MessageType,
    pub chunk_kind: ChunkKind,
    pub channel_id: u32,
}

/// One framed chunk; `body` excludes the 12 header bytes
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub header: ChunkHeader,
    pub body: Vec<u8>,
}

impl RawChunk {
    pub fn new(
        message_type: MessageType,
        chunk_kind: ChunkKind,
        channel_id: u32,
        body: Vec<u8>,
    ) -> Self {
        Self {
            header: ChunkHeader {
                message_type,
                chunk_kind,
                channel_id,
            },
            body,
        }
    }

    /// Chunk bytes exactly as sent, header included. Signatures cover this.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CHUNK_HEADER_SIZE + self.body.len());
        out.extend_from_slice(self.header.message_type.tag());
        out.push(self.header.chunk_kind.marker());
        out.extend_from_slice(&((CHUNK_HEADER_SIZE + self.body.len()) as u32).to_le_bytes());
        out.extend_from_slice(&self.header.channel_id.to_le_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

/// Length-delimited codec for Secure-Conversation chunks
#[derive(Debug, Default)]
pub struct ChunkCodec;

impl Decoder for ChunkCodec {
    type Item = RawChunk;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < CHUNK_HEADER_SIZE {
            return Ok(None);
        }
        let size = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if size > MAX_CHUNK_SIZE {
            return Err(FrameError::TooLarge(size));
        }
        if size < CHUNK_HEADER_SIZE {
            return Err(FrameError::Malformed);
        }
        if src.len() < size {
            return Ok(None);
        }

        let message_type = MessageType::from_tag(&src[0..3]).ok_or(FrameError::Malformed)?;
        let chunk_kind = ChunkKind::from_marker(src[3]).ok_or(FrameError::Malformed)?;
        let channel_id = u32::from_le_bytes([src[8], src[9], src[10], src[11]]);
        src.advance(CHUNK_HEADER_SIZE);
        let body = src.split_to(size - CHUNK_HEADER_SIZE).to_vec();

        Ok(Some(RawChunk {
            header: ChunkHeader {
                message_type,
                chunk_kind,
                channel_id,
            },
            body,
        }))
    }
}

impl Encoder<RawChunk> for ChunkCodec {
    type Error = FrameError;

    fn encode(&mut self, item: RawChunk, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = CHUNK_HEADER_SIZE + item.body.len();
        if size > MAX_CHUNK_SIZE {
            return Err(FrameError::TooLarge(size));
        }
        dst.reserve(size);
        dst.put_slice(item.header.message_type.tag());
        dst.put_u8(item.header.chunk_kind.marker());
        dst.put_u32_le(size as u32);
        dst.put_u32_le(item.header.channel_id);
        dst.put_slice(&item.body);
        Ok(())
    }
}

/// Security header of an OPN chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsymmetricSecurityHeader {
    pub security_policy_uri: UaString,
    pub sender_certificate: ByteString,
    pub receiver_certificate_thumbprint: ByteString,
}

impl AsymmetricSecurityHeader {
    pub fn encode(&self, buf: &mut Buffer) -> UaResult<()> {
        builtin::encode_string(&self.security_policy_uri, buf)?;
        builtin::encode_byte_string(&self.sender_certificate, buf)?;
        builtin::encode_byte_string(&self.receiver_certificate_thumbprint, buf)
    }

    pub fn decode(buf: &mut Buffer, limits: &CodecLimits) -> UaResult<Self> {
        Ok(Self {
            security_policy_uri: builtin::decode_string(buf, limits)?,
            sender_certificate: builtin::decode_byte_string(buf, limits)?,
            receiver_certificate_thumbprint: builtin::decode_byte_string(buf, limits)?,
        })
    }
}

/// Sequence header present in every protected chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    pub sequence_number: u32,
    pub request_id: u32,
}

impl SequenceHeader {
    pub fn encode(&self, buf: &mut Buffer) -> UaResult<()> {
        builtin::encode_u32(self.sequence_number, buf)?;
        builtin::encode_u32(self.request_id, buf)
    }

    pub fn decode(buf: &mut Buffer) -> UaResult<Self> {
        Ok(Self {
            sequence_number: builtin::decode_u32(buf)?,
            request_id: builtin::decode_u32(buf)?,
        })
    }
}

/// Body of an `ERR` message and of an abort chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub error: u32,
    pub reason: UaString,
}

impl ErrorMessage {
    pub fn encode(&self, buf: &mut Buffer) -> UaResult<()> {
        builtin::encode_u32(self.error, buf)?;
        builtin::encode_string(&self.reason, buf)
    }

    pub fn decode(buf: &mut Buffer, limits: &CodecLimits) -> UaResult<Self> {
        Ok(Self {
            error: builtin::decode_u32(buf)?,
            reason: builtin::decode_string(buf, limits)?,
        })
    }
}

/// Largest message body a symmetric chunk can carry, once headers,
/// signature and cipher overhead are accounted for. Computed once after
/// the OPN response.
pub fn max_symmetric_body_size(send_buffer_size: usize, provider: &CryptoProvider) -> UaResult<usize> {
    let overhead = CHUNK_HEADER_SIZE
        + SYMMETRIC_SECURITY_HEADER_SIZE
        + SEQUENCE_HEADER_SIZE
        + provider.signature_size()
        + provider.encryption_overhead();
    if send_buffer_size <= overhead {
        return Err(Status::InvalidParameters);
    }
    Ok(send_buffer_size - overhead)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecurityPolicy;

    #[test]
    fn chunk_codec_roundtrip() {
        let mut codec = ChunkCodec;
        let chunk = RawChunk::new(
            MessageType::SecureMessage,
            ChunkKind::Final,
            77,
            vec![1, 2, 3, 4, 5],
        );

        let mut wire = BytesMut::new();
        codec.encode(chunk.clone(), &mut wire).unwrap();
        assert_eq!(&wire[..4], b"MSGF");

        let decoded = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded.header, chunk.header);
        assert_eq!(decoded.body, chunk.body);
        assert!(wire.is_empty());
    }

    #[test]
    fn partial_header_waits_for_more() {
        let mut codec = ChunkCodec;
        let mut wire = BytesMut::from(&b"OPNF"[..]);
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn partial_body_waits_for_more() {
        let mut codec = ChunkCodec;
        let chunk = RawChunk::new(MessageType::OpenSecureChannel, ChunkKind::Final, 1, vec![0; 16]);
        let full = chunk.to_wire();
        let mut wire = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut codec = ChunkCodec;
        let mut wire = BytesMut::from(&b"XXXF\x0c\x00\x00\x00\x01\x00\x00\x00"[..]);
        assert!(codec.decode(&mut wire).is_err());
    }

    #[test]
    fn oversized_chunk_rejected() {
        let mut codec = ChunkCodec;
        let mut wire = BytesMut::from(&b"MSGF"[..]);
        wire.put_u32_le((MAX_CHUNK_SIZE + 1) as u32);
        wire.put_u32_le(1);
        assert!(matches!(
            codec.decode(&mut wire),
            Err(FrameError::TooLarge(_))
        ));
    }

    #[test]
    fn to_wire_matches_codec_output() {
        let mut codec = ChunkCodec;
        let chunk = RawChunk::new(MessageType::CloseSecureChannel, ChunkKind::Final, 5, vec![9; 3]);
        let mut wire = BytesMut::new();
        codec.encode(chunk.clone(), &mut wire).unwrap();
        assert_eq!(&wire[..], &chunk.to_wire()[..]);
    }

    #[test]
    fn asymmetric_header_roundtrip() {
        let limits = CodecLimits::default();
        let header = AsymmetricSecurityHeader {
            security_policy_uri: UaString::from(crate::crypto::POLICY_NONE_URI),
            sender_certificate: ByteString::null(),
            receiver_certificate_thumbprint: ByteString::null(),
        };
        let mut buf = Buffer::new(256);
        header.encode(&mut buf).unwrap();
        buf.set_position(0).unwrap();
        assert_eq!(
            AsymmetricSecurityHeader::decode(&mut buf, &limits).unwrap(),
            header
        );
    }

    #[test]
    fn max_body_size_accounts_for_overhead() {
        let none = CryptoProvider::new(SecurityPolicy::None);
        let secured = CryptoProvider::new(SecurityPolicy::ChaCha20Poly1305);
        let plain = max_symmetric_body_size(4096, &none).unwrap();
        let protected = max_symmetric_body_size(4096, &secured).unwrap();
        assert!(plain > protected);
        assert!(protected > 0 && protected < 4096);
        assert!(max_symmetric_body_size(10, &secured).is_err());
    }

    #[test]
    fn error_message_roundtrip() {
        let limits = CodecLimits::default();
        let msg = ErrorMessage {
            error: 0x8086_0000,
            reason: UaString::from("secure channel closed"),
        };
        let mut buf = Buffer::new(128);
        msg.encode(&mut buf).unwrap();
        buf.set_position(0).unwrap();
        assert_eq!(ErrorMessage::decode(&mut buf, &limits).unwrap(), msg);
    }
}
