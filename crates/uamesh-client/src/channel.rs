//! Secure-Channel client state machine
//!
//! Drives transport connect → OPN → symmetric messaging → disconnect.
//! All state transitions run as actions on the stack queue (one consumer,
//! FIFO); user callbacks are delivered on the application-callback queue so
//! they can never stall protocol work. A mutex guards the pending-request
//! map, the token and the key sets for cross-thread reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use uamesh_core::buffer::Buffer;
use uamesh_core::codec::CodecConfig;
use uamesh_core::encodeable::{Encodeable, EncodeableType};
use uamesh_core::messages::{
    self, ChannelSecurityToken, MessageSecurityMode, OpenSecureChannelRequest,
    OpenSecureChannelResponse, RequestHeader, SecurityTokenRequestType, ServiceFault,
};
use uamesh_core::status::{Result as UaResult, Status};
use uamesh_core::types::string::{ByteString, StatusCode, UaString};
use uamesh_net::crypto::{
    AsymmetricKey, Certificate, CryptoProvider, KeySetPair, SecurityPolicy,
    ASYMMETRIC_SIGNATURE_SIZE, SYMMETRIC_SIGNATURE_SIZE,
};
use uamesh_net::secure_conversation::{
    max_symmetric_body_size, AsymmetricSecurityHeader, ChunkKind, ErrorMessage, MessageType,
    RawChunk, SequenceHeader, CHUNK_HEADER_SIZE, PROTOCOL_VERSION, SEQUENCE_HEADER_SIZE,
    SYMMETRIC_SECURITY_HEADER_SIZE,
};

use crate::action_queue::{ActionQueue, ActionQueueManager};
use crate::transaction::TransactionEvent;
use crate::transport::{spawn_reader, spawn_writer, WriteOp};

/// Lifecycle of one client channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    ConnectingTransport,
    ConnectingSecure,
    Connected,
    Error,
}

/// Asynchronous events surfaced to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    ConnectionFailed,
    Disconnected,
    UnexpectedError,
}

/// Failure handed to a request callback
#[derive(Debug)]
pub struct RequestError {
    pub status: Status,
    /// Reason string carried by an abort chunk, when present
    pub reason: Option<String>,
}

impl RequestError {
    fn from_status(status: Status) -> Self {
        Self {
            status,
            reason: None,
        }
    }
}

/// Response delivery: the decoded response (or a ServiceFault) on success
pub type ResponseCallback =
    Box<dyn FnOnce(Result<Box<dyn Encodeable>, RequestError>) + Send + 'static>;

/// Connection event delivery
pub type ConnectionCallback = Arc<dyn Fn(ConnectionEvent, StatusCode) + Send + Sync>;

/// Channel parameters fixed at construction
pub struct ChannelConfig {
    pub security_mode: MessageSecurityMode,
    pub security_policy: SecurityPolicy,
    pub requested_lifetime_ms: u32,
    pub send_buffer_size: usize,
    /// Local identity; required when the mode is not None
    pub local_identity: Option<AsymmetricKey>,
    /// Peer identity; required when the mode is not None
    pub server_certificate: Option<Certificate>,
}

impl ChannelConfig {
    /// Mode None / policy None configuration
    pub fn unsecured() -> Self {
        Self {
            security_mode: MessageSecurityMode::None,
            security_policy: SecurityPolicy::None,
            requested_lifetime_ms: 3_600_000,
            send_buffer_size: 65_536,
            local_identity: None,
            server_certificate: None,
        }
    }

    fn validate(&self) -> UaResult<()> {
        match self.security_mode {
            MessageSecurityMode::Invalid => Err(Status::InvalidParameters),
            MessageSecurityMode::None => {
                if self.security_policy != SecurityPolicy::None {
                    return Err(Status::InvalidParameters);
                }
                Ok(())
            }
            MessageSecurityMode::Sign | MessageSecurityMode::SignAndEncrypt => {
                if self.security_policy == SecurityPolicy::None
                    || self.local_identity.is_none()
                    || self.server_certificate.is_none()
                {
                    return Err(Status::InvalidParameters);
                }
                Ok(())
            }
        }
    }
}

struct PendingRequest {
    response_type: &'static EncodeableType,
    timeout_hint_ms: u32,
    start: Instant,
    callback: Option<ResponseCallback>,
}

struct PartialMessage {
    request_id: u32,
    data: Vec<u8>,
}

struct ChannelCore {
    state: ChannelState,
    channel_id: u32,
    client_nonce: Vec<u8>,
    token: Option<ChannelSecurityToken>,
    keys: Option<KeySetPair>,
    /// Kept through a token rotation so late chunks still verify
    previous: Option<(u32, KeySetPair)>,
    last_request_id: u32,
    sequence_number_tx: u32,
    last_sequence_rx: Option<u32>,
    max_body_size: usize,
    pending: HashMap<u32, PendingRequest>,
    partial: Option<PartialMessage>,
    writer: Option<mpsc::Sender<WriteOp>>,
}

impl ChannelCore {
    fn new() -> Self {
        Self {
            state: ChannelState::Disconnected,
            channel_id: 0,
            client_nonce: Vec::new(),
            token: None,
            keys: None,
            previous: None,
            last_request_id: 0,
            sequence_number_tx: 0,
            last_sequence_rx: None,
            max_body_size: 0,
            pending: HashMap::new(),
            partial: None,
            writer: None,
        }
    }

    /// Request ids restart at 1 on every connection; 0 stays invalid
    fn next_request_id(&mut self) -> u32 {
        self.last_request_id = self.last_request_id.wrapping_add(1);
        if self.last_request_id == 0 {
            self.last_request_id = 1;
        }
        self.last_request_id
    }

    fn next_sequence_number(&mut self) -> u32 {
        self.sequence_number_tx = self.sequence_number_tx.wrapping_add(1);
        self.sequence_number_tx
    }
}

/// Strictly-greater modular comparison for chunk sequence numbers
fn is_sequence_newer(last: u32, received: u32) -> bool {
    received != last && received.wrapping_sub(last) < 0x8000_0000
}

struct ChannelShared {
    config: ChannelConfig,
    provider: CryptoProvider,
    codec: CodecConfig,
    core: Mutex<ChannelCore>,
    events: ConnectionCallback,
    stack_queue: ActionQueue,
    app_queue: ActionQueue,
    sweeper_started: std::sync::atomic::AtomicBool,
}

/// Client endpoint of one secure channel
pub struct SecureChannelClient {
    shared: Arc<ChannelShared>,
    stack_manager: ActionQueueManager,
    app_manager: ActionQueueManager,
}

impl SecureChannelClient {
    pub fn new(config: ChannelConfig, events: ConnectionCallback) -> UaResult<Self> {
        config.validate()?;
        let provider = CryptoProvider::new(config.security_policy);
        let stack_manager = ActionQueueManager::start("sc-stack", 64);
        let app_manager = ActionQueueManager::start("sc-app", 64);
        let shared = Arc::new(ChannelShared {
            config,
            provider,
            codec: CodecConfig::default(),
            core: Mutex::new(ChannelCore::new()),
            events,
            stack_queue: stack_manager.queue(),
            app_queue: app_manager.queue(),
            sweeper_started: std::sync::atomic::AtomicBool::new(false),
        });
        Ok(Self {
            shared,
            stack_manager,
            app_manager,
        })
    }

    pub fn state(&self) -> ChannelState {
        self.shared.core.lock().state
    }

    /// Security token stored after a successful OPN exchange
    pub fn security_token(&self) -> Option<ChannelSecurityToken> {
        self.shared.core.lock().token
    }

    /// Chunk body budget computed from the negotiated parameters
    pub fn max_body_size(&self) -> usize {
        self.shared.core.lock().max_body_size
    }

    /// Open the channel over an established transport stream
    pub async fn connect<S>(&self, stream: S) -> UaResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        {
            let mut core = self.shared.core.lock();
            if core.state != ChannelState::Disconnected {
                return Err(Status::InvalidState);
            }
            *core = ChannelCore::new();
            core.state = ChannelState::ConnectingTransport;
        }

        let (read_half, write_half) = tokio::io::split(stream);
        let (writer_tx, _writer_task) = spawn_writer(write_half, 64);
        self.shared.core.lock().writer = Some(writer_tx);

        let chunk_target = self.shared.clone();
        let chunk_queue = self.shared.stack_queue.clone();
        let closed_target = self.shared.clone();
        let closed_queue = self.shared.stack_queue.clone();
        spawn_reader(
            read_half,
            move |chunk| {
                let target = chunk_target.clone();
                if chunk_queue
                    .try_post("receive chunk", Box::new(move || target.on_chunk(chunk)))
                    .is_err()
                {
                    warn!("stack queue unavailable, chunk dropped");
                }
            },
            move |status| {
                let _ = closed_queue.try_post(
                    "transport down",
                    Box::new(move || closed_target.on_transport_down(status)),
                );
            },
        );

        self.spawn_timeout_sweep();

        // Transport is up: move to secure connection establishment
        let opener = self.shared.clone();
        self.shared
            .stack_queue
            .post("open secure channel", Box::new(move || opener.send_opn()))
            .await
    }

    /// Submit a service request; the callback fires on the application
    /// queue with the correlated response
    pub async fn send_request(
        &self,
        request: Box<dyn Encodeable>,
        response_type: &'static EncodeableType,
        timeout_hint_ms: u32,
        callback: ResponseCallback,
    ) -> UaResult<()> {
        let shared = self.shared.clone();
        self.shared
            .stack_queue
            .post(
                "send request",
                Box::new(move || {
                    shared.send_service_request(request, response_type, timeout_hint_ms, callback)
                }),
            )
            .await
    }

    /// Close the channel: CLO is sent when connected, every pending
    /// request fails with `Closed`
    pub async fn disconnect(&self) -> UaResult<()> {
        let shared = self.shared.clone();
        self.shared
            .stack_queue
            .post("disconnect", Box::new(move || shared.close()))
            .await
    }

    /// Stop both queue workers. The channel is unusable afterwards.
    pub async fn shutdown(self) {
        self.stack_manager.stop().await;
        self.app_manager.stop().await;
    }

    fn spawn_timeout_sweep(&self) {
        use std::sync::atomic::Ordering;
        if self.shared.sweeper_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        let queue = self.shared.stack_queue.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(500));
            loop {
                ticker.tick().await;
                let target = shared.clone();
                if queue
                    .post("timeout sweep", Box::new(move || target.sweep_timeouts()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }
}

impl ChannelShared {
    fn emit(&self, event: ConnectionEvent, status: StatusCode) {
        let events = self.events.clone();
        if self
            .app_queue
            .try_post("connection event", Box::new(move || events(event, status)))
            .is_err()
        {
            warn!(?event, "application queue unavailable, event dropped");
        }
    }

    fn deliver_response(&self, callback: ResponseCallback, result: Result<Box<dyn Encodeable>, RequestError>) {
        if self
            .app_queue
            .try_post("response", Box::new(move || callback(result)))
            .is_err()
        {
            warn!("application queue unavailable, response dropped");
        }
    }

    fn submit_write(
        &self,
        core: &mut ChannelCore,
        chunk: RawChunk,
        event: TransactionEvent,
        transaction_id: u32,
    ) -> UaResult<()> {
        let Some(writer) = &core.writer else {
            return Err(Status::InvalidState);
        };
        writer
            .try_send(WriteOp {
                chunk,
                event,
                transaction_id,
                done: None,
            })
            .map_err(|_| Status::WouldBlock)
    }

    // ----- OPN ------------------------------------------------------------

    fn send_opn(self: &Arc<Self>) {
        let status = self.try_send_opn();
        if let Err(status) = status {
            warn!(%status, "open secure channel request failed");
            self.fail_connection(status);
        }
    }

    fn try_send_opn(self: &Arc<Self>) -> UaResult<()> {
        let mut core = self.core.lock();
        if core.state != ChannelState::ConnectingTransport {
            return Err(Status::InvalidState);
        }
        core.state = ChannelState::ConnectingSecure;

        let request_id = core.next_request_id();
        let sequence_number = core.next_sequence_number();

        core.client_nonce = self.provider.generate_nonce();

        let request = OpenSecureChannelRequest {
            request_header: RequestHeader {
                request_handle: request_id,
                // SymbolicId diagnostics only
                return_diagnostics: 1,
                audit_entry_id: UaString::from("audit1"),
                timeout_hint: 0,
                ..RequestHeader::default()
            },
            client_protocol_version: PROTOCOL_VERSION,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: self.config.security_mode,
            client_nonce: if core.client_nonce.is_empty() {
                ByteString::null()
            } else {
                ByteString::from(core.client_nonce.as_slice())
            },
            requested_lifetime: self.config.requested_lifetime_ms,
        };

        let chunk = self.build_opn_chunk(&core, sequence_number, request_id, &request)?;
        if chunk.body.len() + CHUNK_HEADER_SIZE > self.config.send_buffer_size {
            // OPN must fit one chunk
            return Err(Status::EncodingError);
        }

        core.pending.insert(
            request_id,
            PendingRequest {
                response_type: &OpenSecureChannelResponse::TYPE,
                timeout_hint_ms: 0,
                start: Instant::now(),
                callback: None,
            },
        );

        self.submit_write(&mut core, chunk, TransactionEvent::StartEnd, request_id)?;
        info!(request_id, "open secure channel request sent");
        Ok(())
    }

    fn build_opn_chunk(
        &self,
        core: &ChannelCore,
        sequence_number: u32,
        request_id: u32,
        request: &OpenSecureChannelRequest,
    ) -> UaResult<RawChunk> {
        let secured = self.config.security_mode != MessageSecurityMode::None;

        let header = AsymmetricSecurityHeader {
            security_policy_uri: UaString::from(self.provider.policy().uri()),
            sender_certificate: if secured {
                let identity = self
                    .config
                    .local_identity
                    .as_ref()
                    .ok_or(Status::InvalidParameters)?;
                ByteString::from(&identity.certificate().to_bytes()[..])
            } else {
                ByteString::null()
            },
            receiver_certificate_thumbprint: if secured {
                let server = self
                    .config
                    .server_certificate
                    .ok_or(Status::InvalidParameters)?;
                ByteString::from(&server.thumbprint()[..])
            } else {
                ByteString::null()
            },
        };

        let mut body = Buffer::new(self.config.send_buffer_size as u32);
        header.encode(&mut body)?;

        let mut protected = Buffer::new(self.config.send_buffer_size as u32);
        SequenceHeader {
            sequence_number,
            request_id,
        }
        .encode(&mut protected)?;
        messages::encode_message(request, &mut protected, &self.codec.ctx())?;

        if secured {
            let identity = self
                .config
                .local_identity
                .as_ref()
                .ok_or(Status::InvalidParameters)?;
            let server = self
                .config
                .server_certificate
                .ok_or(Status::InvalidParameters)?;
            let mut plaintext = protected.as_bytes().to_vec();
            let signature = identity.sign(&plaintext);
            plaintext.extend_from_slice(&signature);
            let sealed = server.seal(&plaintext).map_err(Status::from)?;
            body.write(&sealed)?;
        } else {
            body.write(protected.as_bytes())?;
        }

        Ok(RawChunk::new(
            MessageType::OpenSecureChannel,
            ChunkKind::Final,
            core.channel_id,
            body.as_bytes().to_vec(),
        ))
    }

    fn on_opn_response(self: &Arc<Self>, chunk: RawChunk) -> UaResult<()> {
        if chunk.header.chunk_kind != ChunkKind::Final {
            // OPN never spans chunks
            return Err(Status::InvalidReceivedParameter);
        }

        let mut core = self.core.lock();
        if chunk.header.channel_id == 0 {
            return Err(Status::InvalidReceivedParameter);
        }
        if core.channel_id == 0 {
            core.channel_id = chunk.header.channel_id;
        } else if core.channel_id != chunk.header.channel_id {
            return Err(Status::InvalidReceivedParameter);
        }

        let mut buf = Buffer::from_bytes(&chunk.body);
        let header = AsymmetricSecurityHeader::decode(&mut buf, &self.codec.limits)?;
        let received_policy = header
            .security_policy_uri
            .as_str()
            .ok_or(Status::InvalidReceivedParameter)?;
        if SecurityPolicy::from_uri(received_policy).map_err(Status::from)? != self.provider.policy()
        {
            return Err(Status::InvalidReceivedParameter);
        }

        let secured = self.config.security_mode != MessageSecurityMode::None;
        let mut protected;
        if secured {
            let identity = self
                .config
                .local_identity
                .as_ref()
                .ok_or(Status::InvalidParameters)?;
            let sender_cert = Certificate::from_bytes(
                header
                    .sender_certificate
                    .as_bytes()
                    .ok_or(Status::InvalidReceivedParameter)?,
            )
            .map_err(Status::from)?;
            let remaining = buf.remaining() as usize;
            let mut sealed = vec![0u8; remaining];
            buf.read(&mut sealed)?;
            let plaintext = identity.open(&sealed).map_err(Status::from)?;
            if plaintext.len() < ASYMMETRIC_SIGNATURE_SIZE {
                return Err(Status::InvalidReceivedParameter);
            }
            let (message, signature) =
                plaintext.split_at(plaintext.len() - ASYMMETRIC_SIGNATURE_SIZE);
            sender_cert
                .verify(message, signature)
                .map_err(Status::from)?;
            protected = Buffer::from_bytes(message);
        } else {
            let remaining = buf.remaining() as usize;
            let mut plain = vec![0u8; remaining];
            buf.read(&mut plain)?;
            protected = Buffer::from_bytes(&plain);
        }

        let sequence = SequenceHeader::decode(&mut protected)?;
        if let Some(last) = core.last_sequence_rx {
            if !is_sequence_newer(last, sequence.sequence_number) {
                return Err(Status::InvalidReceivedParameter);
            }
        }
        core.last_sequence_rx = Some(sequence.sequence_number);

        let pending = core
            .pending
            .remove(&sequence.request_id)
            .ok_or(Status::GenericFailure)?;

        let (received_type, response) = messages::decode_message(
            &mut protected,
            &self.codec.ctx(),
            pending.response_type,
            &ServiceFault::TYPE,
        )?;
        if received_type == &ServiceFault::TYPE {
            return Err(Status::InvalidReceivedParameter);
        }
        let response = response
            .downcast_ref::<OpenSecureChannelResponse>()
            .ok_or(Status::GenericFailure)?;

        if response.server_protocol_version != PROTOCOL_VERSION {
            return Err(Status::InvalidReceivedParameter);
        }
        let token = response.security_token;
        if token.channel_id == 0 || token.channel_id != core.channel_id {
            return Err(Status::InvalidReceivedParameter);
        }

        if secured {
            // An empty server nonce cannot key the channel
            let server_nonce = response
                .server_nonce
                .as_bytes()
                .filter(|nonce| !nonce.is_empty())
                .ok_or(Status::InvalidReceivedParameter)?;
            let key_sets = self
                .provider
                .derive_key_sets_client(&core.client_nonce, server_nonce)
                .map_err(Status::from)?;
            core.keys = Some(key_sets);
        }

        core.token = Some(token);
        core.max_body_size = max_symmetric_body_size(self.config.send_buffer_size, &self.provider)?;
        core.state = ChannelState::Connected;
        info!(
            channel_id = token.channel_id,
            token_id = token.token_id,
            "secure channel connected"
        );
        drop(core);
        self.emit(ConnectionEvent::Connected, StatusCode::GOOD);
        Ok(())
    }

    // ----- Symmetric messaging --------------------------------------------

    fn send_service_request(
        self: &Arc<Self>,
        request: Box<dyn Encodeable>,
        response_type: &'static EncodeableType,
        timeout_hint_ms: u32,
        callback: ResponseCallback,
    ) {
        let mut core = self.core.lock();
        if core.state != ChannelState::Connected {
            drop(core);
            self.deliver_response(callback, Err(RequestError::from_status(Status::InvalidState)));
            return;
        }

        let request_id = core.next_request_id();
        let mut body = Buffer::new(1 << 20);
        if let Err(status) = messages::encode_message(request.as_ref(), &mut body, &self.codec.ctx())
        {
            drop(core);
            self.deliver_response(callback, Err(RequestError::from_status(status)));
            return;
        }

        core.pending.insert(
            request_id,
            PendingRequest {
                response_type,
                timeout_hint_ms,
                start: Instant::now(),
                callback: Some(callback),
            },
        );

        let status = self.send_chunked(&mut core, MessageType::SecureMessage, request_id, body.as_bytes());
        if let Err(status) = status {
            let pending = core.pending.remove(&request_id);
            drop(core);
            if let Some(PendingRequest {
                callback: Some(callback),
                ..
            }) = pending
            {
                self.deliver_response(callback, Err(RequestError::from_status(status)));
            }
        }
    }

    fn send_chunked(
        &self,
        core: &mut ChannelCore,
        message_type: MessageType,
        request_id: u32,
        body: &[u8],
    ) -> UaResult<()> {
        let max_body = core.max_body_size.max(1);
        let pieces: Vec<&[u8]> = body.chunks(max_body).collect();
        let count = pieces.len();

        for (index, piece) in pieces.iter().enumerate() {
            let last = index + 1 == count;
            let kind = if last {
                ChunkKind::Final
            } else {
                ChunkKind::Intermediate
            };
            let sequence_number = core.next_sequence_number();
            let chunk = self.build_symmetric_chunk(
                core,
                message_type,
                kind,
                sequence_number,
                request_id,
                piece,
            )?;
            let event = match (count, index, last) {
                (1, _, _) => TransactionEvent::StartEnd,
                (_, 0, _) => TransactionEvent::Start,
                (_, _, true) => TransactionEvent::End,
                _ => TransactionEvent::Continue,
            };
            self.submit_write(core, chunk, event, request_id)?;
        }
        debug!(request_id, chunks = count, "request written");
        Ok(())
    }

    /// Layout: token id | sequence header | body (encrypted with the
    /// preceding bytes as AAD under SignAndEncrypt) | signature over the
    /// whole chunk
    fn build_symmetric_chunk(
        &self,
        core: &ChannelCore,
        message_type: MessageType,
        kind: ChunkKind,
        sequence_number: u32,
        request_id: u32,
        piece: &[u8],
    ) -> UaResult<RawChunk> {
        let token = core.token.ok_or(Status::InvalidState)?;
        let mode = self.config.security_mode;
        let sign = mode != MessageSecurityMode::None;
        let encrypt = mode == MessageSecurityMode::SignAndEncrypt;

        let mut body_len = SYMMETRIC_SECURITY_HEADER_SIZE + SEQUENCE_HEADER_SIZE + piece.len();
        if encrypt {
            body_len += self.provider.encryption_overhead();
        }
        if sign {
            body_len += SYMMETRIC_SIGNATURE_SIZE;
        }

        let total = CHUNK_HEADER_SIZE + body_len;
        let mut wire = Vec::with_capacity(total);
        let tag: &[u8; 3] = match message_type {
            MessageType::SecureMessage => b"MSG",
            MessageType::CloseSecureChannel => b"CLO",
            _ => return Err(Status::InvalidParameters),
        };
        wire.extend_from_slice(tag);
        wire.push(match kind {
            ChunkKind::Final => b'F',
            ChunkKind::Intermediate => b'C',
            ChunkKind::Abort => b'A',
        });
        wire.extend_from_slice(&(total as u32).to_le_bytes());
        wire.extend_from_slice(&core.channel_id.to_le_bytes());
        wire.extend_from_slice(&token.token_id.to_le_bytes());
        wire.extend_from_slice(&sequence_number.to_le_bytes());
        wire.extend_from_slice(&request_id.to_le_bytes());

        if encrypt {
            let keys = core.keys.as_ref().ok_or(Status::InvalidState)?;
            let ciphertext = self
                .provider
                .symmetric_encrypt(
                    &keys.sender,
                    &sequence_number.to_le_bytes(),
                    piece,
                    &wire,
                )
                .map_err(Status::from)?;
            wire.extend_from_slice(&ciphertext);
        } else {
            wire.extend_from_slice(piece);
        }

        if sign {
            let keys = core.keys.as_ref().ok_or(Status::InvalidState)?;
            let signature = self.provider.symmetric_sign(&keys.sender.sign_key, &wire);
            wire.extend_from_slice(&signature);
        }

        Ok(RawChunk::new(
            message_type,
            kind,
            core.channel_id,
            wire[CHUNK_HEADER_SIZE..].to_vec(),
        ))
    }

    /// Verify, decrypt and strip the symmetric protection of a received
    /// chunk; returns the sequence header and the plaintext body
    fn open_symmetric_chunk(
        &self,
        core: &mut ChannelCore,
        chunk: &RawChunk,
    ) -> UaResult<(SequenceHeader, Vec<u8>)> {
        if chunk.header.channel_id != core.channel_id {
            return Err(Status::InvalidReceivedParameter);
        }
        if chunk.body.len() < SYMMETRIC_SECURITY_HEADER_SIZE + SEQUENCE_HEADER_SIZE {
            return Err(Status::EncodingError);
        }

        let body = &chunk.body;
        let token_id = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        let current = core.token.ok_or(Status::InvalidState)?;
        let keys = if token_id == current.token_id {
            core.keys.as_ref()
        } else {
            match &core.previous {
                Some((previous_token, previous_keys)) if *previous_token == token_id => {
                    Some(previous_keys)
                }
                _ => return Err(Status::InvalidReceivedParameter),
            }
        };

        let sequence = SequenceHeader {
            sequence_number: u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
            request_id: u32::from_le_bytes([body[8], body[9], body[10], body[11]]),
        };

        let mode = self.config.security_mode;
        let sign = mode != MessageSecurityMode::None;
        let encrypt = mode == MessageSecurityMode::SignAndEncrypt;

        let wire = chunk.to_wire();
        let mut payload_end = wire.len();

        if sign {
            let keys = keys.ok_or(Status::InvalidState)?;
            if wire.len() < SYMMETRIC_SIGNATURE_SIZE {
                return Err(Status::EncodingError);
            }
            payload_end = wire.len() - SYMMETRIC_SIGNATURE_SIZE;
            let (message, signature) = wire.split_at(payload_end);
            self.provider
                .symmetric_verify(&keys.receiver.sign_key, message, signature)
                .map_err(Status::from)?;
        }

        let payload_start = CHUNK_HEADER_SIZE + SYMMETRIC_SECURITY_HEADER_SIZE + SEQUENCE_HEADER_SIZE;
        let plaintext = if encrypt {
            let keys = keys.ok_or(Status::InvalidState)?;
            self.provider
                .symmetric_decrypt(
                    &keys.receiver,
                    &sequence.sequence_number.to_le_bytes(),
                    &wire[payload_start..payload_end],
                    &wire[..payload_start],
                )
                .map_err(Status::from)?
        } else {
            wire[payload_start..payload_end].to_vec()
        };

        if let Some(last) = core.last_sequence_rx {
            if !is_sequence_newer(last, sequence.sequence_number) {
                return Err(Status::InvalidReceivedParameter);
            }
        }
        core.last_sequence_rx = Some(sequence.sequence_number);

        Ok((sequence, plaintext))
    }

    fn on_secure_message(self: &Arc<Self>, chunk: RawChunk) -> UaResult<()> {
        let mut core = self.core.lock();
        if core.state != ChannelState::Connected {
            return Err(Status::InvalidState);
        }
        let kind = chunk.header.chunk_kind;
        let (sequence, plaintext) = self.open_symmetric_chunk(&mut core, &chunk)?;
        let request_id = sequence.request_id;

        match kind {
            ChunkKind::Abort => {
                // The in-flight request dies with the chunk's reason
                let mut buf = Buffer::from_bytes(&plaintext);
                let error = ErrorMessage::decode(&mut buf, &self.codec.limits)?;
                if core
                    .partial
                    .as_ref()
                    .is_some_and(|partial| partial.request_id == request_id)
                {
                    core.partial = None;
                }
                let pending = core.pending.remove(&request_id);
                drop(core);
                warn!(
                    request_id,
                    error = error.error,
                    reason = %error.reason,
                    "request aborted by peer"
                );
                if let Some(PendingRequest {
                    callback: Some(callback),
                    ..
                }) = pending
                {
                    self.deliver_response(
                        callback,
                        Err(RequestError {
                            status: Status::GenericFailure,
                            reason: error.reason.as_str().map(str::to_owned),
                        }),
                    );
                }
                Ok(())
            }
            ChunkKind::Intermediate => {
                match &mut core.partial {
                    None => {
                        // First chunk: the request id must be pending
                        if !core.pending.contains_key(&request_id) {
                            warn!(request_id, "intermediate chunk for unknown request");
                            return Ok(());
                        }
                        core.partial = Some(PartialMessage {
                            request_id,
                            data: plaintext,
                        });
                    }
                    Some(partial) => {
                        if partial.request_id != request_id {
                            // The peer interleaved two messages
                            return Err(Status::InvalidReceivedParameter);
                        }
                        partial.data.extend_from_slice(&plaintext);
                    }
                }
                Ok(())
            }
            ChunkKind::Final => {
                let mut data = match core.partial.take() {
                    Some(partial) if partial.request_id == request_id => partial.data,
                    Some(partial) => {
                        core.partial = Some(partial);
                        return Err(Status::InvalidReceivedParameter);
                    }
                    None => Vec::new(),
                };
                data.extend_from_slice(&plaintext);

                let Some(pending) = core.pending.remove(&request_id) else {
                    // Unknown id: reject without touching other entries
                    warn!(request_id, "response for unknown request id");
                    return Ok(());
                };
                drop(core);

                let mut buf = Buffer::from_bytes(&data);
                let result = messages::decode_message(
                    &mut buf,
                    &self.codec.ctx(),
                    pending.response_type,
                    &ServiceFault::TYPE,
                );
                match result {
                    Ok((_, response)) => {
                        if let Some(callback) = pending.callback {
                            self.deliver_response(callback, Ok(response));
                        }
                        Ok(())
                    }
                    Err(status) => {
                        if let Some(callback) = pending.callback {
                            self.deliver_response(
                                callback,
                                Err(RequestError::from_status(status)),
                            );
                        }
                        Err(status)
                    }
                }
            }
        }
    }

    // ----- Chunk dispatch and lifecycle ------------------------------------

    fn on_chunk(self: &Arc<Self>, chunk: RawChunk) {
        let message_type = chunk.header.message_type;
        let result = match message_type {
            MessageType::OpenSecureChannel => self.on_opn_response(chunk),
            MessageType::SecureMessage => self.on_secure_message(chunk),
            MessageType::Error => {
                let mut buf = Buffer::from_bytes(&chunk.body);
                match ErrorMessage::decode(&mut buf, &self.codec.limits) {
                    Ok(error) => {
                        warn!(error = error.error, reason = %error.reason, "peer error message");
                        Err(Status::Closed)
                    }
                    Err(status) => Err(status),
                }
            }
            MessageType::CloseSecureChannel => {
                warn!("unexpected CLO from server");
                Err(Status::InvalidReceivedParameter)
            }
        };

        if let Err(status) = result {
            warn!(?message_type, %status, "chunk processing failed");
            self.fail_connection(status);
        }
    }

    fn on_transport_down(self: &Arc<Self>, status: Status) {
        debug!(%status, "transport down");
        self.fail_connection(status);
    }

    /// Error path shared by verification, decoding and transport failures:
    /// fail everything pending, notify once, return to Disconnected
    fn fail_connection(self: &Arc<Self>, status: Status) {
        let mut core = self.core.lock();
        let previous_state = core.state;
        if previous_state == ChannelState::Disconnected {
            return;
        }
        core.state = ChannelState::Error;
        let pending: Vec<PendingRequest> = core.pending.drain().map(|(_, p)| p).collect();
        core.partial = None;
        core.writer = None;
        // Error state has been reported; further events would be duplicates
        core.state = ChannelState::Disconnected;
        drop(core);

        for request in pending {
            if let Some(callback) = request.callback {
                self.deliver_response(
                    callback,
                    Err(RequestError {
                        status: Status::Closed,
                        reason: Some("secure channel closed".to_owned()),
                    }),
                );
            }
        }

        debug!(%status, ?previous_state, "channel failed");
        let (event, code) = match previous_state {
            ChannelState::Connected => (
                ConnectionEvent::Disconnected,
                StatusCode::BAD_SECURE_CHANNEL_CLOSED,
            ),
            ChannelState::ConnectingTransport | ChannelState::ConnectingSecure => (
                ConnectionEvent::ConnectionFailed,
                StatusCode::BAD_CONNECTION_REJECTED,
            ),
            ChannelState::Disconnected | ChannelState::Error => (
                ConnectionEvent::UnexpectedError,
                StatusCode::BAD_UNEXPECTED_ERROR,
            ),
        };
        self.emit(event, code);
    }

    fn close(self: &Arc<Self>) {
        let mut core = self.core.lock();
        if core.state == ChannelState::Disconnected {
            return;
        }
        let was_connected = core.state == ChannelState::Connected;

        if was_connected {
            let request_id = core.next_request_id();
            let sequence_number = core.next_sequence_number();
            let close_request = messages::CloseSecureChannelRequest {
                request_header: RequestHeader {
                    request_handle: request_id,
                    ..RequestHeader::default()
                },
            };
            let mut body = Buffer::new(4096);
            if messages::encode_message(&close_request, &mut body, &self.codec.ctx()).is_ok() {
                if let Ok(chunk) = self.build_symmetric_chunk(
                    &core,
                    MessageType::CloseSecureChannel,
                    ChunkKind::Final,
                    sequence_number,
                    request_id,
                    body.as_bytes(),
                ) {
                    let _ =
                        self.submit_write(&mut core, chunk, TransactionEvent::StartEnd, request_id);
                }
            }
        }

        let pending: Vec<PendingRequest> = core.pending.drain().map(|(_, p)| p).collect();
        core.partial = None;
        core.writer = None;
        core.state = ChannelState::Disconnected;
        drop(core);

        for request in pending {
            if let Some(callback) = request.callback {
                self.deliver_response(
                    callback,
                    Err(RequestError {
                        status: Status::Closed,
                        reason: Some("secure channel closed".to_owned()),
                    }),
                );
            }
        }
        self.emit(ConnectionEvent::Disconnected, StatusCode::GOOD);
        info!("secure channel disconnected");
    }

    fn sweep_timeouts(self: &Arc<Self>) {
        let mut core = self.core.lock();
        let expired: Vec<u32> = core
            .pending
            .iter()
            .filter(|(_, request)| {
                request.timeout_hint_ms > 0
                    && request.start.elapsed() >= Duration::from_millis(request.timeout_hint_ms as u64)
            })
            .map(|(id, _)| *id)
            .collect();
        let mut callbacks = Vec::new();
        for id in expired {
            if let Some(request) = core.pending.remove(&id) {
                warn!(request_id = id, "request timed out");
                if let Some(callback) = request.callback {
                    callbacks.push(callback);
                }
            }
        }
        drop(core);
        for callback in callbacks {
            self.deliver_response(callback, Err(RequestError::from_status(Status::Timeout)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::sync::Mutex as StdMutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_util::codec::Decoder;

    use uamesh_core::messages::{ReadRequest, ReadResponse, ResponseHeader};
    use uamesh_core::types::variant::{DataValue, ScalarValue, Variant};
    use uamesh_net::secure_conversation::ChunkCodec;

    #[derive(Clone, Copy, PartialEq)]
    enum ServerBehavior {
        Normal,
        /// Answer with a bogus request id first, then the real response
        BogusIdFirst,
        /// Abort every service request
        AbortRequests,
        /// Complete OPN, then never answer
        Silent,
        /// Drop the connection right after OPN completes
        DropAfterOpn,
    }

    struct TestServer {
        stream: DuplexStream,
        buffer: BytesMut,
        decoder: ChunkCodec,
        codec: CodecConfig,
        behavior: ServerBehavior,
        channel_id: u32,
        sequence: u32,
    }

    impl TestServer {
        fn new(stream: DuplexStream, behavior: ServerBehavior) -> Self {
            Self {
                stream,
                buffer: BytesMut::with_capacity(4096),
                decoder: ChunkCodec,
                codec: CodecConfig::default(),
                behavior,
                channel_id: 7,
                sequence: 0,
            }
        }

        fn next_sequence(&mut self) -> u32 {
            self.sequence += 1;
            self.sequence
        }

        async fn next_chunk(&mut self) -> Option<RawChunk> {
            loop {
                if let Some(chunk) = self.decoder.decode(&mut self.buffer).ok()? {
                    return Some(chunk);
                }
                match self.stream.read_buf(&mut self.buffer).await {
                    Ok(0) | Err(_) => return None,
                    Ok(_) => {}
                }
            }
        }

        async fn send_chunk(&mut self, chunk: RawChunk) {
            self.stream.write_all(&chunk.to_wire()).await.unwrap();
        }

        async fn handle_opn(&mut self, chunk: RawChunk) {
            let mut buf = Buffer::from_bytes(&chunk.body);
            let _header = AsymmetricSecurityHeader::decode(&mut buf, &self.codec.limits).unwrap();
            let sequence = SequenceHeader::decode(&mut buf).unwrap();
            let (_, request) = messages::decode_message(
                &mut buf,
                &self.codec.ctx(),
                &OpenSecureChannelRequest::TYPE,
                &ServiceFault::TYPE,
            )
            .unwrap();
            let request = request.downcast_ref::<OpenSecureChannelRequest>().unwrap();
            assert_eq!(request.security_mode, MessageSecurityMode::None);
            assert_eq!(request.request_type, SecurityTokenRequestType::Issue);
            assert!(request.client_nonce.is_null());

            let response = OpenSecureChannelResponse {
                response_header: ResponseHeader {
                    request_handle: request.request_header.request_handle,
                    ..ResponseHeader::default()
                },
                server_protocol_version: PROTOCOL_VERSION,
                security_token: ChannelSecurityToken {
                    channel_id: self.channel_id,
                    token_id: 3,
                    created_at: 1,
                    revised_lifetime: request.requested_lifetime,
                },
                server_nonce: ByteString::null(),
            };

            let mut body = Buffer::new(8192);
            AsymmetricSecurityHeader {
                security_policy_uri: UaString::from(SecurityPolicy::None.uri()),
                sender_certificate: ByteString::null(),
                receiver_certificate_thumbprint: ByteString::null(),
            }
            .encode(&mut body)
            .unwrap();
            SequenceHeader {
                sequence_number: self.next_sequence(),
                request_id: sequence.request_id,
            }
            .encode(&mut body)
            .unwrap();
            messages::encode_message(&response, &mut body, &self.codec.ctx()).unwrap();

            let chunk = RawChunk::new(
                MessageType::OpenSecureChannel,
                ChunkKind::Final,
                self.channel_id,
                body.as_bytes().to_vec(),
            );
            self.send_chunk(chunk).await;
        }

        fn symmetric_body(&mut self, request_id: u32, message: &[u8]) -> Vec<u8> {
            let mut body = Vec::new();
            body.extend_from_slice(&3u32.to_le_bytes());
            body.extend_from_slice(&self.next_sequence().to_le_bytes());
            body.extend_from_slice(&request_id.to_le_bytes());
            body.extend_from_slice(message);
            body
        }

        async fn respond_read(&mut self, request_id: u32) {
            let response = ReadResponse {
                response_header: ResponseHeader::default(),
                results: vec![DataValue::from_variant(Variant::Scalar(
                    ScalarValue::UInt32(42),
                ))],
                diagnostic_infos: Vec::new(),
            };
            let mut message = Buffer::new(8192);
            messages::encode_message(&response, &mut message, &self.codec.ctx()).unwrap();
            let body = self.symmetric_body(request_id, message.as_bytes());
            let chunk = RawChunk::new(
                MessageType::SecureMessage,
                ChunkKind::Final,
                self.channel_id,
                body,
            );
            self.send_chunk(chunk).await;
        }

        async fn handle_msg(&mut self, chunk: RawChunk) {
            let body = &chunk.body;
            let request_id = u32::from_le_bytes([body[8], body[9], body[10], body[11]]);

            match self.behavior {
                ServerBehavior::Silent => {}
                ServerBehavior::AbortRequests => {
                    let mut message = Buffer::new(256);
                    ErrorMessage {
                        error: 0x8006_0000,
                        reason: UaString::from("request too large"),
                    }
                    .encode(&mut message)
                    .unwrap();
                    let abort_body = self.symmetric_body(request_id, message.as_bytes());
                    let chunk = RawChunk::new(
                        MessageType::SecureMessage,
                        ChunkKind::Abort,
                        self.channel_id,
                        abort_body,
                    );
                    self.send_chunk(chunk).await;
                }
                ServerBehavior::BogusIdFirst => {
                    self.respond_read(request_id + 1000).await;
                    self.respond_read(request_id).await;
                }
                _ => self.respond_read(request_id).await,
            }
        }

        async fn serve(mut self) {
            while let Some(chunk) = self.next_chunk().await {
                match chunk.header.message_type {
                    MessageType::OpenSecureChannel => {
                        self.handle_opn(chunk).await;
                        if self.behavior == ServerBehavior::DropAfterOpn {
                            // Let the client observe Connected before the drop
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            return;
                        }
                    }
                    MessageType::SecureMessage => self.handle_msg(chunk).await,
                    MessageType::CloseSecureChannel => return,
                    MessageType::Error => return,
                }
            }
        }
    }

    type EventLog = Arc<StdMutex<Vec<ConnectionEvent>>>;

    fn event_recorder() -> (ConnectionCallback, EventLog) {
        let log: EventLog = Arc::new(StdMutex::new(Vec::new()));
        let sink = log.clone();
        let callback: ConnectionCallback = Arc::new(move |event, _status| {
            sink.lock().unwrap().push(event);
        });
        (callback, log)
    }

    async fn wait_for_state(client: &SecureChannelClient, state: ChannelState) {
        for _ in 0..200 {
            if client.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("state {state:?} not reached, still {:?}", client.state());
    }

    async fn connected_client(behavior: ServerBehavior) -> (SecureChannelClient, EventLog) {
        let (events, log) = event_recorder();
        let client = SecureChannelClient::new(ChannelConfig::unsecured(), events).unwrap();
        let (client_stream, server_stream) = tokio::io::duplex(32 * 1024);
        tokio::spawn(TestServer::new(server_stream, behavior).serve());
        client.connect(client_stream).await.unwrap();
        wait_for_state(&client, ChannelState::Connected).await;
        (client, log)
    }

    fn read_request() -> Box<dyn Encodeable> {
        Box::new(ReadRequest {
            request_header: RequestHeader::default(),
            max_age: 0.0,
            timestamps_to_return: 0,
            nodes_to_read: Vec::new(),
        })
    }

    #[tokio::test]
    async fn opn_happy_path_reaches_connected() {
        let (client, log) = connected_client(ServerBehavior::Normal).await;

        let token = client.security_token().unwrap();
        assert_ne!(token.channel_id, 0);
        assert_ne!(token.token_id, 0);

        let max_body = client.max_body_size();
        assert!(max_body > 0);
        assert!(max_body < ChannelConfig::unsecured().send_buffer_size);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(log.lock().unwrap().first(), Some(&ConnectionEvent::Connected));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn request_response_correlation() {
        let (client, _log) = connected_client(ServerBehavior::Normal).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        client
            .send_request(
                read_request(),
                &ReadResponse::TYPE,
                0,
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            )
            .await
            .unwrap();

        let response = rx.await.unwrap().unwrap();
        let read = response.downcast_ref::<ReadResponse>().unwrap();
        assert_eq!(
            read.results[0].value,
            Variant::Scalar(ScalarValue::UInt32(42))
        );
        client.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_request_id_leaves_pending_intact() {
        let (client, _log) = connected_client(ServerBehavior::BogusIdFirst).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        client
            .send_request(
                read_request(),
                &ReadResponse::TYPE,
                0,
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            )
            .await
            .unwrap();

        // The bogus response is discarded, the real one still correlates
        let response = rx.await.unwrap().unwrap();
        assert!(response.downcast_ref::<ReadResponse>().is_some());
        assert_eq!(client.state(), ChannelState::Connected);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn abort_chunk_fails_request_with_reason() {
        let (client, _log) = connected_client(ServerBehavior::AbortRequests).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        client
            .send_request(
                read_request(),
                &ReadResponse::TYPE,
                0,
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            )
            .await
            .unwrap();

        let error = rx.await.unwrap().unwrap_err();
        assert_eq!(error.reason.as_deref(), Some("request too large"));
        // An aborted request does not kill the channel
        assert_eq!(client.state(), ChannelState::Connected);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn request_timeout_sweep_fires() {
        let (client, _log) = connected_client(ServerBehavior::Silent).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        client
            .send_request(
                read_request(),
                &ReadResponse::TYPE,
                50,
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            )
            .await
            .unwrap();

        let error = rx.await.unwrap().unwrap_err();
        assert_eq!(error.status, Status::Timeout);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn transport_drop_reports_disconnected() {
        let (client, log) = connected_client(ServerBehavior::DropAfterOpn).await;

        wait_for_state(&client, ChannelState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(log
            .lock()
            .unwrap()
            .contains(&ConnectionEvent::Disconnected));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_fails_pending_requests() {
        let (client, _log) = connected_client(ServerBehavior::Silent).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        client
            .send_request(
                read_request(),
                &ReadResponse::TYPE,
                0,
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            )
            .await
            .unwrap();
        client.disconnect().await.unwrap();

        let error = rx.await.unwrap().unwrap_err();
        assert_eq!(error.status, Status::Closed);
        assert_eq!(client.state(), ChannelState::Disconnected);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn connect_twice_is_invalid_state() {
        let (client, _log) = connected_client(ServerBehavior::Normal).await;
        let (extra_stream, _other_end) = tokio::io::duplex(1024);
        assert_eq!(client.connect(extra_stream).await, Err(Status::InvalidState));
        client.shutdown().await;
    }
}
