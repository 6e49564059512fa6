//! Subscriber scheduler
//!
//! Owns the reception transports (UDP multicast sockets, raw-Ethernet and
//! MQTT sources), a single reception loop with a periodic tick, and the
//! security and sequence-number contexts. Start binds everything and moves
//! the scheduler to Operational; Stop tears the tasks down and returns to
//! Disabled. A pair of atomic flags rejects concurrent start/stop.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

use uamesh_core::codec::CodecConfig;
use uamesh_core::status::Status;
use uamesh_net::config::{
    default_mqtt_topic, SecurityMode, SubConnectionConfig, SubscriberConfig,
    SKS_DEFAULT_GROUP_ID, SKS_DEFAULT_TOKEN_ID,
};
use uamesh_net::crypto::{CryptoProvider, SecurityPolicy};
use uamesh_net::security::{KeySetProvider, SequenceGap, SubscriberSecurity, WriterTracker};
use uamesh_net::uadp::NetworkMessage;

use crate::reader;
pub use crate::reader::{SubTargetVariable, TargetUpdate};

/// Bytes of Ethernet header stripped before the UADP payload
const ETHERNET_HEADER_SIZE: usize = 14;

const UDP_PREFIX: &str = "opc.udp://";
const ETH_PREFIX: &str = "opc.eth://";
const MQTT_PREFIX: &str = "mqtt://";

/// Subscriber lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Disabled,
    Paused,
    Operational,
    Error,
}

/// State-change notification hook
pub type StateCallback = Box<dyn Fn(SchedulerState) + Send + Sync>;

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid transport address: {0}")]
    InvalidAddress(String),
    #[error("start or stop already in progress")]
    Busy,
    #[error("scheduler already started")]
    AlreadyStarted,
    #[error("no source attached for {0}")]
    MissingSource(String),
    #[error("no group keys available for secured reader group")]
    MissingKeys,
}

/// Raw Ethernet frames handed in by the platform packet socket
pub type EthFrameSource = mpsc::Receiver<Vec<u8>>;

/// (topic, payload) pairs handed in by the external MQTT client
pub type MqttMessageSource = mpsc::Receiver<(String, Vec<u8>)>;

struct SchedulerShared {
    connections: Vec<SubConnectionConfig>,
    ethernet: Vec<bool>,
    target: Arc<dyn SubTargetVariable>,
    codec: CodecConfig,
    state: Mutex<SchedulerState>,
    state_callback: Option<Arc<dyn Fn(SchedulerState) + Send + Sync>>,
}

impl SchedulerShared {
    fn set_state(&self, new: SchedulerState) {
        let mut state = self.state.lock();
        if *state != new {
            if let Some(callback) = &self.state_callback {
                callback(new);
            }
        }
        *state = new;
    }

    /// Receive handler shared by every transport: fill the decoder, apply
    /// security and freshness, dispatch to target variables
    fn handle_datagram(
        &self,
        connection_index: usize,
        datagram: &[u8],
        security: &SubscriberSecurity,
        tracker: &mut WriterTracker,
    ) {
        if *self.state.lock() != SchedulerState::Operational {
            return;
        }
        let payload = if self.ethernet[connection_index] {
            if datagram.len() <= ETHERNET_HEADER_SIZE {
                debug!("truncated ethernet frame dropped");
                return;
            }
            &datagram[ETHERNET_HEADER_SIZE..]
        } else {
            datagram
        };

        match NetworkMessage::decode(payload, &self.codec.ctx(), security, tracker) {
            Ok(Some(message)) => {
                let delivered = reader::dispatch(
                    &self.connections[connection_index],
                    message,
                    self.target.as_ref(),
                );
                trace!(connection_index, delivered, "datagram dispatched");
            }
            Ok(None) => {
                trace!(connection_index, "datagram not addressed to this subscriber");
            }
            // The network is noisy: one bad datagram must not stop the
            // subscriber
            Err(Status::EncodingError) | Err(Status::InvalidReceivedParameter) => {
                debug!(connection_index, "undecodable datagram dropped");
            }
            Err(status) => {
                warn!(connection_index, %status, "fatal decoding error");
                self.set_state(SchedulerState::Error);
            }
        }
    }
}

struct Runtime {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    udp_sockets: Vec<(Arc<UdpSocket>, Option<Ipv4Addr>)>,
    local_addrs: Vec<SocketAddr>,
}

/// Owns the reception side of one PubSub subscriber
pub struct SubScheduler {
    config: SubscriberConfig,
    target: Arc<dyn SubTargetVariable>,
    key_sets: Arc<dyn KeySetProvider + Send + Sync>,
    state_callback: Option<Arc<dyn Fn(SchedulerState) + Send + Sync>>,
    gap_callback: Option<Arc<dyn Fn(SequenceGap) + Send + Sync>>,
    is_started: AtomicBool,
    processing_start_stop: AtomicBool,
    eth_sources: Mutex<HashMap<String, EthFrameSource>>,
    mqtt_sources: Mutex<HashMap<String, MqttMessageSource>>,
    shared: Mutex<Option<Arc<SchedulerShared>>>,
    runtime: Mutex<Option<Runtime>>,
}

impl SubScheduler {
    pub fn new(
        config: SubscriberConfig,
        target: Arc<dyn SubTargetVariable>,
        key_sets: Arc<dyn KeySetProvider + Send + Sync>,
    ) -> Self {
        Self {
            config,
            target,
            key_sets,
            state_callback: None,
            gap_callback: None,
            is_started: AtomicBool::new(false),
            processing_start_stop: AtomicBool::new(false),
            eth_sources: Mutex::new(HashMap::new()),
            mqtt_sources: Mutex::new(HashMap::new()),
            shared: Mutex::new(None),
            runtime: Mutex::new(None),
        }
    }

    pub fn with_state_callback(mut self, callback: StateCallback) -> Self {
        self.state_callback = Some(Arc::from(callback));
        self
    }

    pub fn with_gap_callback(
        mut self,
        callback: Box<dyn Fn(SequenceGap) + Send + Sync>,
    ) -> Self {
        self.gap_callback = Some(Arc::from(callback));
        self
    }

    /// Attach the frame source of a raw-Ethernet connection; must happen
    /// before start
    pub fn attach_eth_source(&self, address: &str, source: EthFrameSource) {
        self.eth_sources.lock().insert(address.to_owned(), source);
    }

    /// Attach the message source of an MQTT connection; must happen before
    /// start
    pub fn attach_mqtt_source(&self, address: &str, source: MqttMessageSource) {
        self.mqtt_sources.lock().insert(address.to_owned(), source);
    }

    pub fn state(&self) -> SchedulerState {
        self.shared
            .lock()
            .as_ref()
            .map(|shared| *shared.state.lock())
            .unwrap_or(SchedulerState::Disabled)
    }

    /// Bound addresses of the UDP sockets, in connection order
    pub fn udp_local_addrs(&self) -> Vec<SocketAddr> {
        self.runtime
            .lock()
            .as_ref()
            .map(|runtime| runtime.local_addrs.clone())
            .unwrap_or_default()
    }

    /// Bind sockets, join multicast groups, spawn the reception loop.
    /// Failure leaves the scheduler Disabled.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.processing_start_stop.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::Busy);
        }
        let result = self.start_inner().await;
        self.processing_start_stop.store(false, Ordering::SeqCst);
        if result.is_ok() {
            self.is_started.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn start_inner(&self) -> Result<(), SchedulerError> {
        if self.is_started.load(Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let shared = Arc::new(SchedulerShared {
            connections: self.config.connections.clone(),
            ethernet: self
                .config
                .connections
                .iter()
                .map(|c| c.address.starts_with(ETH_PREFIX))
                .collect(),
            target: self.target.clone(),
            codec: CodecConfig::default(),
            state: Mutex::new(SchedulerState::Disabled),
            state_callback: self.state_callback.clone(),
        });

        let (shutdown_tx, _) = watch::channel(false);
        let (datagram_tx, mut datagram_rx) = mpsc::channel::<(usize, Vec<u8>)>(64);
        let buffer_size = self.config.buffer_size as usize;

        let mut tasks = Vec::new();
        let mut udp_sockets = Vec::new();
        let mut local_addrs = Vec::new();

        for (index, connection) in self.config.connections.iter().enumerate() {
            let address = connection.address.as_str();
            if let Some(rest) = address.strip_prefix(UDP_PREFIX) {
                let target_addr: SocketAddr = rest
                    .parse()
                    .map_err(|_| SchedulerError::InvalidAddress(address.to_owned()))?;
                let bind_addr = SocketAddr::new(
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    target_addr.port(),
                );
                let std_socket = std::net::UdpSocket::bind(bind_addr)?;
                let mut multicast_group = None;
                if let IpAddr::V4(ip) = target_addr.ip() {
                    if ip.is_multicast() {
                        std_socket.join_multicast_v4(&ip, &Ipv4Addr::UNSPECIFIED)?;
                        multicast_group = Some(ip);
                    }
                }
                std_socket.set_nonblocking(true)?;
                let socket = Arc::new(UdpSocket::from_std(std_socket)?);
                local_addrs.push(socket.local_addr()?);
                info!(address, multicast = ?multicast_group, "udp reception socket bound");

                let pump_socket = socket.clone();
                let tx = datagram_tx.clone();
                let mut shutdown = shutdown_tx.subscribe();
                tasks.push(tokio::spawn(async move {
                    let mut buf = vec![0u8; buffer_size];
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            received = pump_socket.recv_from(&mut buf) => match received {
                                Ok((n, _from)) => {
                                    if tx.send((index, buf[..n].to_vec())).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "udp receive failed");
                                    break;
                                }
                            },
                        }
                    }
                }));
                udp_sockets.push((socket, multicast_group));
            } else if address.starts_with(ETH_PREFIX) {
                let mut source = self
                    .eth_sources
                    .lock()
                    .remove(address)
                    .ok_or_else(|| SchedulerError::MissingSource(address.to_owned()))?;
                info!(address, "ethernet reception source attached");
                let tx = datagram_tx.clone();
                let mut shutdown = shutdown_tx.subscribe();
                tasks.push(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            frame = source.recv() => match frame {
                                Some(frame) => {
                                    if tx.send((index, frame)).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                }));
            } else if address.starts_with(MQTT_PREFIX) {
                let mut source = self
                    .mqtt_sources
                    .lock()
                    .remove(address)
                    .ok_or_else(|| SchedulerError::MissingSource(address.to_owned()))?;
                // One topic per reader group; synthesize defaults
                let topics: Vec<String> = connection
                    .reader_groups
                    .iter()
                    .map(|group| {
                        group.mqtt_topic.clone().unwrap_or_else(|| {
                            default_mqtt_topic(group.publisher_id, group.writer_group_id)
                        })
                    })
                    .collect();
                info!(address, ?topics, "mqtt reception source attached");
                let tx = datagram_tx.clone();
                let mut shutdown = shutdown_tx.subscribe();
                tasks.push(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            message = source.recv() => match message {
                                Some((topic, payload)) => {
                                    trace!(%topic, bytes = payload.len(), "mqtt message");
                                    if tx.send((index, payload)).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                }));
            } else {
                return Err(SchedulerError::InvalidAddress(address.to_owned()));
            }
        }
        drop(datagram_tx);

        // Security context and sequence tracking shared by all connections
        let mut security = SubscriberSecurity::new();
        let mut tracker = match &self.gap_callback {
            Some(callback) => {
                let callback = callback.clone();
                WriterTracker::with_gap_callback(Box::new(move |gap| callback(gap)))
            }
            None => WriterTracker::new(),
        };
        for connection in &self.config.connections {
            for group in &connection.reader_groups {
                if group.security_mode != SecurityMode::None {
                    let keys = self
                        .key_sets
                        .group_keys(SKS_DEFAULT_GROUP_ID, SKS_DEFAULT_TOKEN_ID)
                        .ok_or(SchedulerError::MissingKeys)?;
                    security.add_reader_group(
                        group.publisher_id,
                        group.writer_group_id,
                        group.security_mode,
                        keys,
                        CryptoProvider::new(SecurityPolicy::ChaCha20Poly1305),
                    );
                }
                for dataset_reader in &group.readers {
                    tracker.register(group.publisher_id, dataset_reader.writer_id);
                }
            }
        }

        // Reception loop: bounded select over all sources plus the tick
        let loop_shared = shared.clone();
        let mut shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(100));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        // Keep-alive and timeout hook, nothing to do yet
                    }
                    item = datagram_rx.recv() => match item {
                        Some((index, datagram)) => {
                            loop_shared.handle_datagram(index, &datagram, &security, &mut tracker);
                        }
                        None => break,
                    },
                }
            }
            debug!("reception loop stopped");
        }));

        shared.set_state(SchedulerState::Operational);
        *self.shared.lock() = Some(shared);
        *self.runtime.lock() = Some(Runtime {
            shutdown: shutdown_tx,
            tasks,
            udp_sockets,
            local_addrs,
        });
        info!("subscriber scheduler started");
        Ok(())
    }

    /// Request-and-wait stop: signal the tasks, join them, close sockets
    /// and drop multicast memberships
    pub async fn stop(&self) {
        if !self.is_started.load(Ordering::SeqCst)
            || self.processing_start_stop.swap(true, Ordering::SeqCst)
        {
            return;
        }

        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            let _ = runtime.shutdown.send(true);
            for task in runtime.tasks {
                let _ = task.await;
            }
            for (socket, multicast_group) in runtime.udp_sockets {
                if let Some(group) = multicast_group {
                    let _ = socket.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED);
                }
            }
        }
        if let Some(shared) = self.shared.lock().take() {
            shared.set_state(SchedulerState::Disabled);
        }

        self.is_started.store(false, Ordering::SeqCst);
        self.processing_start_stop.store(false, Ordering::SeqCst);
        info!("subscriber scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uamesh_core::types::string::UaString;
    use uamesh_core::types::variant::{builtin_id, ScalarValue, Variant};
    use uamesh_net::config::{
        DataSetReaderConfig, FieldMetadata, PublisherId, ReaderGroupConfig,
    };
    use uamesh_net::security::StaticKeySetStore;
    use uamesh_net::uadp::{DataSetMessage, GroupHeader};

    struct ChannelTarget(mpsc::UnboundedSender<TargetUpdate>);

    impl SubTargetVariable for ChannelTarget {
        fn set_target_variables(&self, update: TargetUpdate) -> bool {
            self.0.send(update).is_ok()
        }
    }

    fn scenario_reader_group() -> ReaderGroupConfig {
        ReaderGroupConfig {
            publisher_id: PublisherId::UInt16(3),
            writer_group_id: 10,
            group_version: 0,
            security_mode: SecurityMode::None,
            mqtt_topic: None,
            readers: vec![DataSetReaderConfig {
                writer_id: 62541,
                fields: vec![
                    FieldMetadata {
                        name: "message".into(),
                        builtin_type: builtin_id::STRING,
                    },
                    FieldMetadata {
                        name: "answer".into(),
                        builtin_type: builtin_id::UINT32,
                    },
                    FieldMetadata {
                        name: "delta".into(),
                        builtin_type: builtin_id::INT16,
                    },
                    FieldMetadata {
                        name: "active".into(),
                        builtin_type: builtin_id::BOOLEAN,
                    },
                ],
            }],
        }
    }

    fn scenario_config(address: &str) -> SubscriberConfig {
        SubscriberConfig {
            connections: vec![SubConnectionConfig {
                address: address.into(),
                interface_name: None,
                mqtt_username: None,
                mqtt_password: None,
                reader_groups: vec![scenario_reader_group()],
            }],
            buffer_size: 4096,
        }
    }

    fn scenario_datagram(sequence_number: u16) -> Vec<u8> {
        let codec = CodecConfig::default();
        NetworkMessage {
            publisher_id: Some(PublisherId::UInt16(3)),
            group_header: Some(GroupHeader {
                writer_group_id: Some(10),
                group_version: Some(0),
                ..GroupHeader::default()
            }),
            timestamp: None,
            picoseconds: None,
            messages: vec![DataSetMessage {
                writer_id: 62541,
                sequence_number: Some(sequence_number),
                fields: vec![
                    Variant::Scalar(ScalarValue::String(UaString::from(
                        "The Ultimate Question of Life, the Universe and Everything",
                    ))),
                    Variant::Scalar(ScalarValue::UInt32(42)),
                    Variant::Scalar(ScalarValue::Int16(-314)),
                    Variant::Scalar(ScalarValue::Boolean(true)),
                ],
            }],
        }
        .encode(&codec.ctx(), None)
        .unwrap()
    }

    fn assert_scenario_update(update: &TargetUpdate) {
        assert_eq!(update.writer_id, 62541);
        assert_eq!(update.fields.len(), 4);
        assert_eq!(
            update.fields[0].1,
            Variant::Scalar(ScalarValue::String(UaString::from(
                "The Ultimate Question of Life, the Universe and Everything",
            )))
        );
        assert_eq!(update.fields[1].1, Variant::Scalar(ScalarValue::UInt32(42)));
        assert_eq!(update.fields[2].1, Variant::Scalar(ScalarValue::Int16(-314)));
        assert_eq!(
            update.fields[3].1,
            Variant::Scalar(ScalarValue::Boolean(true))
        );
    }

    #[tokio::test]
    async fn ethernet_connection_delivers_scenario_update() {
        let (update_tx, mut update_rx) = mpsc::unbounded_channel();
        let scheduler = SubScheduler::new(
            scenario_config("opc.eth://01-00-5e-00-00-01"),
            Arc::new(ChannelTarget(update_tx)),
            Arc::new(StaticKeySetStore::new()),
        );
        let (frame_tx, frame_rx) = mpsc::channel(4);
        scheduler.attach_eth_source("opc.eth://01-00-5e-00-00-01", frame_rx);

        scheduler.start().await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Operational);

        // Ethernet header precedes the UADP payload and must be skipped
        let mut frame = vec![0u8; ETHERNET_HEADER_SIZE];
        frame.extend_from_slice(&scenario_datagram(1));
        frame_tx.send(frame).await.unwrap();

        let update = tokio::time::timeout(Duration::from_secs(2), update_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_scenario_update(&update);

        scheduler.stop().await;
        assert_eq!(scheduler.state(), SchedulerState::Disabled);
    }

    #[tokio::test]
    async fn udp_connection_delivers_scenario_update() {
        let (update_tx, mut update_rx) = mpsc::unbounded_channel();
        let scheduler = SubScheduler::new(
            scenario_config("opc.udp://127.0.0.1:0"),
            Arc::new(ChannelTarget(update_tx)),
            Arc::new(StaticKeySetStore::new()),
        );
        scheduler.start().await.unwrap();

        let local = scheduler.udp_local_addrs()[0];
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port());
        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&scenario_datagram(1), target).unwrap();

        let update = tokio::time::timeout(Duration::from_secs(2), update_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_scenario_update(&update);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn garbage_datagram_is_swallowed() {
        let (update_tx, mut update_rx) = mpsc::unbounded_channel();
        let scheduler = SubScheduler::new(
            scenario_config("opc.eth://01-00-5e-00-00-02"),
            Arc::new(ChannelTarget(update_tx)),
            Arc::new(StaticKeySetStore::new()),
        );
        let (frame_tx, frame_rx) = mpsc::channel(4);
        scheduler.attach_eth_source("opc.eth://01-00-5e-00-00-02", frame_rx);
        scheduler.start().await.unwrap();

        let mut garbage = vec![0u8; ETHERNET_HEADER_SIZE];
        garbage.extend_from_slice(&[0xFF, 0x00, 0xAB, 0xCD, 0xEF]);
        frame_tx.send(garbage).await.unwrap();

        // A valid datagram afterwards still gets through
        let mut frame = vec![0u8; ETHERNET_HEADER_SIZE];
        frame.extend_from_slice(&scenario_datagram(1));
        frame_tx.send(frame).await.unwrap();

        let update = tokio::time::timeout(Duration::from_secs(2), update_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_scenario_update(&update);
        assert_eq!(scheduler.state(), SchedulerState::Operational);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stale_sequence_number_is_not_delivered() {
        let (update_tx, mut update_rx) = mpsc::unbounded_channel();
        let scheduler = SubScheduler::new(
            scenario_config("opc.eth://01-00-5e-00-00-03"),
            Arc::new(ChannelTarget(update_tx)),
            Arc::new(StaticKeySetStore::new()),
        );
        let (frame_tx, frame_rx) = mpsc::channel(4);
        scheduler.attach_eth_source("opc.eth://01-00-5e-00-00-03", frame_rx);
        scheduler.start().await.unwrap();

        for sequence in [5u16, 5] {
            let mut frame = vec![0u8; ETHERNET_HEADER_SIZE];
            frame.extend_from_slice(&scenario_datagram(sequence));
            frame_tx.send(frame).await.unwrap();
        }

        // Only the first datagram is fresh
        tokio::time::timeout(Duration::from_secs(2), update_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(200), update_rx.recv())
                .await
                .is_err()
        );

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn start_is_guarded_against_reentry() {
        let (update_tx, _update_rx) = mpsc::unbounded_channel();
        let scheduler = SubScheduler::new(
            scenario_config("opc.udp://127.0.0.1:0"),
            Arc::new(ChannelTarget(update_tx)),
            Arc::new(StaticKeySetStore::new()),
        );
        scheduler.start().await.unwrap();
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyStarted)
        ));
        scheduler.stop().await;
        // Stop twice is a no-op
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn missing_eth_source_fails_start() {
        let (update_tx, _update_rx) = mpsc::unbounded_channel();
        let scheduler = SubScheduler::new(
            scenario_config("opc.eth://01-00-5e-00-00-04"),
            Arc::new(ChannelTarget(update_tx)),
            Arc::new(StaticKeySetStore::new()),
        );
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::MissingSource(_))
        ));
        assert_eq!(scheduler.state(), SchedulerState::Disabled);
    }
}
