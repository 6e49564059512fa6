//! uamesh Secure Channel client
//!
//! Client side of the OPC UA Secure Conversation: transport framing over
//! TCP, the OPN handshake, symmetrically protected request/response
//! exchange with chunking, and the cooperative action-queue dispatch the
//! state machine runs on.
//!
//! # Modules
//!
//! - [`action_queue`]: single-consumer FIFO work queues
//! - [`transaction`]: per-socket transaction state forbidding interleaved
//!   multi-chunk messages
//! - [`transport`]: chunk reader/writer tasks over any byte stream
//! - [`channel`]: the Secure-Channel client state machine

pub mod action_queue;
pub mod channel;
pub mod transaction;
pub mod transport;

pub use action_queue::{ActionQueue, ActionQueueManager};
pub use channel::{
    ChannelConfig, ChannelState, ConnectionEvent, SecureChannelClient,
};
