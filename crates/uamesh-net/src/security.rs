//! Subscriber security context and sequence-number tracking
//!
//! Security configuration is looked up per (token id, publisher id, writer
//! group id). The subscriber manages exactly one active token per group;
//! a miss means the message is not addressed to this subscriber.

use tracing::debug;

use crate::config::{
    PublisherId, SecurityMode, DEFAULT_MAX_MESSAGES_PER_PUBLISHER,
    DEFAULT_MAX_PUBLISHERS_PER_SCHEDULER, SKS_DEFAULT_TOKEN_ID,
};
use crate::crypto::{CryptoProvider, SymmetricKeySet};

/// Hands out group key sets; backed by a security-key service elsewhere
pub trait KeySetProvider {
    fn group_keys(&self, group_id: u32, token_id: u32) -> Option<SymmetricKeySet>;
}

/// Fixed in-memory key store
#[derive(Default)]
pub struct StaticKeySetStore {
    entries: Vec<(u32, u32, SymmetricKeySet)>,
}

impl StaticKeySetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group_id: u32, token_id: u32, keys: SymmetricKeySet) {
        self.entries.push((group_id, token_id, keys));
    }
}

impl KeySetProvider for StaticKeySetStore {
    fn group_keys(&self, group_id: u32, token_id: u32) -> Option<SymmetricKeySet> {
        self.entries
            .iter()
            .find(|(g, t, _)| *g == group_id && *t == token_id)
            .map(|(_, _, keys)| keys.clone())
    }
}

/// Security configuration of one writer group as seen by a reader
pub struct ReaderSecurity {
    pub writer_group_id: u16,
    pub mode: SecurityMode,
    pub keys: SymmetricKeySet,
    pub provider: CryptoProvider,
}

/// Per-publisher record: group security plus the publisher-level sequence
/// number
struct PublisherSecurity {
    publisher_id: PublisherId,
    readers: Vec<ReaderSecurity>,
}

/// Two-level index resolving (token id, publisher id, writer group id) to
/// a security configuration
#[derive(Default)]
pub struct SubscriberSecurity {
    publishers: Vec<PublisherSecurity>,
}

impl SubscriberSecurity {
    pub fn new() -> Self {
        Self {
            publishers: Vec::with_capacity(DEFAULT_MAX_PUBLISHERS_PER_SCHEDULER),
        }
    }

    /// Register a secured reader group. Groups with mode None need no
    /// context and are skipped.
    pub fn add_reader_group(
        &mut self,
        publisher_id: PublisherId,
        writer_group_id: u16,
        mode: SecurityMode,
        keys: SymmetricKeySet,
        provider: CryptoProvider,
    ) {
        if mode == SecurityMode::None {
            return;
        }
        let publisher = match self
            .publishers
            .iter_mut()
            .position(|p| p.publisher_id.matches(publisher_id))
        {
            Some(i) => &mut self.publishers[i],
            None => {
                self.publishers.push(PublisherSecurity {
                    publisher_id,
                    readers: Vec::with_capacity(DEFAULT_MAX_MESSAGES_PER_PUBLISHER),
                });
                self.publishers.last_mut().unwrap()
            }
        };
        if publisher
            .readers
            .iter()
            .any(|r| r.writer_group_id == writer_group_id)
        {
            return;
        }
        publisher.readers.push(ReaderSecurity {
            writer_group_id,
            mode,
            keys,
            provider,
        });
    }

    /// Resolve the security configuration for a received message, or None
    /// when the message is not addressed to this subscriber
    pub fn resolve(
        &self,
        token_id: u32,
        publisher_id: PublisherId,
        writer_group_id: u16,
    ) -> Option<&ReaderSecurity> {
        if token_id != SKS_DEFAULT_TOKEN_ID {
            // Only one token id is managed
            return None;
        }
        self.publishers
            .iter()
            .find(|p| p.publisher_id.matches(publisher_id))?
            .readers
            .iter()
            .find(|r| r.writer_group_id == writer_group_id)
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

/// Modular freshness rule from OPC UA Part 14: a received sequence number
/// is newer when `(received - 1 - last) mod 2^16 < 2^14`
pub fn is_newer(last: u16, received: u16) -> bool {
    received.wrapping_sub(1).wrapping_sub(last) < 16384
}

/// Details handed to the gap callback when a stale sequence number is
/// rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    pub publisher_id: PublisherId,
    pub writer_id: u16,
    pub previous: u16,
    pub received: u16,
}

/// Gap notification hook
pub type GapCallback = Box<dyn Fn(SequenceGap) + Send + Sync>;

struct WriterEntry {
    publisher_id: PublisherId,
    writer_id: u16,
    sn_known: bool,
    last_sn: u16,
}

/// Per-(publisher, dataset writer) sequence-number tracker
#[derive(Default)]
pub struct WriterTracker {
    entries: Vec<WriterEntry>,
    gap_callback: Option<GapCallback>,
}

impl WriterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gap_callback(callback: GapCallback) -> Self {
        Self {
            entries: Vec::new(),
            gap_callback: Some(callback),
        }
    }

    /// Register a (publisher, writer) pair; re-registration is ignored
    pub fn register(&mut self, publisher_id: PublisherId, writer_id: u16) {
        let exists = self
            .entries
            .iter()
            .any(|e| e.publisher_id.matches(publisher_id) && e.writer_id == writer_id);
        if !exists {
            self.entries.push(WriterEntry {
                publisher_id,
                writer_id,
                sn_known: false,
                last_sn: 0,
            });
        }
    }

    /// Apply the freshness rule. The first observed number is always
    /// accepted; a stale number fires the gap callback. An unregistered
    /// pair is rejected.
    pub fn accept(&mut self, publisher_id: PublisherId, writer_id: u16, received: u16) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.publisher_id.matches(publisher_id) && e.writer_id == writer_id)
        else {
            debug!(%publisher_id, writer_id, "sequence number for unconfigured writer");
            return false;
        };

        if !entry.sn_known {
            entry.sn_known = true;
            entry.last_sn = received;
            return true;
        }

        if is_newer(entry.last_sn, received) {
            entry.last_sn = received;
            true
        } else {
            if let Some(callback) = &self.gap_callback {
                callback(SequenceGap {
                    publisher_id,
                    writer_id,
                    previous: entry.last_sn,
                    received,
                });
            }
            false
        }
    }
}
