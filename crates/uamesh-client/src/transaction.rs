//! Per-socket transaction state
//!
//! A multi-chunk message must hit the wire contiguously. Every queued
//! write carries a transaction event and the id of the message it belongs
//! to; the state machine rejects writes that would interleave a foreign
//! message into a started transaction.

use uamesh_core::status::{Result, Status};

/// Event attached to one queued socket write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEvent {
    /// First chunk of a multi-chunk message
    Start,
    /// Middle chunk of the started message
    Continue,
    /// Last chunk of the started message
    End,
    /// Single-chunk message, atomic on the wire
    StartEnd,
    /// Abort chunk closing a started message after an encoding failure
    EndError,
    /// Write failure; poisons the transaction until its EndError
    SocketError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TransactionState {
    #[default]
    None,
    Started,
    Error,
}

/// Tracks whose message currently owns the socket
#[derive(Debug, Default)]
pub struct SocketTransaction {
    state: TransactionState,
    transaction_id: u32,
}

impl SocketTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `event` for transaction `id`, updating the state on
    /// success. `InvalidState` means the write must be discarded.
    pub fn check_and_update(&mut self, event: TransactionEvent, id: u32) -> Result<()> {
        match self.state {
            TransactionState::None => match event {
                TransactionEvent::Start => {
                    self.state = TransactionState::Started;
                    self.transaction_id = id;
                    Ok(())
                }
                // Atomic transaction, no state to keep
                TransactionEvent::StartEnd => Ok(()),
                // Socket failure outside any transaction needs no cleanup
                TransactionEvent::SocketError => Ok(()),
                TransactionEvent::Continue
                | TransactionEvent::End
                | TransactionEvent::EndError => Err(Status::InvalidState),
            },
            TransactionState::Started => match event {
                TransactionEvent::Start | TransactionEvent::StartEnd => Err(Status::InvalidState),
                TransactionEvent::Continue => {
                    if self.transaction_id == id {
                        Ok(())
                    } else {
                        Err(Status::InvalidState)
                    }
                }
                TransactionEvent::End | TransactionEvent::EndError => {
                    if self.transaction_id == id {
                        self.state = TransactionState::None;
                        self.transaction_id = 0;
                        Ok(())
                    } else {
                        Err(Status::InvalidState)
                    }
                }
                TransactionEvent::SocketError => {
                    if self.transaction_id == id {
                        self.state = TransactionState::Error;
                        Ok(())
                    } else {
                        Err(Status::InvalidState)
                    }
                }
            },
            TransactionState::Error => match event {
                TransactionEvent::EndError => {
                    if self.transaction_id == id {
                        self.state = TransactionState::None;
                        self.transaction_id = 0;
                        Ok(())
                    } else {
                        Err(Status::InvalidState)
                    }
                }
                TransactionEvent::SocketError => Ok(()),
                TransactionEvent::Start
                | TransactionEvent::StartEnd
                | TransactionEvent::Continue
                | TransactionEvent::End => Err(Status::InvalidState),
            },
        }
    }
}
