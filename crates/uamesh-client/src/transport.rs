//! Chunk transport over any byte stream
//!
//! A writer task serializes queued chunk writes through the per-socket
//! transaction state; a reader task reassembles chunks with the
//! Secure-Conversation codec and hands them to the channel. Both tasks
//! end when their stream half ends.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use uamesh_core::status::Status;
use uamesh_net::secure_conversation::{ChunkCodec, RawChunk};

use crate::transaction::{SocketTransaction, TransactionEvent};

/// Outcome of one queued write
pub type WriteResult = Result<(), Status>;

/// One queued chunk write plus its transaction bookkeeping
pub struct WriteOp {
    pub chunk: RawChunk,
    pub event: TransactionEvent,
    pub transaction_id: u32,
    /// Outcome notification for the sender; `None` when nobody waits
    pub done: Option<tokio::sync::oneshot::Sender<WriteResult>>,
}

fn notify(done: Option<tokio::sync::oneshot::Sender<WriteResult>>, outcome: WriteResult) {
    if let Some(done) = done {
        let _ = done.send(outcome);
    }
}

/// Await a write outcome previously queued with a `done` channel
pub async fn write_outcome(rx: tokio::sync::oneshot::Receiver<WriteResult>) -> WriteResult {
    rx.await.unwrap_or(Err(Status::Closed))
}

/// Spawn the writer task; dropping the returned sender ends it
pub fn spawn_writer<W>(mut sink: W, capacity: usize) -> (mpsc::Sender<WriteOp>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<WriteOp>(capacity);
    let handle = tokio::spawn(async move {
        let mut transaction = SocketTransaction::new();
        while let Some(op) = rx.recv().await {
            if let Err(status) = transaction.check_and_update(op.event, op.transaction_id) {
                warn!(
                    transaction_id = op.transaction_id,
                    "write rejected by socket transaction"
                );
                notify(op.done, Err(status));
                continue;
            }
            let wire = op.chunk.to_wire();
            match sink.write_all(&wire).await {
                Ok(()) => {
                    let _ = sink.flush().await;
                    notify(op.done, Ok(()));
                }
                Err(err) => {
                    debug!(error = %err, "socket write failed");
                    let _ = transaction
                        .check_and_update(TransactionEvent::SocketError, op.transaction_id);
                    notify(op.done, Err(Status::Closed));
                }
            }
        }
        debug!("chunk writer stopped");
    });
    (tx, handle)
}

/// Spawn the reader task, delivering each chunk to `on_chunk`; `on_closed`
/// fires once when the stream ends or framing fails fatally
pub fn spawn_reader<R, F, C>(mut source: R, mut on_chunk: F, on_closed: C) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(RawChunk) + Send + 'static,
    C: FnOnce(Status) + Send + 'static,
{
    tokio::spawn(async move {
        let mut codec = ChunkCodec;
        let mut buffer = BytesMut::with_capacity(4096);
        let status = loop {
            match codec.decode(&mut buffer) {
                Ok(Some(chunk)) => {
                    on_chunk(chunk);
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "chunk framing failed");
                    break Status::from(err);
                }
            }
            match source.read_buf(&mut buffer).await {
                Ok(0) => break Status::Closed,
                Ok(_) => {}
                Err(err) => {
                    debug!(error = %err, "socket read failed");
                    break Status::Closed;
                }
            }
        };
        on_closed(status);
        debug!("chunk reader stopped");
    })
}
