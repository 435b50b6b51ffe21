//! Queue module: element store, attempt ledger, padding assembler and the
//! padding FIFO queue built from them.

mod attempt;
mod padding;
mod padding_fifo;
mod store;

pub use padding::{MAX_PADDED_RANK, assemble_batch, empty_batch};
pub use padding_fifo::PaddingFifoQueue;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::Tuple;
use crate::error::QueueError;
use crate::observability::QueueStats;

/// Queue port.
///
/// Blocking operations suspend the returned future, never the thread. Each
/// takes the caller's cancellation token: a token that is already cancelled
/// fails fast, a token cancelled while the operation waits withdraws it and
/// puts back anything it had taken from the queue. Dropping the future has
/// the same effect as cancelling, and a tuple already handed to a dropped
/// future goes back to the front of the queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Admit one tuple, waiting while the queue is at capacity.
    async fn enqueue(&self, tuple: Tuple, cancel: &CancellationToken) -> Result<(), QueueError>;

    /// Admit every row of a pre-batched tuple, in order.
    async fn enqueue_many(&self, batch: Tuple, cancel: &CancellationToken)
    -> Result<(), QueueError>;

    /// Remove the oldest tuple, waiting while the queue is empty.
    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Tuple, QueueError>;

    /// Remove the `n` oldest tuples and return them as one padded batch.
    async fn dequeue_many(&self, n: usize, cancel: &CancellationToken)
    -> Result<Tuple, QueueError>;

    /// Stop admitting tuples. With `cancel_pending`, every waiting operation
    /// fails immediately; otherwise the close takes effect after enqueues that
    /// are already waiting.
    ///
    /// Once called, the close happens even if the returned future is dropped.
    async fn close(&self, cancel_pending: bool) -> Result<(), QueueError>;

    /// Number of queued tuples. Best effort under concurrency.
    fn size(&self) -> usize;

    /// Best effort under concurrency.
    fn is_closed(&self) -> bool;

    fn stats(&self) -> QueueStats;
}
