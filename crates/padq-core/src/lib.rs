//! padq-core
//!
//! A bounded, thread-safe FIFO queue of fixed-arity tuples. Each tuple
//! component is an n-dimensional tensor whose free dimensions may vary from
//! tuple to tuple; `dequeue_many` zero-pads a batch of them into one
//! rectangular tensor per component.
//!
//! # Modules
//! - **domain**: dtypes, tensors, partial shapes, queue spec, ids
//! - **queue**: the `Queue` port and `PaddingFifoQueue`
//! - **observability**: point-in-time queue stats
//! - **error**: `QueueError`

pub mod domain;
pub mod error;
pub mod observability;
pub mod queue;

pub use domain::{DType, Element, PartialShape, QueueSpec, Tensor, Tuple};
pub use error::QueueError;
pub use observability::QueueStats;
pub use queue::{PaddingFifoQueue, Queue};
pub use tokio_util::sync::CancellationToken;
