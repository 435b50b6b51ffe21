use thiserror::Error;

/// Terminal failure of a queue operation.
///
/// Every operation reports exactly one of these or succeeds. Only
/// [`QueueError::DataLoss`] is fatal to the queue instance; the others end the
/// single operation that observed them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Shape/type/arity mismatch on admission, or a mismatched spec.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The queue is closed and cannot satisfy the request.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Caller-initiated abort, or enqueue into a closed queue.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Partially consumed elements could not be put back. FIFO order is no
    /// longer guaranteed for this queue.
    #[error("data loss: {0}")]
    DataLoss(String),

    /// An invariant the queue maintains itself was violated.
    #[error("internal: {0}")]
    Internal(String),

    /// Unsupported rank or element type in the copy path.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
}

impl QueueError {
    /// True for [`QueueError::DataLoss`], which poisons the queue it came from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::DataLoss(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_data_loss_is_fatal() {
        assert!(QueueError::DataLoss("x".into()).is_fatal());
        assert!(!QueueError::Internal("x".into()).is_fatal());
        assert!(!QueueError::Cancelled("x".into()).is_fatal());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = QueueError::OutOfRange("queue 'q' is closed".into());
        assert_eq!(err.to_string(), "out of range: queue 'q' is closed");
    }
}
