//! Pending operations and the ledgers that order them.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::domain::{AttemptId, Tuple};
use crate::error::QueueError;

/// Outcome of re-running one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunResult {
    /// Conditions unmet; the attempt stays where it is.
    NoProgress,
    /// Partial progress; the attempt stays and is revisited on the next trigger.
    Progress,
    /// Finished with an outcome; remove it and fire its completion.
    Complete,
}

/// Which ledger an attempt waits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Enqueue,
    Dequeue,
}

impl Action {
    pub(crate) fn cancelled(self) -> QueueError {
        match self {
            Action::Enqueue => QueueError::Cancelled("enqueue operation was cancelled".to_string()),
            Action::Dequeue => QueueError::Cancelled("dequeue operation was cancelled".to_string()),
        }
    }
}

/// Value handed back to the waiting caller.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// Enqueue or close took effect.
    Done,
    Tuple(Tuple),
    /// Padded batch plus the tuples it was built from, kept until the caller
    /// has the batch.
    Batch { batch: Tuple, sources: Vec<Tuple> },
}

impl Delivery {
    /// Tuples that must go back into the store if this delivery never
    /// reaches its caller, in pop order.
    pub(crate) fn into_rows(self) -> Vec<Tuple> {
        match self {
            Delivery::Done => Vec::new(),
            Delivery::Tuple(tuple) => vec![tuple],
            Delivery::Batch { sources, .. } => sources,
        }
    }
}

pub(crate) type Reply = Result<Delivery, QueueError>;

#[derive(Debug)]
pub(crate) enum AttemptKind {
    /// Rows still waiting for admission, oldest first.
    Enqueue { rows: VecDeque<Tuple> },
    /// Ordered behind earlier enqueues.
    Close,
    Dequeue,
    /// `collected` is in pop order.
    DequeueMany { requested: usize, collected: Vec<Tuple> },
}

impl AttemptKind {
    pub(crate) fn action(&self) -> Action {
        match self {
            AttemptKind::Enqueue { .. } | AttemptKind::Close => Action::Enqueue,
            AttemptKind::Dequeue | AttemptKind::DequeueMany { .. } => Action::Dequeue,
        }
    }
}

/// One blocking operation waiting on queue conditions.
#[derive(Debug)]
pub(crate) struct Attempt {
    pub(crate) id: AttemptId,
    pub(crate) kind: AttemptKind,
    reply: oneshot::Sender<Reply>,
    outcome: Option<Reply>,
}

impl Attempt {
    pub(crate) fn new(id: AttemptId, kind: AttemptKind, reply: oneshot::Sender<Reply>) -> Self {
        Self {
            id,
            kind,
            reply,
            outcome: None,
        }
    }

    pub(crate) fn action(&self) -> Action {
        self.kind.action()
    }

    pub(crate) fn finish(&mut self, outcome: Reply) {
        self.outcome = Some(outcome);
    }

    /// Elements popped so far on behalf of this attempt, in pop order.
    pub(crate) fn take_collected(&mut self) -> Vec<Tuple> {
        match &mut self.kind {
            AttemptKind::DequeueMany { collected, .. } => std::mem::take(collected),
            _ => Vec::new(),
        }
    }

    pub(crate) fn into_completion(self) -> Completion {
        let id = self.id;
        let outcome = self.outcome.unwrap_or_else(|| {
            Err(QueueError::Internal(format!(
                "attempt {id} completed without an outcome"
            )))
        });
        Completion {
            id,
            reply: self.reply,
            outcome,
        }
    }
}

/// A finished attempt whose reply has not been sent yet.
///
/// Built under the queue lock, fired after it is released.
#[derive(Debug)]
pub(crate) struct Completion {
    id: AttemptId,
    reply: oneshot::Sender<Reply>,
    outcome: Reply,
}

impl Completion {
    /// Send the outcome. Returns the tuples of a delivery whose caller is
    /// gone; the queue puts them back.
    pub(crate) fn fire(self) -> Vec<Tuple> {
        let Err(outcome) = self.reply.send(self.outcome) else {
            return Vec::new();
        };
        let rows = outcome.map(Delivery::into_rows).unwrap_or_default();
        if rows.is_empty() {
            tracing::debug!(attempt = %self.id, "caller went away before completion");
        } else {
            tracing::warn!(
                attempt = %self.id,
                rows = rows.len(),
                "caller went away before delivery, returning tuples to the queue"
            );
        }
        rows
    }
}

/// Fire in order; undelivered tuples come back oldest first.
pub(crate) fn fire_all(completions: Vec<Completion>) -> Vec<Tuple> {
    completions.into_iter().flat_map(Completion::fire).collect()
}

/// Attempts in registration order.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    attempts: VecDeque<Attempt>,
}

impl Ledger {
    pub(crate) fn len(&self) -> usize {
        self.attempts.len()
    }

    pub(crate) fn push_back(&mut self, attempt: Attempt) {
        self.attempts.push_back(attempt);
    }

    pub(crate) fn push_front(&mut self, attempt: Attempt) {
        self.attempts.push_front(attempt);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Attempt> {
        self.attempts.pop_front()
    }

    pub(crate) fn get(&self, id: AttemptId) -> Option<&Attempt> {
        self.attempts.iter().find(|a| a.id == id)
    }

    pub(crate) fn remove(&mut self, id: AttemptId) -> Option<Attempt> {
        let index = self.attempts.iter().position(|a| a.id == id)?;
        self.attempts.remove(index)
    }

    /// Every attempt, oldest first, leaving the ledger empty.
    pub(crate) fn drain(&mut self) -> Vec<Attempt> {
        self.attempts.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DType, Tensor};

    fn attempt(kind: AttemptKind) -> (Attempt, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Attempt::new(AttemptId::generate(), kind, tx), rx)
    }

    #[test]
    fn kinds_map_to_their_ledger() {
        assert_eq!(AttemptKind::Close.action(), Action::Enqueue);
        assert_eq!(
            AttemptKind::DequeueMany { requested: 2, collected: vec![] }.action(),
            Action::Dequeue
        );
    }

    #[test]
    fn ledger_removes_by_id_and_keeps_order() {
        let mut ledger = Ledger::default();
        let (a, _ra) = attempt(AttemptKind::Dequeue);
        let (b, _rb) = attempt(AttemptKind::Dequeue);
        let (c, _rc) = attempt(AttemptKind::Dequeue);
        let (ida, idb, idc) = (a.id, b.id, c.id);
        ledger.push_back(a);
        ledger.push_back(b);
        ledger.push_back(c);

        assert_eq!(ledger.remove(idb).map(|x| x.id), Some(idb));
        assert!(ledger.remove(idb).is_none());
        let ids: Vec<AttemptId> = ledger.drain().into_iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![ida, idc]);
        assert_eq!(ledger.len(), 0);
    }

    #[test]
    fn completion_delivers_outcome() {
        let (mut a, mut rx) = attempt(AttemptKind::Close);
        a.finish(Ok(Delivery::Done));
        a.into_completion().fire();
        assert!(matches!(rx.try_recv(), Ok(Ok(Delivery::Done))));
    }

    #[test]
    fn undelivered_batch_hands_back_its_sources() {
        let (mut a, rx) = attempt(AttemptKind::DequeueMany { requested: 2, collected: vec![] });
        let sources = vec![vec![Tensor::scalar(1i32)], vec![Tensor::scalar(2i32)]];
        a.finish(Ok(Delivery::Batch {
            batch: vec![Tensor::zeros(DType::I32, &[2])],
            sources: sources.clone(),
        }));
        drop(rx);
        assert_eq!(a.into_completion().fire(), sources);
    }

    #[test]
    fn undelivered_error_hands_back_nothing() {
        let (mut a, rx) = attempt(AttemptKind::Dequeue);
        a.finish(Err(Action::Dequeue.cancelled()));
        drop(rx);
        assert!(a.into_completion().fire().is_empty());
    }

    #[test]
    fn completion_without_outcome_is_internal() {
        let (a, mut rx) = attempt(AttemptKind::Dequeue);
        a.into_completion().fire();
        assert!(matches!(rx.try_recv(), Ok(Err(QueueError::Internal(_)))));
    }
}
