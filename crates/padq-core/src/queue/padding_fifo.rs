//! PaddingFifoQueue: bounded FIFO queue with padded batch dequeue.
//!
//! Every blocking operation becomes an [`Attempt`] in one of two ledgers
//! (enqueue or dequeue). Whenever the store, the closed flag or a ledger
//! changes, [`QueueState::flush`] re-runs the ledgers head first until a full
//! pass makes no progress. Finished attempts are turned into completions under
//! the lock and fired after it is released. Tuples whose caller went away
//! before taking delivery are put back at the front of the store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::attempt::{
    Action, Attempt, AttemptKind, Completion, Delivery, Ledger, Reply, RunResult, fire_all,
};
use super::padding::{assemble_batch, empty_batch};
use super::store::ElementStore;
use super::Queue;
use crate::domain::{AttemptId, QueueSpec, Tuple};
use crate::error::QueueError;
use crate::observability::QueueStats;

/// Everything guarded by the queue lock.
struct QueueState {
    spec: Arc<QueueSpec>,
    store: ElementStore,
    enqueues: Ledger,
    dequeues: Ledger,
    closed: bool,
    /// Set once a restoration failed; the queue no longer guarantees order.
    data_loss: Option<QueueError>,
}

impl QueueState {
    fn new(spec: Arc<QueueSpec>) -> Self {
        Self {
            store: ElementStore::new(spec.num_components()),
            spec,
            enqueues: Ledger::default(),
            dequeues: Ledger::default(),
            closed: false,
            data_loss: None,
        }
    }

    fn ledger_mut(&mut self, action: Action) -> &mut Ledger {
        match action {
            Action::Enqueue => &mut self.enqueues,
            Action::Dequeue => &mut self.dequeues,
        }
    }

    fn ensure_intact(&self) -> Result<(), QueueError> {
        match &self.data_loss {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn has_room(&self) -> bool {
        self.spec.bound().is_none_or(|cap| self.store.len() < cap)
    }

    /// Re-run both ledgers until nothing moves.
    fn flush(&mut self) -> Vec<Completion> {
        let mut done = Vec::new();
        loop {
            let mut changed = self.try_attempts(Action::Enqueue, &mut done);
            changed |= self.try_attempts(Action::Dequeue, &mut done);
            if !changed {
                break;
            }
        }
        done
    }

    /// Serve one ledger from its head. Later attempts only run once every
    /// earlier one has completed.
    fn try_attempts(&mut self, action: Action, done: &mut Vec<Completion>) -> bool {
        let mut progress = false;
        while let Some(mut attempt) = self.ledger_mut(action).pop_front() {
            match self.run(&mut attempt) {
                RunResult::Complete => {
                    tracing::debug!(queue = %self.spec.name, attempt = %attempt.id, "attempt complete");
                    done.push(attempt.into_completion());
                    progress = true;
                }
                RunResult::Progress => {
                    self.ledger_mut(action).push_front(attempt);
                    progress = true;
                    break;
                }
                RunResult::NoProgress => {
                    self.ledger_mut(action).push_front(attempt);
                    break;
                }
            }
        }
        progress
    }

    fn run(&mut self, attempt: &mut Attempt) -> RunResult {
        match &mut attempt.kind {
            AttemptKind::Enqueue { rows } => {
                if self.closed {
                    attempt.finish(Err(QueueError::Cancelled(format!(
                        "queue '{}' is closed",
                        self.spec.name
                    ))));
                    return RunResult::Complete;
                }
                let mut result = RunResult::NoProgress;
                while !rows.is_empty() && self.has_room() {
                    let Some(row) = rows.pop_front() else { break };
                    if let Err(err) = self.store.push_back(row) {
                        attempt.finish(Err(err));
                        return RunResult::Complete;
                    }
                    result = RunResult::Progress;
                }
                if rows.is_empty() {
                    attempt.finish(Ok(Delivery::Done));
                    return RunResult::Complete;
                }
                result
            }
            AttemptKind::Close => {
                if !self.closed {
                    self.closed = true;
                    tracing::info!(queue = %self.spec.name, size = self.store.len(), "queue closed");
                }
                attempt.finish(Ok(Delivery::Done));
                RunResult::Complete
            }
            AttemptKind::Dequeue => {
                if let Some(tuple) = self.store.pop_front() {
                    attempt.finish(Ok(Delivery::Tuple(tuple)));
                    RunResult::Complete
                } else if self.closed {
                    attempt.finish(Err(self.insufficient(1)));
                    RunResult::Complete
                } else {
                    RunResult::NoProgress
                }
            }
            AttemptKind::DequeueMany { requested, collected } => {
                let requested = *requested;
                let needed = requested - collected.len();
                if self.closed && self.store.len() < needed {
                    let err = self.insufficient(needed);
                    let partial = attempt.take_collected();
                    let outcome = match self.restore(partial) {
                        Ok(()) => err,
                        Err(data_loss) => data_loss,
                    };
                    attempt.finish(Err(outcome));
                    return RunResult::Complete;
                }

                let mut result = RunResult::NoProgress;
                while collected.len() < requested {
                    let Some(tuple) = self.store.pop_front() else { break };
                    collected.push(tuple);
                    result = RunResult::Progress;
                }
                if collected.len() < requested {
                    return result;
                }

                let tuples = std::mem::take(collected);
                let outcome = assemble_batch(&self.spec, &tuples).map(|batch| Delivery::Batch {
                    batch,
                    sources: tuples,
                });
                attempt.finish(outcome);
                RunResult::Complete
            }
        }
    }

    fn insufficient(&self, requested: usize) -> QueueError {
        QueueError::OutOfRange(format!(
            "queue '{}' is closed and has insufficient elements (requested {requested}, current size {})",
            self.spec.name,
            self.store.len()
        ))
    }

    /// Put partially collected tuples back at the front so the store looks as
    /// if they had never been popped.
    fn restore(&mut self, collected: Vec<Tuple>) -> Result<(), QueueError> {
        let mut failure = None;
        for tuple in collected.into_iter().rev() {
            if let Err(err) = self.store.push_front(tuple) {
                failure.get_or_insert(err);
            }
        }
        let Some(cause) = failure else {
            return Ok(());
        };
        let err = QueueError::DataLoss(format!(
            "failed to restore element from partially-dequeued batch to queue '{}': {cause}",
            self.spec.name
        ));
        tracing::warn!(queue = %self.spec.name, error = %err, "queue order can no longer be guaranteed");
        self.data_loss = Some(err.clone());
        Err(err)
    }

    /// Withdraw one attempt, restoring anything it had collected. Close
    /// attempts cannot be withdrawn.
    fn cancel(&mut self, id: AttemptId) -> Vec<Completion> {
        if self
            .enqueues
            .get(id)
            .is_some_and(|attempt| matches!(attempt.kind, AttemptKind::Close))
        {
            return Vec::new();
        }
        let attempt = self
            .dequeues
            .remove(id)
            .or_else(|| self.enqueues.remove(id));
        let Some(mut attempt) = attempt else {
            return Vec::new();
        };
        tracing::debug!(queue = %self.spec.name, attempt = %id, "attempt cancelled");
        let cancelled = attempt.action().cancelled();
        let partial = attempt.take_collected();
        let outcome = match self.restore(partial) {
            Ok(()) => cancelled,
            Err(data_loss) => data_loss,
        };
        attempt.finish(Err(outcome));

        let mut done = vec![attempt.into_completion()];
        done.extend(self.flush());
        done
    }

    /// Close now and fail every pending attempt.
    fn close_and_cancel(&mut self) -> Vec<Completion> {
        self.closed = true;
        tracing::info!(
            queue = %self.spec.name,
            pending_enqueues = self.enqueues.len(),
            pending_dequeues = self.dequeues.len(),
            "queue closed, cancelling pending attempts"
        );

        let mut done = Vec::new();
        for mut attempt in self.enqueues.drain() {
            let outcome = match attempt.kind {
                AttemptKind::Close => Ok(Delivery::Done),
                _ => Err(QueueError::Cancelled(format!(
                    "enqueue operation was cancelled: queue '{}' is closed",
                    self.spec.name
                ))),
            };
            attempt.finish(outcome);
            done.push(attempt.into_completion());
        }

        // Newest first, so the oldest attempt's elements end up frontmost.
        let mut dequeued = Vec::new();
        for mut attempt in self.dequeues.drain().into_iter().rev() {
            let partial = attempt.take_collected();
            let outcome = match self.restore(partial) {
                Ok(()) => Action::Dequeue.cancelled(),
                Err(data_loss) => data_loss,
            };
            attempt.finish(Err(outcome));
            dequeued.push(attempt.into_completion());
        }
        dequeued.reverse();
        done.extend(dequeued);
        done
    }
}

/// Bounded FIFO queue of fixed-arity tuples whose `dequeue_many` zero-pads
/// free dimensions up to the batch maximum.
///
/// Shared between producers and consumers through an `Arc`.
pub struct PaddingFifoQueue {
    spec: Arc<QueueSpec>,
    state: Mutex<QueueState>,
}

impl PaddingFifoQueue {
    pub fn new(spec: QueueSpec) -> Result<Self, QueueError> {
        spec.validate()?;
        let spec = Arc::new(spec);
        tracing::debug!(
            queue = %spec.name,
            capacity = spec.capacity,
            components = spec.num_components(),
            "queue created"
        );
        Ok(Self {
            state: Mutex::new(QueueState::new(Arc::clone(&spec))),
            spec,
        })
    }

    pub fn spec(&self) -> &QueueSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Whether `requested` describes this queue (same capacity and dtypes,
    /// compatible shapes).
    pub fn matches_spec(&self, requested: &QueueSpec) -> Result<(), QueueError> {
        self.spec.matches(requested)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an attempt, drive the scheduler once, then wait for the
    /// attempt's completion or the caller's cancellation.
    async fn submit(&self, kind: AttemptKind, cancel: &CancellationToken) -> Reply {
        let action = kind.action();
        if cancel.is_cancelled() {
            return Err(action.cancelled());
        }

        let id = AttemptId::generate();
        let is_close = matches!(kind, AttemptKind::Close);
        let (tx, rx) = oneshot::channel();
        let completions = {
            let mut state = self.lock();
            if !is_close {
                state.ensure_intact()?;
            }
            state.ledger_mut(action).push_back(Attempt::new(id, kind, tx));
            tracing::debug!(queue = %self.spec.name, attempt = %id, ?action, "attempt registered");
            state.flush()
        };
        self.deliver(completions);

        let mut pending = PendingAttempt {
            queue: self,
            id,
            withdrawable: !is_close,
            rx,
            settled: false,
        };
        let reply = tokio::select! {
            biased;
            reply = &mut pending.rx => reply,
            _ = cancel.cancelled() => {
                self.cancel_attempt(id);
                (&mut pending.rx).await
            }
        };
        pending.settled = true;
        reply.map_err(|_| QueueError::Internal(format!("attempt {id} dropped without a reply")))?
    }

    fn cancel_attempt(&self, id: AttemptId) {
        let completions = self.lock().cancel(id);
        self.deliver(completions);
    }

    /// Fire completions, returning tuples nobody took delivery of to the front
    /// of the store. Putting them back can complete further attempts.
    fn deliver(&self, mut completions: Vec<Completion>) {
        loop {
            let undelivered = fire_all(completions);
            if undelivered.is_empty() {
                return;
            }
            completions = self.give_back(undelivered);
        }
    }

    fn give_back(&self, rows: Vec<Tuple>) -> Vec<Completion> {
        let mut state = self.lock();
        // A failed restore poisons the queue and is logged there.
        let _ = state.restore(rows);
        state.flush()
    }
}

/// Keeps a waiting caller's claim on its attempt. If the waiting future is
/// dropped before it settles, the attempt is withdrawn and anything already
/// handed to it goes back into the store.
struct PendingAttempt<'a> {
    queue: &'a PaddingFifoQueue,
    id: AttemptId,
    /// False for close, which is one-way once registered.
    withdrawable: bool,
    rx: oneshot::Receiver<Reply>,
    settled: bool,
}

impl Drop for PendingAttempt<'_> {
    fn drop(&mut self) {
        if self.settled || !self.withdrawable {
            return;
        }
        // After close() a late completion fails to send and its firer puts
        // the tuples back; one that already arrived is taken here.
        self.rx.close();
        if let Ok(Ok(delivery)) = self.rx.try_recv() {
            let rows = delivery.into_rows();
            if !rows.is_empty() {
                tracing::debug!(attempt = %self.id, rows = rows.len(), "returning undelivered tuples");
                let completions = self.queue.give_back(rows);
                self.queue.deliver(completions);
            }
        }
        self.queue.cancel_attempt(self.id);
    }
}

fn expect_tuple(delivery: Delivery) -> Result<Tuple, QueueError> {
    match delivery {
        Delivery::Tuple(tuple) | Delivery::Batch { batch: tuple, .. } => Ok(tuple),
        Delivery::Done => Err(QueueError::Internal(
            "dequeue completed without a tuple".to_string(),
        )),
    }
}

#[async_trait]
impl Queue for PaddingFifoQueue {
    async fn enqueue(&self, tuple: Tuple, cancel: &CancellationToken) -> Result<(), QueueError> {
        self.spec.validate_tuple(&tuple)?;
        let rows = VecDeque::from([tuple]);
        self.submit(AttemptKind::Enqueue { rows }, cancel).await?;
        Ok(())
    }

    async fn enqueue_many(&self, batch: Tuple, cancel: &CancellationToken) -> Result<(), QueueError> {
        let batch_size = self.spec.validate_batch_tuple(&batch)?;
        if batch_size == 0 {
            return Ok(());
        }
        let rows = (0..batch_size)
            .map(|index| {
                batch
                    .iter()
                    .map(|component| {
                        component.row(index).ok_or_else(|| {
                            QueueError::Internal(format!("batch has no row {index}"))
                        })
                    })
                    .collect::<Result<Tuple, QueueError>>()
            })
            .collect::<Result<VecDeque<Tuple>, QueueError>>()?;
        self.submit(AttemptKind::Enqueue { rows }, cancel).await?;
        Ok(())
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Tuple, QueueError> {
        expect_tuple(self.submit(AttemptKind::Dequeue, cancel).await?)
    }

    async fn dequeue_many(&self, n: usize, cancel: &CancellationToken) -> Result<Tuple, QueueError> {
        if n == 0 {
            return Ok(empty_batch(&self.spec));
        }
        let kind = AttemptKind::DequeueMany {
            requested: n,
            collected: Vec::with_capacity(n),
        };
        expect_tuple(self.submit(kind, cancel).await?)
    }

    async fn close(&self, cancel_pending: bool) -> Result<(), QueueError> {
        if cancel_pending {
            let completions = self.lock().close_and_cancel();
            self.deliver(completions);
            return Ok(());
        }
        self.submit(AttemptKind::Close, &CancellationToken::new())
            .await
            .map(|_| ())
    }

    fn size(&self) -> usize {
        self.lock().store.len()
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            size: state.store.len(),
            pending_enqueues: state.enqueues.len(),
            pending_dequeues: state.dequeues.len(),
            closed: state.closed,
        }
    }
}
