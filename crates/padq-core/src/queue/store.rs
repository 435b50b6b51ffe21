//! Element store: one FIFO container per component.

use std::collections::VecDeque;

use crate::domain::{Tensor, Tuple};
use crate::error::QueueError;

/// N parallel containers holding queued tuples column-wise.
///
/// Invariant: every container has the same length. Callers hold the queue
/// lock for every method here.
#[derive(Debug)]
pub(crate) struct ElementStore {
    components: Vec<VecDeque<Tensor>>,
}

impl ElementStore {
    pub(crate) fn new(num_components: usize) -> Self {
        Self {
            components: (0..num_components).map(|_| VecDeque::new()).collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.components.first().map_or(0, VecDeque::len)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append at the back. All-or-nothing across components.
    pub(crate) fn push_back(&mut self, tuple: Tuple) -> Result<(), QueueError> {
        self.check_arity(&tuple)?;
        for (container, element) in self.components.iter_mut().zip(tuple) {
            container.push_back(element);
        }
        Ok(())
    }

    /// Put a tuple back at the front. All-or-nothing across components.
    pub(crate) fn push_front(&mut self, tuple: Tuple) -> Result<(), QueueError> {
        self.check_arity(&tuple)?;
        for (container, element) in self.components.iter_mut().zip(tuple) {
            container.push_front(element);
        }
        Ok(())
    }

    /// Remove the oldest tuple.
    pub(crate) fn pop_front(&mut self) -> Option<Tuple> {
        if self.is_empty() {
            return None;
        }
        self.components
            .iter_mut()
            .map(VecDeque::pop_front)
            .collect()
    }

    fn check_arity(&self, tuple: &Tuple) -> Result<(), QueueError> {
        if tuple.len() != self.components.len() {
            return Err(QueueError::Internal(format!(
                "tuple has {} components but the store holds {}",
                tuple.len(),
                self.components.len()
            )));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn component_lens(&self) -> Vec<usize> {
        self.components.iter().map(VecDeque::len).collect()
    }
}
