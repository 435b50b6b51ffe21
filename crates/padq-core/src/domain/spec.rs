//! Queue construction spec and tuple admission checks.

use serde::{Deserialize, Serialize};

use super::shape::{PartialShape, shape_list_string};
use super::tensor::{DType, Tensor, shape_string};
use crate::error::QueueError;

pub const DEFAULT_QUEUE_NAME: &str = "padding_fifo_queue";

fn default_name() -> String {
    DEFAULT_QUEUE_NAME.to_string()
}

/// Everything that identifies a queue's contract: capacity, component dtypes
/// and component shapes.
///
/// `capacity <= 0` means unbounded. `name` only shows up in messages and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSpec {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub capacity: i64,

    pub dtypes: Vec<DType>,

    pub shapes: Vec<PartialShape>,
}

impl QueueSpec {
    pub fn new(capacity: i64, dtypes: Vec<DType>, shapes: Vec<PartialShape>) -> Self {
        Self {
            name: default_name(),
            capacity,
            dtypes,
            shapes,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Parse a spec from JSON, e.g.
    /// `{"capacity": 8, "dtypes": ["i32"], "shapes": [[null]]}`.
    pub fn from_json(json: &str) -> Result<Self, QueueError> {
        serde_json::from_str(json)
            .map_err(|e| QueueError::InvalidArgument(format!("invalid queue spec: {e}")))
    }

    pub fn num_components(&self) -> usize {
        self.dtypes.len()
    }

    /// Capacity bound, `None` when unbounded.
    pub fn bound(&self) -> Option<usize> {
        usize::try_from(self.capacity).ok().filter(|&c| c > 0)
    }

    /// Construction-time checks.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.dtypes.is_empty() {
            return Err(QueueError::InvalidArgument(format!(
                "empty component types for queue '{}'",
                self.name
            )));
        }
        if self.dtypes.len() != self.shapes.len() {
            return Err(QueueError::InvalidArgument(format!(
                "shapes must be provided for all components, but received {} dtypes and {} shapes",
                self.dtypes.len(),
                self.shapes.len()
            )));
        }
        Ok(())
    }

    /// Whether `other` describes the same queue: equal capacity and dtypes,
    /// pairwise compatible shapes.
    pub fn matches(&self, other: &QueueSpec) -> Result<(), QueueError> {
        if self.capacity != other.capacity {
            return Err(QueueError::InvalidArgument(format!(
                "shared queue '{}' has capacity {} but requested capacity was {}",
                self.name, self.capacity, other.capacity
            )));
        }
        if self.dtypes != other.dtypes {
            return Err(QueueError::InvalidArgument(format!(
                "shared queue '{}' has component types {:?} but requested component types were {:?}",
                self.name, self.dtypes, other.dtypes
            )));
        }
        let compatible = self.shapes.len() == other.shapes.len()
            && self
                .shapes
                .iter()
                .zip(&other.shapes)
                .all(|(a, b)| a.is_compatible_with_partial(b));
        if !compatible {
            return Err(QueueError::InvalidArgument(format!(
                "shared queue '{}' has component shapes {} but requested component shapes were {}",
                self.name,
                shape_list_string(&self.shapes),
                shape_list_string(&other.shapes)
            )));
        }
        Ok(())
    }

    /// Admission check for a single tuple.
    pub fn validate_tuple(&self, tuple: &[Tensor]) -> Result<(), QueueError> {
        self.validate_common(tuple)?;
        for (i, (component, declared)) in tuple.iter().zip(&self.shapes).enumerate() {
            if !declared.is_compatible_with(component.shape()) {
                return Err(QueueError::InvalidArgument(format!(
                    "shape mismatch in tuple component {i}. Expected {declared}, got {}",
                    shape_string(component.shape())
                )));
            }
        }
        Ok(())
    }

    /// Admission check for a pre-batched tuple. Returns the batch size.
    pub fn validate_batch_tuple(&self, tuple: &[Tensor]) -> Result<usize, QueueError> {
        self.validate_common(tuple)?;
        let Some(&batch) = tuple.first().and_then(|c| c.shape().first()) else {
            return Err(QueueError::InvalidArgument(
                "batched tuple components need a leading batch dimension".to_string(),
            ));
        };
        for (i, (component, declared)) in tuple.iter().zip(&self.shapes).enumerate() {
            let leading = component.shape().first().copied();
            if leading != Some(batch) {
                return Err(QueueError::InvalidArgument(format!(
                    "all input tensors must have the same size in the 0th dimension. \
                     Component 0 has {batch}, component {i} has shape {}",
                    shape_string(component.shape())
                )));
            }
            let expected = declared.with_batch(batch);
            if !expected.is_compatible_with(component.shape()) {
                return Err(QueueError::InvalidArgument(format!(
                    "shape mismatch in tuple component {i}. Expected {expected}, got {}",
                    shape_string(component.shape())
                )));
            }
        }
        Ok(batch)
    }

    fn validate_common(&self, tuple: &[Tensor]) -> Result<(), QueueError> {
        if tuple.len() != self.num_components() {
            return Err(QueueError::InvalidArgument(format!(
                "wrong number of components in tuple. Expected {}, got {}",
                self.num_components(),
                tuple.len()
            )));
        }
        for (i, (component, &dtype)) in tuple.iter().zip(&self.dtypes).enumerate() {
            if component.dtype() != dtype {
                return Err(QueueError::InvalidArgument(format!(
                    "type mismatch in tuple component {i}. Expected {dtype}, got {}",
                    component.dtype()
                )));
            }
        }
        Ok(())
    }
}
