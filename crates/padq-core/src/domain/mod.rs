//! Domain model: dtypes, tensors, partial shapes, queue spec, ids.

pub mod ids;
pub mod shape;
pub mod spec;
pub mod tensor;

pub use ids::AttemptId;
pub use shape::PartialShape;
pub use spec::{DEFAULT_QUEUE_NAME, QueueSpec};
pub use tensor::{DType, Element, Tensor, Tuple, shape_string};
