//! Dtype-tagged tensors.
//!
//! A queue component holds elements of one [`DType`]. [`Tensor`] erases the
//! element type so a tuple can mix components, and [`Element`] brings it back
//! for code that wants to be generic over the element type.

use std::fmt;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Element type of a queue component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::U8 => "u8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An owned n-dimensional buffer tagged with its element type.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Bool(ArrayD<bool>),
    U8(ArrayD<u8>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

/// One queue tuple: one tensor per component.
pub type Tuple = Vec<Tensor>;

/// Bridge between a Rust scalar type and its [`Tensor`] variant.
///
/// `Default` doubles as the zero value used for padding.
pub trait Element: Clone + Default + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn wrap(array: ArrayD<Self>) -> Tensor;

    fn array(tensor: &Tensor) -> Option<&ArrayD<Self>>;
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$variant;

                fn wrap(array: ArrayD<Self>) -> Tensor {
                    Tensor::$variant(array)
                }

                fn array(tensor: &Tensor) -> Option<&ArrayD<Self>> {
                    match tensor {
                        Tensor::$variant(array) => Some(array),
                        _ => None,
                    }
                }
            }

            impl From<ArrayD<$ty>> for Tensor {
                fn from(array: ArrayD<$ty>) -> Self {
                    Tensor::$variant(array)
                }
            }
        )*
    };
}

impl_element!(bool => Bool, u8 => U8, i32 => I32, i64 => I64, f32 => F32, f64 => F64);

/// Runs `$body` with `$t` bound to the Rust type of `$dtype`.
macro_rules! dispatch_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            $crate::domain::DType::Bool => {
                type $t = bool;
                $body
            }
            $crate::domain::DType::U8 => {
                type $t = u8;
                $body
            }
            $crate::domain::DType::I32 => {
                type $t = i32;
                $body
            }
            $crate::domain::DType::I64 => {
                type $t = i64;
                $body
            }
            $crate::domain::DType::F32 => {
                type $t = f32;
                $body
            }
            $crate::domain::DType::F64 => {
                type $t = f64;
                $body
            }
        }
    };
}

pub(crate) use dispatch_dtype;

/// Runs `$body` with `$a` bound to the inner array, whatever its type.
macro_rules! with_array {
    ($tensor:expr, $a:ident => $body:expr) => {
        match $tensor {
            Tensor::Bool($a) => $body,
            Tensor::U8($a) => $body,
            Tensor::I32($a) => $body,
            Tensor::I64($a) => $body,
            Tensor::F32($a) => $body,
            Tensor::F64($a) => $body,
        }
    };
}

impl Tensor {
    /// Zero-filled tensor of the given dtype and shape.
    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        dispatch_dtype!(dtype, T => T::wrap(ArrayD::<T>::from_elem(IxDyn(shape), T::default())))
    }

    /// Builds a tensor from row-major data.
    pub fn from_vec<T: Element>(shape: &[usize], data: Vec<T>) -> Result<Self, QueueError> {
        let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|e| {
            QueueError::InvalidArgument(format!(
                "cannot build {} tensor of shape {}: {e}",
                T::DTYPE,
                shape_string(shape)
            ))
        })?;
        Ok(T::wrap(array))
    }

    pub fn scalar<T: Element>(value: T) -> Self {
        T::wrap(ArrayD::from_elem(IxDyn(&[]), value))
    }

    pub fn dtype(&self) -> DType {
        match self {
            Tensor::Bool(_) => DType::Bool,
            Tensor::U8(_) => DType::U8,
            Tensor::I32(_) => DType::I32,
            Tensor::I64(_) => DType::I64,
            Tensor::F32(_) => DType::F32,
            Tensor::F64(_) => DType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    pub fn rank(&self) -> usize {
        with_array!(self, a => a.ndim())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        with_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed view, `None` if `T` is not this tensor's dtype.
    pub fn view<T: Element>(&self) -> Option<ArrayViewD<'_, T>> {
        T::array(self).map(|a| a.view())
    }

    /// Copy of row `index` along the leading axis.
    ///
    /// `None` for scalars or an out-of-bounds index.
    pub fn row(&self, index: usize) -> Option<Tensor> {
        if self.shape().first().is_none_or(|&rows| index >= rows) {
            return None;
        }
        Some(with_array!(self, a => Tensor::from(a.index_axis(Axis(0), index).to_owned())))
    }
}

/// Renders a concrete shape as `[2,3]`.
pub fn shape_string(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
    format!("[{}]", dims.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_has_requested_dtype_and_shape() {
        let t = Tensor::zeros(DType::F32, &[2, 3]);
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.shape(), &[2, 3]);
        assert!(t.view::<f32>().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn zeros_with_empty_leading_dim_is_empty() {
        let t = Tensor::zeros(DType::I64, &[0, 4]);
        assert!(t.is_empty());
        assert_eq!(t.rank(), 2);
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        let err = Tensor::from_vec(&[2, 2], vec![1i32, 2, 3]).unwrap_err();
        assert!(matches!(err, QueueError::InvalidArgument(_)));
    }

    #[test]
    fn view_is_none_for_other_dtype() {
        let t = Tensor::scalar(7u8);
        assert!(t.view::<i32>().is_none());
        assert_eq!(t.view::<u8>().unwrap()[[]], 7);
    }

    #[test]
    fn row_copies_one_leading_slice() {
        let t = Tensor::from_vec(&[3, 2], vec![1i64, 2, 3, 4, 5, 6]).unwrap();
        let row = t.row(1).unwrap();
        assert_eq!(row.shape(), &[2]);
        assert_eq!(row.view::<i64>().unwrap().as_slice().unwrap(), &[3, 4]);
        assert!(t.row(3).is_none());
        assert!(Tensor::scalar(1.0f64).row(0).is_none());
    }

    #[test]
    fn dtype_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DType::F64).unwrap(), "\"f64\"");
        let d: DType = serde_json::from_str("\"bool\"").unwrap();
        assert_eq!(d, DType::Bool);
    }
}
