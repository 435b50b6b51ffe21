//! Padding assembler.
//!
//! Turns a list of individually shaped tuples into one rectangular tensor per
//! component. Free dimensions are sized to the largest element in the batch;
//! every element is copied into the leading region of its slot and the rest
//! of the slot stays zero.

use ndarray::{ArrayD, Axis, Dimension, Ix0, Ix1, Ix2, Ix3, Ix4, IxDyn, Slice};

use crate::domain::tensor::dispatch_dtype;
use crate::domain::{Element, PartialShape, QueueSpec, Tensor, Tuple, shape_string};
use crate::error::QueueError;

/// Highest element rank the padded copy handles.
pub const MAX_PADDED_RANK: usize = 4;

/// Batch of zero tuples: one tensor per component with a leading dimension
/// of 0 and free dimensions resolved to 0.
pub fn empty_batch(spec: &QueueSpec) -> Tuple {
    spec.dtypes
        .iter()
        .zip(&spec.shapes)
        .map(|(&dtype, shape)| Tensor::zeros(dtype, &shape.with_batch(0).zeroed()))
        .collect()
}

/// Assemble `tuples` (all admitted under `spec`) into one batched tuple.
pub fn assemble_batch(spec: &QueueSpec, tuples: &[Tuple]) -> Result<Tuple, QueueError> {
    let mut batched = Vec::with_capacity(spec.num_components());
    for (component, (&dtype, declared)) in spec.dtypes.iter().zip(&spec.shapes).enumerate() {
        let elements = tuples
            .iter()
            .map(|tuple| {
                tuple.get(component).ok_or_else(|| {
                    QueueError::Internal(format!(
                        "tuple of {} components has no component {component}",
                        tuple.len()
                    ))
                })
            })
            .collect::<Result<Vec<&Tensor>, QueueError>>()?;
        let target = target_shape(declared, &elements);
        let tensor = dispatch_dtype!(dtype, T => {
            assemble_component::<T>(&elements, &target, declared.is_fully_defined())?
        });
        batched.push(tensor);
    }
    Ok(batched)
}

/// Fixed dimensions keep their declared size; free ones take the batch max.
fn target_shape(declared: &PartialShape, elements: &[&Tensor]) -> Vec<usize> {
    declared
        .dims()
        .iter()
        .enumerate()
        .map(|(axis, dim)| {
            dim.unwrap_or_else(|| {
                elements
                    .iter()
                    .filter_map(|e| e.shape().get(axis).copied())
                    .max()
                    .unwrap_or(0)
            })
        })
        .collect()
}

fn assemble_component<T: Element>(
    elements: &[&Tensor],
    target: &[usize],
    fully_defined: bool,
) -> Result<Tensor, QueueError> {
    if !fully_defined && target.len() > MAX_PADDED_RANK {
        return Err(QueueError::Unimplemented(format!(
            "padded copy does not handle rank {}",
            target.len()
        )));
    }

    let mut shape = Vec::with_capacity(target.len() + 1);
    shape.push(elements.len());
    shape.extend_from_slice(target);
    // Allocated zeroed, so padded slots need no separate fill.
    let mut parent = ArrayD::<T>::from_elem(IxDyn(&shape), T::default());

    for (index, element) in elements.iter().enumerate() {
        let element = T::array(element).ok_or_else(|| {
            QueueError::Internal(format!(
                "expected a {} element, got {}",
                T::DTYPE,
                element.dtype()
            ))
        })?;
        if fully_defined || element.shape() == target {
            copy_element_to_slice(element, &mut parent, index)?;
        } else {
            copy_element_to_larger_slice(element, &mut parent, index)?;
        }
    }
    Ok(T::wrap(parent))
}

/// Copy an element that fills its slot exactly.
fn copy_element_to_slice<T: Element>(
    element: &ArrayD<T>,
    parent: &mut ArrayD<T>,
    index: usize,
) -> Result<(), QueueError> {
    let mut slot = parent.index_axis_mut(Axis(0), index);
    if slot.shape() != element.shape() {
        return Err(QueueError::Internal(format!(
            "cannot copy element of shape {} into batch slot of shape {}",
            shape_string(element.shape()),
            shape_string(slot.shape())
        )));
    }
    slot.assign(element);
    Ok(())
}

/// Copy an element into the leading region of a possibly larger slot.
fn copy_element_to_larger_slice<T: Element>(
    element: &ArrayD<T>,
    parent: &mut ArrayD<T>,
    index: usize,
) -> Result<(), QueueError> {
    if parent.ndim() != element.ndim() + 1 {
        return Err(QueueError::Internal(format!(
            "mismatched ranks: element has rank {} but its batch has rank {} (should be {})",
            element.ndim(),
            parent.ndim(),
            element.ndim() + 1
        )));
    }
    match element.ndim() {
        0 => copy_with_rank::<T, Ix0>(element, parent, index),
        1 => copy_with_rank::<T, Ix1>(element, parent, index),
        2 => copy_with_rank::<T, Ix2>(element, parent, index),
        3 => copy_with_rank::<T, Ix3>(element, parent, index),
        4 => copy_with_rank::<T, Ix4>(element, parent, index),
        rank => Err(QueueError::Unimplemented(format!(
            "padded copy does not handle rank {rank}"
        ))),
    }
}

fn copy_with_rank<T: Element, D: Dimension>(
    element: &ArrayD<T>,
    parent: &mut ArrayD<T>,
    index: usize,
) -> Result<(), QueueError> {
    let batch = parent.shape().first().copied().unwrap_or(0);
    let slot_len = if batch == 0 { 0 } else { parent.len() / batch };
    let slot_shape = parent.shape().get(1..).unwrap_or_default().to_vec();
    let overflow = element.len() > slot_len
        || element
            .shape()
            .iter()
            .zip(&slot_shape)
            .any(|(have, room)| have > room);
    if overflow {
        return Err(QueueError::Internal(format!(
            "cannot copy slice: element of shape {} does not fit its batch slot of shape {}",
            shape_string(element.shape()),
            shape_string(&slot_shape)
        )));
    }

    let element = element
        .view()
        .into_dimensionality::<D>()
        .map_err(|e| QueueError::Internal(format!("element view: {e}")))?;
    let mut slot = parent
        .index_axis_mut(Axis(0), index)
        .into_dimensionality::<D>()
        .map_err(|e| QueueError::Internal(format!("batch slot view: {e}")))?;
    let extent = element.raw_dim();
    slot.slice_each_axis_mut(|axis| Slice::from(0..extent[axis.axis.index()]))
        .assign(&element);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DType;

    fn row(values: &[i32]) -> Tuple {
        vec![Tensor::from_vec(&[values.len()], values.to_vec()).unwrap()]
    }

    fn ragged_spec() -> QueueSpec {
        QueueSpec::new(0, vec![DType::I32], vec![PartialShape::new(vec![None])])
    }

    #[test]
    fn pads_ragged_rows_to_longest() {
        let tuples = vec![row(&[1, 2]), row(&[3, 4, 5]), row(&[6])];
        let batch = assemble_batch(&ragged_spec(), &tuples).unwrap();
        let out = batch[0].view::<i32>().unwrap();
        assert_eq!(out.shape(), &[3, 3]);
        assert_eq!(
            out.iter().copied().collect::<Vec<_>>(),
            vec![1, 2, 0, 3, 4, 5, 6, 0, 0]
        );
    }

    #[test]
    fn pads_two_free_dimensions() {
        let spec = QueueSpec::new(0, vec![DType::F64], vec![PartialShape::new(vec![None, None])]);
        let a = vec![Tensor::from_vec(&[1, 2], vec![1.0f64, 2.0]).unwrap()];
        let b = vec![Tensor::from_vec(&[2, 1], vec![3.0f64, 4.0]).unwrap()];
        let batch = assemble_batch(&spec, &[a, b]).unwrap();
        let out = batch[0].view::<f64>().unwrap();
        assert_eq!(out.shape(), &[2, 2, 2]);
        assert_eq!(
            out.iter().copied().collect::<Vec<_>>(),
            vec![1.0, 2.0, 0.0, 0.0, 3.0, 0.0, 4.0, 0.0]
        );
    }

    #[test]
    fn fixed_components_are_stacked() {
        let spec = QueueSpec::new(
            0,
            vec![DType::U8, DType::Bool],
            vec![PartialShape::fixed(&[2]), PartialShape::scalar()],
        );
        let t = |a: u8, flag: bool| {
            vec![
                Tensor::from_vec(&[2], vec![a, a + 1]).unwrap(),
                Tensor::scalar(flag),
            ]
        };
        let batch = assemble_batch(&spec, &[t(1, true), t(5, false)]).unwrap();
        assert_eq!(batch[0].shape(), &[2, 2]);
        assert_eq!(
            batch[0].view::<u8>().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![1, 2, 5, 6]
        );
        assert_eq!(
            batch[1].view::<bool>().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![true, false]
        );
    }

    #[test]
    fn mixed_fixed_and_free_dimensions() {
        let spec = QueueSpec::new(0, vec![DType::I32], vec![PartialShape::new(vec![None, Some(2)])]);
        let a = vec![Tensor::from_vec(&[1, 2], vec![1i32, 2]).unwrap()];
        let b = vec![Tensor::from_vec(&[3, 2], vec![3i32, 4, 5, 6, 7, 8]).unwrap()];
        let batch = assemble_batch(&spec, &[a, b]).unwrap();
        let out = batch[0].view::<i32>().unwrap();
        assert_eq!(out.shape(), &[2, 3, 2]);
        assert_eq!(
            out.iter().copied().collect::<Vec<_>>(),
            vec![1, 2, 0, 0, 0, 0, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn all_empty_rows_give_zero_width_batch() {
        let batch = assemble_batch(&ragged_spec(), &[row(&[]), row(&[])]).unwrap();
        assert_eq!(batch[0].shape(), &[2, 0]);
    }

    #[test]
    fn padded_rank_above_four_is_unimplemented() {
        let spec = QueueSpec::new(0, vec![DType::I32], vec![PartialShape::new(vec![None; 5])]);
        let element = vec![Tensor::zeros(DType::I32, &[1, 1, 1, 1, 1])];
        let err = assemble_batch(&spec, &[element]).unwrap_err();
        assert!(matches!(err, QueueError::Unimplemented(_)));
    }

    #[test]
    fn fixed_rank_above_four_is_copied_directly() {
        let spec = QueueSpec::new(0, vec![DType::I32], vec![PartialShape::fixed(&[1, 1, 1, 1, 2])]);
        let element = vec![Tensor::from_vec(&[1, 1, 1, 1, 2], vec![7i32, 8]).unwrap()];
        let batch = assemble_batch(&spec, &[element]).unwrap();
        assert_eq!(batch[0].shape(), &[1, 1, 1, 1, 1, 2]);
    }

    #[test]
    fn oversized_element_is_internal_error() {
        let mut parent = ArrayD::<i32>::zeros(IxDyn(&[2, 2]));
        let element = ArrayD::<i32>::zeros(IxDyn(&[3]));
        let err = copy_element_to_larger_slice(&element, &mut parent, 0).unwrap_err();
        assert!(matches!(err, QueueError::Internal(_)));
        assert!(parent.iter().all(|&v| v == 0));
    }

    #[test]
    fn per_axis_overflow_is_internal_error() {
        // Fewer entries than the slot holds, but too wide on one axis.
        let mut parent = ArrayD::<i32>::zeros(IxDyn(&[1, 4, 1]));
        let element = ArrayD::<i32>::zeros(IxDyn(&[1, 2]));
        let err = copy_element_to_larger_slice(&element, &mut parent, 0).unwrap_err();
        assert!(matches!(err, QueueError::Internal(_)));
    }

    #[test]
    fn rank_mismatch_is_internal_error() {
        let mut parent = ArrayD::<i32>::zeros(IxDyn(&[1, 4]));
        let element = ArrayD::<i32>::zeros(IxDyn(&[1, 1]));
        let err = copy_element_to_larger_slice(&element, &mut parent, 0).unwrap_err();
        assert!(matches!(err, QueueError::Internal(_)));
    }

    #[test]
    fn dtype_mismatch_is_internal_error() {
        let err = assemble_batch(&ragged_spec(), &[vec![Tensor::scalar(1.0f32)]]).unwrap_err();
        assert!(matches!(err, QueueError::Internal(_)));
    }

    #[test]
    fn empty_batch_resolves_free_dimensions_to_zero() {
        let spec = QueueSpec::new(
            0,
            vec![DType::F32, DType::I64],
            vec![PartialShape::new(vec![None, Some(3)]), PartialShape::scalar()],
        );
        let batch = empty_batch(&spec);
        assert_eq!(batch[0].shape(), &[0, 0, 3]);
        assert_eq!(batch[0].dtype(), DType::F32);
        assert_eq!(batch[1].shape(), &[0]);
    }
}
