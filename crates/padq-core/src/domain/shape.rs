//! Declared component shapes with optionally free dimensions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A shape whose dimensions are either fixed (`Some(n)`) or free (`None`).
///
/// The rank is always known. In JSON a free dimension is `null`:
/// `[null, 3]` declares a rank-2 component with a free leading dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialShape(Vec<Option<usize>>);

impl PartialShape {
    pub fn new(dims: Vec<Option<usize>>) -> Self {
        Self(dims)
    }

    /// Fully defined shape.
    pub fn fixed(dims: &[usize]) -> Self {
        Self(dims.iter().copied().map(Some).collect())
    }

    /// Rank-0 shape.
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Option<usize>] {
        &self.0
    }

    pub fn is_fully_defined(&self) -> bool {
        self.0.iter().all(Option::is_some)
    }

    /// Same rank, and every fixed dimension matches.
    pub fn is_compatible_with(&self, shape: &[usize]) -> bool {
        self.rank() == shape.len()
            && self
                .0
                .iter()
                .zip(shape)
                .all(|(declared, &actual)| declared.is_none_or(|d| d == actual))
    }

    /// Same rank, and wherever both sides fix a dimension they agree.
    pub fn is_compatible_with_partial(&self, other: &PartialShape) -> bool {
        self.rank() == other.rank()
            && self.0.iter().zip(&other.0).all(|pair| match pair {
                (Some(a), Some(b)) => a == b,
                _ => true,
            })
    }

    /// `[batch] ++ self`.
    pub fn with_batch(&self, batch: usize) -> PartialShape {
        let mut dims = Vec::with_capacity(self.rank() + 1);
        dims.push(Some(batch));
        dims.extend_from_slice(&self.0);
        PartialShape(dims)
    }

    /// Concrete shape with every free dimension resolved to 0.
    pub fn zeroed(&self) -> Vec<usize> {
        self.0.iter().map(|d| d.unwrap_or(0)).collect()
    }
}

impl From<Vec<Option<usize>>> for PartialShape {
    fn from(dims: Vec<Option<usize>>) -> Self {
        Self(dims)
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self
            .0
            .iter()
            .map(|d| d.map_or_else(|| "?".to_string(), |n| n.to_string()))
            .collect();
        write!(f, "[{}]", dims.join(","))
    }
}

/// Renders a list of shapes as `[[?],[2,2]]`.
pub fn shape_list_string(shapes: &[PartialShape]) -> String {
    let shapes: Vec<String> = shapes.iter().map(ToString::to_string).collect();
    format!("[{}]", shapes.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::fixed_match(PartialShape::fixed(&[4]), vec![4], true)]
    #[case::fixed_mismatch(PartialShape::fixed(&[4]), vec![3], false)]
    #[case::free_accepts_any(PartialShape::new(vec![None]), vec![17], true)]
    #[case::free_accepts_zero(PartialShape::new(vec![None]), vec![0], true)]
    #[case::rank_mismatch(PartialShape::new(vec![None]), vec![2, 2], false)]
    #[case::mixed(PartialShape::new(vec![None, Some(3)]), vec![5, 3], true)]
    #[case::mixed_mismatch(PartialShape::new(vec![None, Some(3)]), vec![5, 2], false)]
    #[case::scalar(PartialShape::scalar(), vec![], true)]
    fn compatibility_with_concrete_shapes(
        #[case] declared: PartialShape,
        #[case] actual: Vec<usize>,
        #[case] expected: bool,
    ) {
        assert_eq!(declared.is_compatible_with(&actual), expected);
    }

    #[rstest]
    #[case::identical(vec![Some(2), None], vec![Some(2), None], true)]
    #[case::free_vs_fixed(vec![None], vec![Some(9)], true)]
    #[case::conflicting(vec![Some(2)], vec![Some(3)], false)]
    #[case::rank(vec![None], vec![None, None], false)]
    fn compatibility_between_partial_shapes(
        #[case] a: Vec<Option<usize>>,
        #[case] b: Vec<Option<usize>>,
        #[case] expected: bool,
    ) {
        let (a, b) = (PartialShape::new(a), PartialShape::new(b));
        assert_eq!(a.is_compatible_with_partial(&b), expected);
        assert_eq!(b.is_compatible_with_partial(&a), expected);
    }

    #[test]
    fn with_batch_prefixes_leading_dimension() {
        let s = PartialShape::new(vec![None, Some(3)]).with_batch(4);
        assert_eq!(s.dims(), &[Some(4), None, Some(3)]);
        assert_eq!(s.zeroed(), vec![4, 0, 3]);
    }

    #[test]
    fn display_marks_free_dimensions() {
        assert_eq!(PartialShape::new(vec![None, Some(3)]).to_string(), "[?,3]");
        assert_eq!(PartialShape::scalar().to_string(), "[]");
    }

    #[test]
    fn free_dimensions_are_null_in_json() {
        let s: PartialShape = serde_json::from_str("[null, 2]").unwrap();
        assert_eq!(s, PartialShape::new(vec![None, Some(2)]));
        assert!(!s.is_fully_defined());
    }
}
