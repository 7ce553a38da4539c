use smallvec::SmallVec;

use crate::{BindingError, Result};

/// Concrete tensor shape; row-major (C order) addressing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }

    pub fn scalar() -> Self {
        Self(SmallVec::new())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Product of the dimensions: 1 for a scalar, 0 when any axis is empty.
    /// Fails with `ShapeOverflow` when the product does not fit in `usize`.
    pub fn element_count(&self) -> Result<usize> {
        if self.0.contains(&0) {
            return Ok(0);
        }
        self.0
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| self.overflow())
    }

    /// Byte length of a flat buffer of `width`-byte elements.
    pub fn byte_len(&self, width: usize) -> Result<usize> {
        self.element_count()?
            .checked_mul(width)
            .ok_or_else(|| self.overflow())
    }

    /// Flat offset of `index`: `sum(index[i] * prod(dims[i+1..]))`.
    pub fn row_major_offset(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.rank() {
            return Err(BindingError::RankMismatch {
                expected: self.rank(),
                actual: index.len(),
            });
        }

        let mut pos = 0;
        let mut stride = 1;
        for (i, (&idx, &dim)) in index.iter().zip(self.0.iter()).enumerate().rev() {
            if idx >= dim {
                return Err(BindingError::IndexOutOfBounds {
                    index: index.to_vec(),
                    dims: self.0.to_vec(),
                });
            }
            pos += idx * stride;
            if i != 0 {
                stride *= dim;
            }
        }
        Ok(pos)
    }

    pub fn to_native(&self) -> Result<Vec<i64>> {
        self.0
            .iter()
            .map(|&d| i64::try_from(d).map_err(|_| self.overflow()))
            .collect()
    }

    pub fn from_native(dims: &[i64]) -> Result<Self> {
        dims.iter()
            .map(|d| {
                usize::try_from(*d).map_err(|_| BindingError::Native {
                    op: "get_dims",
                    message: format!("engine reported negative dimension {d} in {dims:?}"),
                })
            })
            .collect::<Result<SmallVec<_>>>()
            .map(Shape)
    }

    fn overflow(&self) -> BindingError {
        BindingError::ShapeOverflow {
            dims: self.0.to_vec(),
        }
    }
}

impl From<&[usize]> for Shape {
    fn from(d: &[usize]) -> Self {
        Shape::from_slice(d)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(d: [usize; N]) -> Self {
        Shape::from_slice(&d)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(d: Vec<usize>) -> Self {
        Shape(SmallVec::from_vec(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn element_counts() {
        assert_eq!(Shape::scalar().element_count().unwrap(), 1);
        assert_eq!(Shape::from([0]).element_count().unwrap(), 0);
        assert_eq!(Shape::from([2, 0, 3]).element_count().unwrap(), 0);
        assert_eq!(Shape::from([usize::MAX, 2, 0]).element_count().unwrap(), 0);
        assert_eq!(Shape::from([3, 1, 4]).element_count().unwrap(), 12);
    }

    #[test]
    fn oversized_shapes_fail_instead_of_wrapping() {
        assert!(matches!(
            Shape::from([usize::MAX, 2]).element_count(),
            Err(BindingError::ShapeOverflow { .. })
        ));

        let huge = Shape::from([1usize << 62]);
        assert_eq!(huge.element_count().unwrap(), 1 << 62);
        assert!(matches!(
            huge.byte_len(4),
            Err(BindingError::ShapeOverflow { .. })
        ));
        assert!(matches!(
            Shape::from([usize::MAX]).to_native(),
            Err(BindingError::ShapeOverflow { .. })
        ));
        assert_eq!(Shape::from([2, 3]).to_native().unwrap(), vec![2, 3]);
    }

    #[test]
    fn row_major_on_two_by_two() {
        let shape = Shape::from([2, 2]);
        assert_eq!(shape.row_major_offset(&[0, 0]).unwrap(), 0);
        assert_eq!(shape.row_major_offset(&[0, 1]).unwrap(), 1);
        assert_eq!(shape.row_major_offset(&[1, 0]).unwrap(), 2);
        assert_eq!(shape.row_major_offset(&[1, 1]).unwrap(), 3);
    }

    #[test]
    fn bad_indices() {
        let shape = Shape::from([2, 3]);
        assert!(matches!(
            shape.row_major_offset(&[1]),
            Err(BindingError::RankMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert!(matches!(
            shape.row_major_offset(&[1, 3]),
            Err(BindingError::IndexOutOfBounds { .. })
        ));
        assert_eq!(Shape::scalar().row_major_offset(&[]).unwrap(), 0);
    }

    #[test]
    fn negative_native_dims_are_rejected() {
        assert!(Shape::from_native(&[2, -1]).is_err());
        assert_eq!(Shape::from_native(&[2, 3]).unwrap(), Shape::from([2, 3]));
    }

    proptest! {
        #[test]
        fn offsets_enumerate_every_element_once(dims in proptest::collection::vec(1usize..4, 0..4)) {
            let shape = Shape::from(dims.clone());
            let mut seen = vec![false; shape.element_count().unwrap()];
            let mut index = vec![0usize; dims.len()];
            loop {
                let pos = shape.row_major_offset(&index).unwrap();
                prop_assert!(!seen[pos]);
                seen[pos] = true;

                // odometer increment, last axis fastest
                let mut axis = dims.len();
                loop {
                    if axis == 0 {
                        prop_assert!(seen.iter().all(|s| *s));
                        return Ok(());
                    }
                    axis -= 1;
                    index[axis] += 1;
                    if index[axis] < dims[axis] {
                        break;
                    }
                    index[axis] = 0;
                }
            }
        }
    }
}
