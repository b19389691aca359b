use std::fmt::{Display, Formatter};
use std::ops::Deref;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// The dimensions of an [`crate::NdArray`], outermost axis first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    /// The zero-dimensional shape of a single scalar.
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements described by this shape.
    pub fn num_elements(&self) -> usize {
        self.0.iter().product()
    }

    /// The shape with `leading` inserted as a new outermost axis.
    pub fn prepend(&self, leading: usize) -> Self {
        let mut dims = Vec::with_capacity(self.0.len() + 1);
        dims.push(leading);
        dims.extend_from_slice(&self.0);
        Self(dims)
    }

    /// The shape of a single entry along the outermost axis.
    pub fn row_shape(&self) -> Self {
        Self(self.0.iter().skip(1).copied().collect())
    }

    /// Replace the outermost axis, returning a new shape.
    ///
    /// A scalar shape is promoted to a one-dimensional shape.
    pub fn with_leading(&self, leading: usize) -> Self {
        if self.0.is_empty() {
            return Self(vec![leading]);
        }
        let mut dims = self.0.clone();
        dims[0] = leading;
        Self(dims)
    }

    /// Row-major strides, in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.0.len()];
        for axis in (0..self.0.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.0[axis + 1];
        }
        strides
    }

    pub fn into_inner(self) -> Vec<usize> {
        self.0
    }
}

impl Deref for Shape {
    type Target = [usize];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<usize>> for Shape {
    fn from(value: Vec<usize>) -> Self {
        Self(value)
    }
}

impl From<&[usize]> for Shape {
    fn from(value: &[usize]) -> Self {
        Self(value.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(value: [usize; N]) -> Self {
        Self(value.to_vec())
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.len() == 1 {
            return write!(f, "({},)", self.0[0]);
        }
        write!(f, "({})", self.0.iter().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_are_row_major() {
        assert_eq!(Shape::from([2, 5, 3]).strides(), vec![15, 3, 1]);
        assert_eq!(Shape::from([4]).strides(), vec![1]);
        assert!(Shape::scalar().strides().is_empty());
    }

    #[test]
    fn leading_axis_helpers() {
        let shape = Shape::from([5, 3]);
        assert_eq!(shape.prepend(1), Shape::from([1, 5, 3]));
        assert_eq!(shape.row_shape(), Shape::from([3]));
        assert_eq!(shape.with_leading(7), Shape::from([7, 3]));
        assert_eq!(Shape::scalar().num_elements(), 1);
    }

    #[test]
    fn display() {
        assert_eq!(Shape::from([2, 5, 3]).to_string(), "(2, 5, 3)");
        assert_eq!(Shape::from([3]).to_string(), "(3,)");
        assert_eq!(Shape::scalar().to_string(), "()");
    }
}
