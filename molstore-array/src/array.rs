use std::fmt::{Debug, Formatter};
use std::ops::Range;

use bytes::{Bytes, BytesMut};
use molstore_error::{MolResult, mol_bail, mol_err};

use crate::{NativePType, PType, Shape, match_each_ptype};

/// Iterate over the typed storage of a [`Values`], binding `$value` to the inner `Vec`.
#[macro_export]
macro_rules! match_each_values {
    ($self:expr, | $value:ident | $body:block) => {{
        use $crate::Values;
        match $self {
            Values::I32(v) => {
                let $value = v;
                $body
            }
            Values::I64(v) => {
                let $value = v;
                $body
            }
            Values::F32(v) => {
                let $value = v;
                $body
            }
            Values::F64(v) => {
                let $value = v;
                $body
            }
        }
    }};
}

/// Flat, row-major element storage of an [`NdArray`].
#[derive(Clone, PartialEq)]
pub enum Values {
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Values {
    pub fn zeros(ptype: PType, len: usize) -> Self {
        match_each_ptype!(ptype, |T| { T::into_values(vec![T::default(); len]) })
    }

    pub fn ptype(&self) -> PType {
        match self {
            Values::I32(_) => PType::I32,
            Values::I64(_) => PType::I64,
            Values::F32(_) => PType::F32,
            Values::F64(_) => PType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match_each_values!(self, |v| { v.len() })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: NativePType> From<Vec<T>> for Values {
    fn from(value: Vec<T>) -> Self {
        T::into_values(value)
    }
}

/// A dense, row-major N-dimensional array of one primitive type.
///
/// The outermost axis is the "row" axis: growable arrays append along it, and batch reads
/// select along it. Zero-dimensional arrays hold exactly one element and have no rows.
#[derive(Clone, PartialEq)]
pub struct NdArray {
    shape: Shape,
    values: Values,
}

impl NdArray {
    pub fn try_new(shape: impl Into<Shape>, values: Values) -> MolResult<Self> {
        let shape = shape.into();
        if shape.num_elements() != values.len() {
            mol_bail!(
                "shape {} requires {} elements but {} were provided",
                shape,
                shape.num_elements(),
                values.len()
            );
        }
        Ok(Self { shape, values })
    }

    pub fn from_vec<T: NativePType>(shape: impl Into<Shape>, data: Vec<T>) -> MolResult<Self> {
        Self::try_new(shape, T::into_values(data))
    }

    /// A one-dimensional array over the given elements.
    pub fn from_slice<T: NativePType>(data: &[T]) -> Self {
        Self {
            shape: Shape::from([data.len()]),
            values: T::into_values(data.to_vec()),
        }
    }

    /// A zero-dimensional array holding `value`.
    pub fn scalar<T: NativePType>(value: T) -> Self {
        Self {
            shape: Shape::scalar(),
            values: T::into_values(vec![value]),
        }
    }

    pub fn zeros(ptype: PType, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let values = Values::zeros(ptype, shape.num_elements());
        Self { shape, values }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn ptype(&self) -> PType {
        self.values.ptype()
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut Values {
        &mut self.values
    }

    pub fn into_values(self) -> Values {
        self.values
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn num_elements(&self) -> usize {
        self.values.len()
    }

    /// Length of the outermost axis. Zero-dimensional arrays have length 1.
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of elements in a single row.
    pub fn row_size(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Borrow the elements as a typed slice.
    pub fn as_slice<T: NativePType>(&self) -> MolResult<&[T]> {
        T::as_slice(&self.values).ok_or_else(|| mol_err!(MismatchedTypes: T::PTYPE, self.ptype()))
    }

    /// Reinterpret the same elements under a new shape with the same element count.
    pub fn reshape(self, shape: impl Into<Shape>) -> MolResult<Self> {
        Self::try_new(shape, self.values)
    }

    /// Wrap the array in a new outermost axis of length one.
    pub fn with_leading_axis(self) -> Self {
        let shape = self.shape.prepend(1);
        Self {
            shape,
            values: self.values,
        }
    }

    fn check_row_index(&self, index: usize) -> MolResult<()> {
        if self.ndim() == 0 {
            mol_bail!("cannot index rows of a zero-dimensional array");
        }
        if index >= self.len() {
            mol_bail!(OutOfBounds: index, 0, self.len());
        }
        Ok(())
    }

    /// The row at `index`, with the outermost axis removed.
    pub fn row(&self, index: usize) -> MolResult<Self> {
        self.check_row_index(index)?;
        let row_size = self.row_size();
        let start = index * row_size;
        let values = match_each_values!(&self.values, |v| {
            Values::from(v[start..start + row_size].to_vec())
        });
        Ok(Self {
            shape: self.shape.row_shape(),
            values,
        })
    }

    /// Gather the given rows, in order, into a new array.
    pub fn take_rows(&self, indices: &[usize]) -> MolResult<Self> {
        for &index in indices {
            self.check_row_index(index)?;
        }
        let row_size = self.row_size();
        let values = match_each_values!(&self.values, |v| {
            let mut out = Vec::with_capacity(indices.len() * row_size);
            for &index in indices {
                out.extend_from_slice(&v[index * row_size..(index + 1) * row_size]);
            }
            Values::from(out)
        });
        Ok(Self {
            shape: self.shape.with_leading(indices.len()),
            values,
        })
    }

    /// A contiguous range of rows as a new array.
    pub fn slice_rows(&self, range: Range<usize>) -> MolResult<Self> {
        if range.start > range.end || range.end > self.len() || self.ndim() == 0 {
            mol_bail!(OutOfBounds: range.end, 0, self.len());
        }
        let row_size = self.row_size();
        let values = match_each_values!(&self.values, |v| {
            Values::from(v[range.start * row_size..range.end * row_size].to_vec())
        });
        Ok(Self {
            shape: self.shape.with_leading(range.len()),
            values,
        })
    }

    fn check_rows_compatible(&self, rows: &NdArray) -> MolResult<()> {
        if self.ptype() != rows.ptype() {
            mol_bail!(MismatchedTypes: self.ptype(), rows.ptype());
        }
        if self.ndim() == 0 || self.shape.row_shape() != rows.shape.row_shape() {
            mol_bail!(
                DimensionMismatch: "rows of shape {} cannot be combined with an array of shape {}",
                rows.shape,
                self.shape
            );
        }
        Ok(())
    }

    /// Append all rows of `rows` to the end of this array.
    pub fn append_rows(&mut self, rows: &NdArray) -> MolResult<()> {
        self.check_rows_compatible(rows)?;
        let new_len = self.len() + rows.len();
        match_each_ptype!(self.ptype(), |T| {
            let dst = T::as_mut_vec(&mut self.values)
                .ok_or_else(|| mol_err!(MismatchedTypes: T::PTYPE, rows.ptype()))?;
            dst.extend_from_slice(rows.as_slice::<T>()?);
        });
        self.shape = self.shape.with_leading(new_len);
        Ok(())
    }

    /// Overwrite the rows at `indices` with the consecutive rows of `rows`.
    pub fn write_rows(&mut self, indices: &[usize], rows: &NdArray) -> MolResult<()> {
        self.check_rows_compatible(rows)?;
        if indices.len() != rows.len() {
            mol_bail!(
                "{} row indices given for {} replacement rows",
                indices.len(),
                rows.len()
            );
        }
        for &index in indices {
            self.check_row_index(index)?;
        }
        let row_size = self.row_size();
        match_each_ptype!(self.ptype(), |T| {
            let src = rows.as_slice::<T>()?;
            let dst = T::as_mut_vec(&mut self.values)
                .ok_or_else(|| mol_err!(MismatchedTypes: T::PTYPE, rows.ptype()))?;
            for (n, &index) in indices.iter().enumerate() {
                dst[index * row_size..(index + 1) * row_size]
                    .copy_from_slice(&src[n * row_size..(n + 1) * row_size]);
            }
        });
        Ok(())
    }

    /// Encode the elements as little-endian bytes, row-major. The shape is not included.
    pub fn to_le_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.num_elements() * self.ptype().byte_width());
        match_each_values!(&self.values, |v| {
            for &x in v.iter() {
                x.put_le(&mut buf);
            }
        });
        buf.freeze()
    }

    /// Decode little-endian bytes written by [`NdArray::to_le_bytes`].
    pub fn from_le_bytes(ptype: PType, shape: impl Into<Shape>, mut bytes: Bytes) -> MolResult<Self> {
        let shape = shape.into();
        let expected = shape.num_elements() * ptype.byte_width();
        if bytes.len() != expected {
            mol_bail!(
                "expected {} bytes for {} array of shape {}, found {}",
                expected,
                ptype,
                shape,
                bytes.len()
            );
        }
        let values = match_each_ptype!(ptype, |T| {
            let mut out = Vec::with_capacity(shape.num_elements());
            for _ in 0..shape.num_elements() {
                out.push(T::get_le(&mut bytes));
            }
            T::into_values(out)
        });
        Ok(Self { shape, values })
    }
}

impl Debug for NdArray {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("NdArray");
        s.field("ptype", &self.ptype()).field("shape", &self.shape);
        match_each_values!(&self.values, |v| {
            s.field("values", v);
        });
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use molstore_error::MolError;

    use super::*;

    fn forces() -> NdArray {
        NdArray::from_vec([3, 2], vec![0.0f64, 0.1, 1.0, 1.1, 2.0, 2.1]).unwrap()
    }

    #[test]
    fn shape_must_match_element_count() {
        let err = NdArray::from_vec([2, 2], vec![1i64, 2, 3]).unwrap_err();
        assert!(matches!(err, MolError::InvalidArgument(..)));
    }

    #[test]
    fn row_and_take_rows() {
        let arr = forces();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.row(1).unwrap().as_slice::<f64>().unwrap(), &[1.0, 1.1]);

        let taken = arr.take_rows(&[2, 0]).unwrap();
        assert_eq!(taken.shape(), &Shape::from([2, 2]));
        assert_eq!(taken.as_slice::<f64>().unwrap(), &[2.0, 2.1, 0.0, 0.1]);

        assert!(matches!(
            arr.row(3).unwrap_err(),
            MolError::OutOfBounds(3, 0, 3, _)
        ));
    }

    #[test]
    fn append_rows_checks_row_shape_and_type() {
        let mut arr = forces();
        let row = NdArray::from_slice(&[3.0f64, 3.1]).with_leading_axis();
        arr.append_rows(&row).unwrap();
        assert_eq!(arr.shape(), &Shape::from([4, 2]));
        assert_eq!(arr.row(3).unwrap().as_slice::<f64>().unwrap(), &[3.0, 3.1]);

        let wide = NdArray::from_slice(&[1.0f64, 2.0, 3.0]).with_leading_axis();
        assert!(matches!(
            arr.append_rows(&wide).unwrap_err(),
            MolError::DimensionMismatch(..)
        ));

        let ints = NdArray::from_slice(&[1i64, 2]).with_leading_axis();
        assert!(matches!(
            arr.append_rows(&ints).unwrap_err(),
            MolError::MismatchedTypes(..)
        ));
    }

    #[test]
    fn write_rows_replaces_in_place() {
        let mut flags = NdArray::from_slice(&[0.0f64, 0.0, 1.0, 0.0]);
        flags
            .write_rows(&[3, 0], &NdArray::from_slice(&[2.0f64, 2.0]))
            .unwrap();
        assert_eq!(flags.as_slice::<f64>().unwrap(), &[2.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn slice_rows() {
        let arr = forces();
        let sliced = arr.slice_rows(1..3).unwrap();
        assert_eq!(sliced.as_slice::<f64>().unwrap(), &[1.0, 1.1, 2.0, 2.1]);
        assert!(arr.slice_rows(2..4).is_err());
    }

    #[test]
    fn little_endian_bytes() {
        let species = NdArray::from_slice(&[1i64, 8, 1]);
        let bytes = species.to_le_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[8..16], &8i64.to_le_bytes());
        let decoded = NdArray::from_le_bytes(PType::I64, [3], bytes).unwrap();
        assert_eq!(decoded, species);

        assert!(NdArray::from_le_bytes(PType::I64, [4], species.to_le_bytes()).is_err());
    }

    #[test]
    fn scalar_array() {
        let energy = NdArray::scalar(-76.4f64);
        assert_eq!(energy.ndim(), 0);
        assert_eq!(energy.len(), 1);
        assert_eq!(energy.with_leading_axis().shape(), &Shape::from([1]));
    }
}
