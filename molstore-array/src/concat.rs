use itertools::Itertools;
use molstore_error::{MolResult, mol_bail, mol_err};

use crate::{NativePType, NdArray, Shape, match_each_ptype};

fn check_concat_inputs(arrays: &[NdArray]) -> MolResult<&NdArray> {
    let first = arrays
        .first()
        .ok_or_else(|| mol_err!("cannot concatenate an empty list of arrays"))?;
    for array in arrays {
        if array.ptype() != first.ptype() {
            mol_bail!(MismatchedTypes: first.ptype(), array.ptype());
        }
        if array.ndim() == 0 {
            mol_bail!("cannot concatenate zero-dimensional arrays");
        }
        if array.ndim() != first.ndim() {
            mol_bail!(
                DimensionMismatch: "cannot concatenate arrays of shape {} and {}",
                first.shape(),
                array.shape()
            );
        }
    }
    Ok(first)
}

/// Concatenate arrays along the outermost axis. All row shapes must be identical.
pub fn concat(arrays: &[NdArray]) -> MolResult<NdArray> {
    let first = check_concat_inputs(arrays)?;
    let mut result = first.clone();
    for array in &arrays[1..] {
        result.append_rows(array)?;
    }
    Ok(result)
}

/// The componentwise maximum of the row shapes of `arrays`.
///
/// All arrays must have the same number of dimensions.
pub fn max_row_shape(arrays: &[NdArray]) -> Shape {
    let ndim = arrays.first().map(|a| a.ndim()).unwrap_or(1);
    let dims = (1..ndim)
        .map(|axis| arrays.iter().map(|a| a.shape()[axis]).max().unwrap_or(0))
        .collect_vec();
    Shape::new(dims)
}

/// Concatenate arrays along the outermost axis, zero-padding differing row shapes.
///
/// The result's row shape is the componentwise maximum over all inputs. Each input is copied
/// into the region of its rows anchored at index zero on every trailing axis, the remainder is
/// left as zero. Inputs that already agree on their row shape are concatenated directly.
pub fn concat_padded(arrays: &[NdArray]) -> MolResult<NdArray> {
    let first = check_concat_inputs(arrays)?;
    let row_shape = max_row_shape(arrays);
    if arrays.iter().all(|a| a.shape().row_shape() == row_shape) {
        return concat(arrays);
    }

    let total_rows = arrays.iter().map(|a| a.len()).sum();
    let mut result = NdArray::zeros(first.ptype(), row_shape.prepend(total_rows));
    let mut row_offset = 0;
    for array in arrays {
        copy_into_padded(&mut result, array, row_offset)?;
        row_offset += array.len();
    }
    Ok(result)
}

/// Copy every row of `src` into `dst`, starting at row `row_offset`, anchored at the origin of
/// each of `dst`'s (larger or equal) row dimensions.
fn copy_into_padded(dst: &mut NdArray, src: &NdArray, row_offset: usize) -> MolResult<()> {
    let dst_shape = dst.shape().clone();
    let src_shape = src.shape().clone();
    if src_shape.iter().skip(1).zip(dst_shape.iter().skip(1)).any(|(s, d)| s > d) {
        mol_bail!(
            DimensionMismatch: "array of shape {} does not fit into {}",
            src_shape,
            dst_shape
        );
    }

    let src_rows = src_shape.row_shape();
    let dst_rows = dst_shape.row_shape();
    let src_row_size = src_rows.num_elements();
    let dst_row_size = dst_rows.num_elements();

    // Contiguous runs along the innermost axis; a one-dimensional array has single-element rows.
    let run = src_rows.last().copied().unwrap_or(1);
    let outer = Shape::new(
        src_rows
            .iter()
            .take(src_rows.ndim().saturating_sub(1))
            .copied()
            .collect_vec(),
    );
    let outer_strides = outer.strides();
    let src_strides = src_rows.strides();
    let dst_strides = dst_rows.strides();

    match_each_ptype!(dst.ptype(), |T| {
        let src_values = src.as_slice::<T>()?;
        let out = T::as_mut_vec(dst.values_mut())
            .ok_or_else(|| mol_err!(MismatchedTypes: T::PTYPE, src.ptype()))?;
        for row in 0..src.len() {
            for line in 0..outer.num_elements() {
                let mut src_pos = row * src_row_size;
                let mut dst_pos = (row_offset + row) * dst_row_size;
                let mut rem = line;
                for (axis, stride) in outer_strides.iter().enumerate() {
                    let idx = rem / stride;
                    rem %= stride;
                    src_pos += idx * src_strides[axis];
                    dst_pos += idx * dst_strides[axis];
                }
                out[dst_pos..dst_pos + run].copy_from_slice(&src_values[src_pos..src_pos + run]);
            }
        }
    });
    Ok(())
}
