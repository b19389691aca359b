//! Storage backends for molstore.
//!
//! A backend is a hierarchical namespace of growable N-dimensional arrays. Paths are
//! `/`-separated; intermediate groups exist implicitly as soon as an array is created below
//! them. Arrays only grow along their outermost axis.
//!
//! Backends are not safe for concurrent writers: all mutating methods take `&mut self`.

pub use directory::*;
pub use memory::*;
pub use path::*;

mod directory;
mod memory;
mod path;

use molstore_array::{NdArray, PType, Shape};
use molstore_error::{MolResult, mol_bail};
use serde::{Deserialize, Serialize};

/// Default number of rows per chunk for growable arrays.
pub const DEFAULT_CHUNK_ROWS: usize = 100;

/// Static description of a growable array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub ptype: PType,
    /// Shape of one entry along the growable axis.
    pub row_shape: Shape,
    /// Rows per storage chunk.
    pub chunk_rows: usize,
}

impl ArrayMeta {
    pub fn new(ptype: PType, row_shape: impl Into<Shape>, chunk_rows: usize) -> Self {
        Self {
            ptype,
            row_shape: row_shape.into(),
            chunk_rows,
        }
    }

    /// The metadata for a growable array whose rows look like the rows of `array`.
    pub fn for_rows(array: &NdArray, chunk_rows: usize) -> Self {
        Self::new(array.ptype(), array.shape().row_shape(), chunk_rows)
    }

    /// Full shape of an array with `len` rows.
    pub fn shape(&self, len: usize) -> Shape {
        self.row_shape.prepend(len)
    }

    /// Check that `rows` can be appended to or written into an array with this metadata.
    pub fn check_rows(&self, rows: &NdArray) -> MolResult<()> {
        if rows.ptype() != self.ptype {
            mol_bail!(MismatchedTypes: self.ptype, rows.ptype());
        }
        if rows.ndim() == 0 || rows.shape().row_shape() != self.row_shape {
            mol_bail!(
                DimensionMismatch: "rows of shape {} do not match array rows of shape {}",
                rows.shape(),
                self.row_shape
            );
        }
        Ok(())
    }

    fn check(&self) -> MolResult<()> {
        if self.chunk_rows == 0 {
            mol_bail!("chunk_rows must be positive");
        }
        Ok(())
    }
}

/// A hierarchical namespace of growable arrays.
pub trait Backend {
    /// Create a new array at `path` holding the rows of `initial`, which may be empty.
    ///
    /// Fails with `AlreadyExists` if anything already lives at `path`.
    fn create_array(&mut self, path: &str, meta: ArrayMeta, initial: &NdArray) -> MolResult<()>;

    /// Append rows along the outermost axis. Returns the new length of the array.
    fn append_rows(&mut self, path: &str, rows: &NdArray) -> MolResult<usize>;

    /// Overwrite existing rows in place.
    fn write_rows(&mut self, path: &str, indices: &[usize], rows: &NdArray) -> MolResult<()>;

    /// Gather rows, in the given order.
    fn read_rows(&self, path: &str, indices: &[usize]) -> MolResult<NdArray>;

    /// Read the whole array.
    fn read_all(&self, path: &str) -> MolResult<NdArray> {
        let len = self.array_len(path)?;
        self.read_rows(path, &(0..len).collect::<Vec<_>>())
    }

    fn array_meta(&self, path: &str) -> MolResult<ArrayMeta>;

    /// Number of rows in the array.
    fn array_len(&self, path: &str) -> MolResult<usize>;

    /// Whether an array or a group exists at `path`.
    fn contains(&self, path: &str) -> bool;

    /// Whether an array exists at `path`.
    fn is_array(&self, path: &str) -> bool;

    /// Names of the direct children (arrays or groups) of `path`, sorted. An empty path lists the
    /// root. A path that does not exist has no children.
    fn list_children(&self, path: &str) -> MolResult<Vec<String>>;

    /// Remove the array or group at `path`, and everything below it.
    fn remove(&mut self, path: &str) -> MolResult<()>;

    /// Remove everything.
    fn clear(&mut self) -> MolResult<()>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn create_array(&mut self, path: &str, meta: ArrayMeta, initial: &NdArray) -> MolResult<()> {
        B::create_array(self, path, meta, initial)
    }

    fn append_rows(&mut self, path: &str, rows: &NdArray) -> MolResult<usize> {
        B::append_rows(self, path, rows)
    }

    fn write_rows(&mut self, path: &str, indices: &[usize], rows: &NdArray) -> MolResult<()> {
        B::write_rows(self, path, indices, rows)
    }

    fn read_rows(&self, path: &str, indices: &[usize]) -> MolResult<NdArray> {
        B::read_rows(self, path, indices)
    }

    fn read_all(&self, path: &str) -> MolResult<NdArray> {
        B::read_all(self, path)
    }

    fn array_meta(&self, path: &str) -> MolResult<ArrayMeta> {
        B::array_meta(self, path)
    }

    fn array_len(&self, path: &str) -> MolResult<usize> {
        B::array_len(self, path)
    }

    fn contains(&self, path: &str) -> bool {
        B::contains(self, path)
    }

    fn is_array(&self, path: &str) -> bool {
        B::is_array(self, path)
    }

    fn list_children(&self, path: &str) -> MolResult<Vec<String>> {
        B::list_children(self, path)
    }

    fn remove(&mut self, path: &str) -> MolResult<()> {
        B::remove(self, path)
    }

    fn clear(&mut self) -> MolResult<()> {
        B::clear(self)
    }
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every [`Backend`] implementation must share.

    use molstore_array::{NdArray, PType, Shape};
    use molstore_error::MolError;

    use super::*;

    fn forces(rows: usize, base: f64) -> NdArray {
        let data = (0..rows * 6).map(|i| base + i as f64).collect::<Vec<_>>();
        NdArray::from_vec([rows, 2, 3], data).unwrap()
    }

    pub fn create_append_read<B: Backend>(backend: &mut B) {
        let meta = ArrayMeta::new(PType::F64, [2, 3], 2);
        backend
            .create_array("data/002/forces", meta.clone(), &forces(1, 0.0))
            .unwrap();
        assert_eq!(backend.array_meta("data/002/forces").unwrap(), meta);

        // Spans the first chunk boundary and fills a second chunk partially.
        assert_eq!(backend.append_rows("data/002/forces", &forces(2, 100.0)).unwrap(), 3);
        assert_eq!(backend.append_rows("data/002/forces", &forces(1, 200.0)).unwrap(), 4);
        assert_eq!(backend.array_len("data/002/forces").unwrap(), 4);

        let all = backend.read_all("data/002/forces").unwrap();
        assert_eq!(all.shape(), &Shape::from([4, 2, 3]));
        assert_eq!(all.row(0).unwrap(), forces(1, 0.0).row(0).unwrap());
        assert_eq!(all.row(2).unwrap(), forces(2, 100.0).row(1).unwrap());
        assert_eq!(all.row(3).unwrap(), forces(1, 200.0).row(0).unwrap());

        let picked = backend.read_rows("data/002/forces", &[3, 0]).unwrap();
        assert_eq!(picked.row(0).unwrap(), all.row(3).unwrap());
        assert_eq!(picked.row(1).unwrap(), all.row(0).unwrap());

        assert!(matches!(
            backend.read_rows("data/002/forces", &[4]).unwrap_err(),
            MolError::OutOfBounds(..)
        ));
    }

    pub fn rejects_mismatched_rows<B: Backend>(backend: &mut B) {
        let meta = ArrayMeta::new(PType::I64, Shape::scalar(), 4);
        backend
            .create_array("data/003/species", meta, &NdArray::from_slice(&[1i64, 8, 1]))
            .unwrap();
        assert!(matches!(
            backend
                .append_rows("data/003/species", &NdArray::from_slice(&[1.0f64]))
                .unwrap_err(),
            MolError::MismatchedTypes(..)
        ));
        assert!(matches!(
            backend
                .create_array(
                    "data/003/species",
                    ArrayMeta::new(PType::I64, Shape::scalar(), 4),
                    &NdArray::from_slice(&[1i64])
                )
                .unwrap_err(),
            MolError::AlreadyExists(..)
        ));
        assert_eq!(backend.array_len("data/003/species").unwrap(), 3);
    }

    pub fn write_rows_in_place<B: Backend>(backend: &mut B) {
        let flags = NdArray::from_slice(&[0.0f64, 1.0, 0.0, 0.0, 0.0]);
        backend
            .create_array("global/global_property", ArrayMeta::for_rows(&flags, 2), &flags)
            .unwrap();
        backend
            .write_rows(
                "global/global_property",
                &[4, 0],
                &NdArray::from_slice(&[2.0f64, 2.0]),
            )
            .unwrap();
        let read = backend.read_all("global/global_property").unwrap();
        assert_eq!(read.as_slice::<f64>().unwrap(), &[2.0, 1.0, 0.0, 0.0, 2.0]);
    }

    pub fn hierarchy<B: Backend>(backend: &mut B) {
        let species = NdArray::from_slice(&[1i64]);
        let meta = ArrayMeta::for_rows(&species, 10);
        for path in ["data/005/species", "data/003/species", "reductions/first/000"] {
            backend.create_array(path, meta.clone(), &species).unwrap();
        }
        assert_eq!(backend.list_children("").unwrap(), vec!["data", "reductions"]);
        assert_eq!(backend.list_children("data").unwrap(), vec!["003", "005"]);
        assert!(backend.list_children("missing").unwrap().is_empty());
        assert!(backend.contains("data/003"));
        assert!(!backend.is_array("data/003"));
        assert!(backend.is_array("data/003/species"));

        backend.remove("data/003").unwrap();
        assert!(!backend.contains("data/003/species"));
        assert_eq!(backend.list_children("data").unwrap(), vec!["005"]);

        backend.clear().unwrap();
        assert!(backend.list_children("").unwrap().is_empty());
    }

    pub fn empty_initial_array<B: Backend>(backend: &mut B) {
        let template = NdArray::zeros(PType::F32, [0, 5, 3]);
        backend
            .create_array(
                "global/leaf_structure/forces",
                ArrayMeta::for_rows(&template, 10),
                &template,
            )
            .unwrap();
        assert_eq!(backend.array_len("global/leaf_structure/forces").unwrap(), 0);
        let meta = backend.array_meta("global/leaf_structure/forces").unwrap();
        assert_eq!(meta.row_shape, Shape::from([5, 3]));
        assert!(backend.read_all("global/leaf_structure/forces").unwrap().is_empty());
    }
}
