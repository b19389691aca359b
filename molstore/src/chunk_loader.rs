//! Fixed-size windows over a filtered snapshot of the global index.

use molstore_backend::Backend;
use molstore_error::{MolResult, mol_bail, mol_err};

use crate::index::{FLAG_EXCLUDED, FLAG_IN_REDUCTION, IndexEntry, exclude_values};
use crate::{Batch, Database, DenseBatch};

/// Flags skipped by [`Database::get_chunk_loader`] when no exclusion list is given.
pub const DEFAULT_LOADER_EXCLUDE: [f64; 2] = [FLAG_EXCLUDED, FLAG_IN_REDUCTION];

/// Iterates the records of a store in windows of `chunk_size` entries.
///
/// The snapshot is taken when the loader is created: entries whose flag is excluded are dropped
/// and the rest are stably sorted by group key, so a window mostly touches few groups. Windows
/// do not respect group boundaries. The last window holds the remainder.
pub struct ChunkLoader<'a, B> {
    db: &'a Database<B>,
    entries: Vec<IndexEntry>,
    chunk_size: usize,
}

impl<'a, B: Backend> ChunkLoader<'a, B> {
    fn try_new(db: &'a Database<B>, chunk_size: usize, exclude: &[f64]) -> MolResult<Self> {
        if chunk_size == 0 {
            mol_bail!("chunk_size must be positive");
        }
        let flags = db.flags()?;
        let index = db.index_entries()?;
        let mut entries = exclude_values(&flags, exclude)
            .into_iter()
            .map(|position| {
                index
                    .get(position)
                    .copied()
                    .ok_or_else(|| mol_err!(OutOfBounds: position, 0, index.len()))
            })
            .collect::<MolResult<Vec<_>>>()?;
        entries.sort_by_key(|entry| entry.pair.group);
        log::debug!(
            "chunk loader over {} of {} records in windows of {}",
            entries.len(),
            index.len(),
            chunk_size
        );
        Ok(Self {
            db,
            entries,
            chunk_size,
        })
    }

    /// Number of windows.
    pub fn len(&self) -> usize {
        self.entries.len().div_ceil(self.chunk_size)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records across all windows.
    pub fn num_records(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// The entries of window `i`.
    pub fn window(&self, i: usize) -> MolResult<&[IndexEntry]> {
        if i >= self.len() {
            mol_bail!(OutOfBounds: i, 0, self.len());
        }
        let start = i * self.chunk_size;
        let end = (start + self.chunk_size).min(self.entries.len());
        Ok(&self.entries[start..end])
    }

    /// Read window `i`.
    pub fn get(&self, i: usize) -> MolResult<Batch> {
        let pairs = self.window(i)?.iter().map(|e| e.pair).collect::<Vec<_>>();
        self.db.get_batch(&pairs)
    }

    /// Read window `i` as dense, zero-padded arrays.
    pub fn get_padded(&self, i: usize) -> MolResult<DenseBatch> {
        self.get(i)?.padded()
    }

    pub fn iter(&self) -> impl Iterator<Item = MolResult<Batch>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

impl<B: Backend> Database<B> {
    /// Windows of `chunk_size` records whose flag is not in `exclude`.
    ///
    /// Without an explicit list, records flagged excluded or already held by a reduction are
    /// skipped.
    pub fn get_chunk_loader(
        &self,
        chunk_size: usize,
        exclude: Option<&[f64]>,
    ) -> MolResult<ChunkLoader<'_, B>> {
        ChunkLoader::try_new(self, chunk_size, exclude.unwrap_or(&DEFAULT_LOADER_EXCLUDE))
    }
}

#[cfg(test)]
mod tests {
    use molstore_array::NdArray;
    use molstore_backend::MemoryBackend;
    use rstest::rstest;

    use super::*;
    use crate::record::{Record, SPECIES};
    use crate::{DatabaseOptions, GroupKey, ReductionOptions};

    fn store(sizes: &[(usize, f64)]) -> Database<MemoryBackend> {
        let mut db = Database::in_memory(DatabaseOptions::default()).unwrap();
        for &(size, flag) in sizes {
            db.add_record(
                &Record::new()
                    .with_property(SPECIES, NdArray::from_slice(&vec![1i64; size]))
                    .with_global_property(flag),
            )
            .unwrap();
        }
        db
    }

    #[rstest]
    #[case(10, 3, 4, 1)]
    #[case(10, 5, 2, 5)]
    #[case(10, 10, 1, 10)]
    #[case(10, 20, 1, 10)]
    fn window_count(
        #[case] records: usize,
        #[case] chunk_size: usize,
        #[case] windows: usize,
        #[case] last: usize,
    ) {
        let db = store(&vec![(2, 0.0); records]);
        let loader = db.get_chunk_loader(chunk_size, None).unwrap();
        assert_eq!(loader.len(), windows);
        assert_eq!(loader.window(windows - 1).unwrap().len(), last);
        assert_eq!(loader.get(windows - 1).unwrap().len(), last);
        let total: usize = loader.iter().map(|batch| batch.unwrap().len()).sum();
        assert_eq!(total, records);
    }

    #[test]
    fn empty_population_has_no_windows() {
        let db = store(&[(2, 1.0), (3, 1.0)]);
        let loader = db.get_chunk_loader(4, None).unwrap();
        assert!(loader.is_empty());
        assert_eq!(loader.len(), 0);
        assert!(loader.window(0).is_err());
        assert_eq!(loader.iter().count(), 0);
    }

    #[test]
    fn sorted_by_group_and_filtered() {
        let mut db = store(&[(2, 0.0)]);
        let claimed = db
            .create_initial_reduction("r", 1.0, &ReductionOptions::default())
            .unwrap();
        assert_eq!(claimed.indices.len(), 1);
        for &(size, flag) in &[(5, 0.0), (3, 0.0), (5, 1.0), (3, 0.0), (5, 0.0)] {
            db.add_record(
                &Record::new()
                    .with_property(SPECIES, NdArray::from_slice(&vec![1i64; size]))
                    .with_global_property(flag),
            )
            .unwrap();
        }
        assert_eq!(
            db.flags().unwrap(),
            vec![FLAG_IN_REDUCTION, 0.0, 0.0, FLAG_EXCLUDED, 0.0, 0.0]
        );

        let loader = db.get_chunk_loader(2, None).unwrap();
        let positions = loader.entries().iter().map(|e| e.position).collect::<Vec<_>>();
        assert_eq!(positions, vec![2, 4, 1, 5]);

        let window = loader.window(1).unwrap();
        assert!(window.iter().all(|e| e.pair.group == GroupKey::new(5).unwrap()));
        assert!(loader.window(2).is_err());

        let everything = db.get_chunk_loader(4, Some([].as_slice())).unwrap();
        assert_eq!(everything.num_records(), 6);
        assert_eq!(everything.len(), 2);
        assert_eq!(everything.get(1).unwrap().len(), 2);
    }

    #[test]
    fn windows_cross_group_boundaries() {
        let db = store(&[(2, 0.0), (3, 0.0), (4, 0.0)]);
        let loader = db.get_chunk_loader(2, None).unwrap();
        let batch = loader.get(0).unwrap();
        assert_eq!(batch.property(SPECIES).unwrap().len(), 2);
        let dense = loader.get_padded(0).unwrap();
        assert_eq!(dense.property(SPECIES).unwrap().len(), 2);
    }

    #[test]
    fn zero_chunk_size() {
        let db = store(&[(2, 0.0)]);
        assert!(db.get_chunk_loader(0, None).is_err());
    }
}
