use std::collections::{BTreeMap, BTreeSet};

use molstore_array::NdArray;
use molstore_error::{MolResult, mol_bail, mol_err};

use crate::{ArrayMeta, Backend, join_path, path_components};

struct MemoryArray {
    meta: ArrayMeta,
    data: NdArray,
}

/// A [`Backend`] that keeps every array in memory. Nothing survives the process.
#[derive(Default)]
pub struct MemoryBackend {
    arrays: BTreeMap<String, MemoryArray>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(path: &str) -> MolResult<String> {
        Ok(join_path(&path_components(path)?))
    }

    fn array(&self, path: &str) -> MolResult<&MemoryArray> {
        let key = Self::normalize(path)?;
        self.arrays
            .get(&key)
            .ok_or_else(|| mol_err!(NotFound: "no array at '{}'", key))
    }

    fn array_mut(&mut self, path: &str) -> MolResult<&mut MemoryArray> {
        let key = Self::normalize(path)?;
        self.arrays
            .get_mut(&key)
            .ok_or_else(|| mol_err!(NotFound: "no array at '{}'", key))
    }

    /// Keys strictly below `prefix`, or every key for the root.
    fn descendants<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.arrays.keys().filter_map(move |key| {
            if prefix.is_empty() {
                Some(key.as_str())
            } else {
                key.strip_prefix(prefix)
                    .and_then(|rest| rest.strip_prefix('/'))
            }
        })
    }
}

impl Backend for MemoryBackend {
    fn create_array(&mut self, path: &str, meta: ArrayMeta, initial: &NdArray) -> MolResult<()> {
        meta.check()?;
        meta.check_rows(initial)?;
        let key = Self::normalize(path)?;
        if key.is_empty() {
            mol_bail!("cannot create an array at the root");
        }
        if self.contains(&key) {
            mol_bail!(AlreadyExists: "'{}'", key);
        }
        // An array cannot live below another array.
        let parts = path_components(&key)?;
        for depth in 1..parts.len() {
            let parent = join_path(&parts[..depth]);
            if self.arrays.contains_key(&parent) {
                mol_bail!(AlreadyExists: "'{}' is an array, cannot create '{}'", parent, key);
            }
        }
        self.arrays.insert(
            key,
            MemoryArray {
                meta,
                data: initial.clone(),
            },
        );
        Ok(())
    }

    fn append_rows(&mut self, path: &str, rows: &NdArray) -> MolResult<usize> {
        let array = self.array_mut(path)?;
        array.meta.check_rows(rows)?;
        array.data.append_rows(rows)?;
        Ok(array.data.len())
    }

    fn write_rows(&mut self, path: &str, indices: &[usize], rows: &NdArray) -> MolResult<()> {
        let array = self.array_mut(path)?;
        array.meta.check_rows(rows)?;
        array.data.write_rows(indices, rows)
    }

    fn read_rows(&self, path: &str, indices: &[usize]) -> MolResult<NdArray> {
        self.array(path)?.data.take_rows(indices)
    }

    fn read_all(&self, path: &str) -> MolResult<NdArray> {
        Ok(self.array(path)?.data.clone())
    }

    fn array_meta(&self, path: &str) -> MolResult<ArrayMeta> {
        Ok(self.array(path)?.meta.clone())
    }

    fn array_len(&self, path: &str) -> MolResult<usize> {
        Ok(self.array(path)?.data.len())
    }

    fn contains(&self, path: &str) -> bool {
        let Ok(key) = Self::normalize(path) else {
            return false;
        };
        key.is_empty()
            || self.arrays.contains_key(&key)
            || self.descendants(&key).next().is_some()
    }

    fn is_array(&self, path: &str) -> bool {
        Self::normalize(path)
            .map(|key| self.arrays.contains_key(&key))
            .unwrap_or(false)
    }

    fn list_children(&self, path: &str) -> MolResult<Vec<String>> {
        let key = Self::normalize(path)?;
        let children: BTreeSet<&str> = self
            .descendants(&key)
            .filter_map(|rest| rest.split('/').next())
            .collect();
        Ok(children.into_iter().map(String::from).collect())
    }

    fn remove(&mut self, path: &str) -> MolResult<()> {
        let key = Self::normalize(path)?;
        if key.is_empty() {
            return self.clear();
        }
        let nested = format!("{key}/");
        self.arrays
            .retain(|existing, _| existing != &key && !existing.starts_with(&nested));
        Ok(())
    }

    fn clear(&mut self) -> MolResult<()> {
        log::debug!("clearing {} in-memory arrays", self.arrays.len());
        self.arrays.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::conformance;

    use super::*;

    #[test]
    fn create_append_read() {
        conformance::create_append_read(&mut MemoryBackend::new());
    }

    #[test]
    fn rejects_mismatched_rows() {
        conformance::rejects_mismatched_rows(&mut MemoryBackend::new());
    }

    #[test]
    fn write_rows_in_place() {
        conformance::write_rows_in_place(&mut MemoryBackend::new());
    }

    #[test]
    fn hierarchy() {
        conformance::hierarchy(&mut MemoryBackend::new());
    }

    #[test]
    fn empty_initial_array() {
        conformance::empty_initial_array(&mut MemoryBackend::new());
    }

    #[test]
    fn arrays_cannot_nest() {
        let mut backend = MemoryBackend::new();
        let species = NdArray::from_slice(&[1i64]);
        let meta = ArrayMeta::for_rows(&species, 10);
        backend.create_array("data/001", meta.clone(), &species).unwrap();
        assert!(
            backend
                .create_array("data/001/species", meta, &species)
                .is_err()
        );
    }
}
