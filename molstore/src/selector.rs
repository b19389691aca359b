//! Point and batch retrieval.

use std::collections::BTreeMap;

use molstore_array::{NdArray, PType, concat_padded};
use molstore_backend::Backend;
use molstore_error::{MolError, MolResult, mol_bail, mol_err};
use serde_json::Value;

use crate::index::{IndexPair, pairs_from_array};
use crate::layout::data_path;
use crate::record::{SPECIES, array_from_json};
use crate::{Database, GroupKey};

/// What to retrieve: one record or a batch of records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    Single(IndexPair),
    Batch(Vec<IndexPair>),
}

impl Selector {
    /// Parse `[size, offset]` as a single record or `[[size, offset], ...]` as a batch.
    pub fn from_json(value: &Value) -> MolResult<Self> {
        let array = array_from_json(value)
            .map_err(|e| mol_err!(UnsupportedSelector: "{}", e))?;
        Self::try_from(&array)
    }
}

impl TryFrom<&NdArray> for Selector {
    type Error = MolError;

    fn try_from(array: &NdArray) -> Result<Self, Self::Error> {
        if !matches!(array.ptype(), PType::I32 | PType::I64) {
            mol_bail!(
                UnsupportedSelector: "index pairs must be integers, found {}",
                array.ptype()
            );
        }
        match &array.shape()[..] {
            [2] => {
                let pairs = pairs_from_array(&array.clone().with_leading_axis())?;
                match pairs.as_slice() {
                    [pair] => Ok(Selector::Single(*pair)),
                    _ => mol_bail!(AssertionFailed: "a single row holds one pair"),
                }
            }
            [_, 2] => Ok(Selector::Batch(pairs_from_array(array)?)),
            _ => mol_bail!(
                UnsupportedSelector: "expected shape (2,) or (n, 2), found {}",
                array.shape()
            ),
        }
    }
}

impl From<IndexPair> for Selector {
    fn from(value: IndexPair) -> Self {
        Selector::Single(value)
    }
}

impl From<Vec<IndexPair>> for Selector {
    fn from(value: Vec<IndexPair>) -> Self {
        Selector::Batch(value)
    }
}

/// Records read group by group, one array per group and property.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    /// The records in output order: grouped by ascending group key, request order within a group.
    pub indices: Vec<IndexPair>,
    pub properties: BTreeMap<String, Vec<NdArray>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn property(&self, name: &str) -> Option<&[NdArray]> {
        self.properties.get(name).map(Vec::as_slice)
    }

    /// Merge each property's per-group arrays into one zero-padded array.
    pub fn padded(&self) -> MolResult<DenseBatch> {
        let properties = self
            .properties
            .iter()
            .filter(|(_, arrays)| !arrays.is_empty())
            .map(|(name, arrays)| {
                concat_padded(arrays)
                    .map(|array| (name.clone(), array))
                    .map_err(|e| e.with_context(format!("padding property '{name}'")))
            })
            .collect::<MolResult<_>>()?;
        Ok(DenseBatch {
            indices: self.indices.clone(),
            properties,
        })
    }
}

/// A batch with one dense array per property, outermost axis in [`DenseBatch::indices`] order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DenseBatch {
    pub indices: Vec<IndexPair>,
    pub properties: BTreeMap<String, NdArray>,
}

impl DenseBatch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn property(&self, name: &str) -> Option<&NdArray> {
        self.properties.get(name)
    }
}

/// The result of [`Database::get_item`].
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Record(BTreeMap<String, NdArray>),
    Batch(Batch),
    Dense(DenseBatch),
}

impl<B: Backend> Database<B> {
    /// Retrieve one record or a batch, padding the batch into dense arrays if `pad` is set.
    pub fn get_item(&self, selector: &Selector, pad: bool) -> MolResult<Selection> {
        match selector {
            Selector::Single(pair) => Ok(Selection::Record(self.get_record(*pair)?)),
            Selector::Batch(pairs) if pad => Ok(Selection::Dense(self.get_batch(pairs)?.padded()?)),
            Selector::Batch(pairs) => Ok(Selection::Batch(self.get_batch(pairs)?)),
        }
    }

    /// Every property of one record.
    pub fn get_record(&self, pair: IndexPair) -> MolResult<BTreeMap<String, NdArray>> {
        let schema = self.require_schema()?;
        self.check_group(pair.group)?;
        let mut record = BTreeMap::new();
        for name in schema.property_names() {
            let rows = self
                .backend()
                .read_rows(&data_path(pair.group, name), &[pair.offset])?;
            record.insert(name.clone(), rows.row(0)?);
        }
        self.metrics().rows_read().inc();
        Ok(record)
    }

    /// Read many records with one bulk read per property and group.
    pub fn get_batch(&self, pairs: &[IndexPair]) -> MolResult<Batch> {
        if pairs.is_empty() {
            return Ok(Batch::default());
        }
        let schema = self.require_schema()?;

        let mut groups: BTreeMap<GroupKey, Vec<IndexPair>> = BTreeMap::new();
        for pair in pairs {
            groups.entry(pair.group).or_default().push(*pair);
        }
        for &key in groups.keys() {
            self.check_group(key)?;
        }

        let mut properties = BTreeMap::new();
        for name in schema.property_names() {
            let arrays = groups
                .iter()
                .map(|(&key, members)| {
                    let offsets = members.iter().map(|p| p.offset).collect::<Vec<_>>();
                    self.backend().read_rows(&data_path(key, name), &offsets)
                })
                .collect::<MolResult<Vec<_>>>()?;
            properties.insert(name.clone(), arrays);
        }

        self.metrics().batch_reads().inc();
        self.metrics().rows_read().add(i64::try_from(pairs.len()).unwrap_or(i64::MAX));
        log::trace!("read {} records from {} groups", pairs.len(), groups.len());
        Ok(Batch {
            indices: groups.into_values().flatten().collect(),
            properties,
        })
    }

    fn check_group(&self, key: GroupKey) -> MolResult<()> {
        if !self.backend().is_array(&data_path(key, SPECIES)) {
            mol_bail!(NotFound: "group {}", key);
        }
        Ok(())
    }
}
