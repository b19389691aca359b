//! The global index and flag table.
//!
//! Every record ever added owns one row in `global/indices` (its group key and its offset
//! inside that group) and one value in `global/global_property`, in insertion order. A record's
//! row number in these arrays is its *position*.

use std::fmt::{Display, Formatter};

use itertools::Itertools;
use molstore_array::{NdArray, PType};
use molstore_error::{MolExpect, MolResult, mol_bail};

use crate::GroupKey;

/// Flag of a record nobody has claimed.
pub const FLAG_UNFLAGGED: f64 = 0.0;
/// Flag reserved for callers to exclude records from sampling.
pub const FLAG_EXCLUDED: f64 = 1.0;
/// Flag of a record held by a reduction.
pub const FLAG_IN_REDUCTION: f64 = 2.0;

/// Location of one record: its group and its row inside that group's arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexPair {
    pub group: GroupKey,
    pub offset: usize,
}

impl IndexPair {
    pub fn new(group: GroupKey, offset: usize) -> Self {
        Self { group, offset }
    }

    /// Build a pair from its stored integer form `[entity_size, offset]`.
    pub fn try_from_i64(entity_size: i64, offset: i64) -> MolResult<Self> {
        let group = GroupKey::from_i64(entity_size)?;
        let Ok(offset) = usize::try_from(offset) else {
            mol_bail!("negative local offset {}", offset);
        };
        Ok(Self { group, offset })
    }

    pub(crate) fn to_row(self) -> NdArray {
        pairs_to_array(&[self])
    }
}

impl Display for IndexPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.group.entity_size(), self.offset)
    }
}

/// A record's position in the global index together with its location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    pub position: usize,
    pub pair: IndexPair,
}

/// Encode pairs as an `n x 2` integer array, the layout of `global/indices` and reduction stages.
pub fn pairs_to_array(pairs: &[IndexPair]) -> NdArray {
    let data = pairs
        .iter()
        .flat_map(|p| [p.group.as_i64(), p.offset as i64])
        .collect_vec();
    NdArray::from_vec([pairs.len(), 2], data).mol_expect("every pair has two columns")
}

/// Decode an `n x 2` integer array into pairs.
pub fn pairs_from_array(array: &NdArray) -> MolResult<Vec<IndexPair>> {
    if array.ndim() != 2 || array.shape()[1] != 2 {
        mol_bail!(
            DimensionMismatch: "index pairs must have shape (n, 2), found {}",
            array.shape()
        );
    }
    let values: Vec<i64> = match array.ptype() {
        PType::I64 => array.as_slice::<i64>()?.to_vec(),
        PType::I32 => array
            .as_slice::<i32>()?
            .iter()
            .map(|&v| i64::from(v))
            .collect(),
        other => mol_bail!(MismatchedTypes: "an integer type", other),
    };
    values
        .chunks_exact(2)
        .map(|pair| IndexPair::try_from_i64(pair[0], pair[1]))
        .collect()
}

/// Positions whose flag is not any of `excluded`. An empty exclusion list keeps everything.
pub fn exclude_values(flags: &[f64], excluded: &[f64]) -> Vec<usize> {
    flags
        .iter()
        .enumerate()
        .filter(|(_, flag)| !excluded.contains(flag))
        .map(|(position, _)| position)
        .collect()
}
