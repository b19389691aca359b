//! A store for collections of variable-sized numeric records.
//!
//! Each [`Record`] describes one entity (e.g. a molecule) with a mandatory `species` array and
//! any number of per-element properties. Records of different sizes cannot share one fixed-shape
//! array, so a [`Database`] groups them by entity size under a [`GroupKey`] and keeps a global
//! index of `(group key, offset)` pairs in insertion order. Batches spanning several groups are
//! returned either per group ([`Batch`]) or merged into dense zero-padded arrays
//! ([`DenseBatch`]).
//!
//! On top of the store, reductions track named, staged subsets of the records for iterative
//! data selection, and a [`ChunkLoader`] walks the records in fixed-size windows.
//!
//! ```
//! use molstore::{Database, DatabaseOptions, Record, Selector, Selection};
//! use molstore_array::NdArray;
//!
//! let mut db = Database::in_memory(DatabaseOptions::default())?;
//! let pairs = db.add_instance(vec![
//!     Record::new().with_property("species", NdArray::from_slice(&[1i64, 8, 1])),
//!     Record::new().with_property("species", NdArray::from_slice(&[6i64, 1, 1, 1, 1])),
//! ])?;
//! assert_eq!(db.len(), 2);
//!
//! let Selection::Dense(batch) = db.get_item(&Selector::Batch(pairs), true)? else {
//!     unreachable!()
//! };
//! assert_eq!(batch.property("species").map(|a| a.shape().to_vec()), Some(vec![2, 5]));
//! # Ok::<(), molstore_error::MolError>(())
//! ```

pub use chunk_loader::*;
pub use database::*;
pub use group_key::*;
pub use index::*;
pub use metrics::*;
pub use options::*;
pub use record::*;
pub use reduction::*;
pub use schema::*;
pub use selector::*;

mod chunk_loader;
mod database;
mod group_key;
mod index;
mod layout;
mod metrics;
mod options;
mod record;
mod reduction;
mod schema;
mod selector;
