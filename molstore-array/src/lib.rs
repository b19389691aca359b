//! Dense numeric arrays for molstore.
//!
//! Records are made of per-property [`NdArray`]s. Arrays of one property that belong to records
//! of different sizes have different shapes; [`concat_padded`] merges them into one dense array
//! by zero-padding every trailing axis to the largest extent.

pub use array::*;
pub use concat::*;
pub use ptype::*;
pub use shape::*;

mod array;
mod concat;
mod ptype;
mod shape;
