//! Paths of the persisted layout inside a backend namespace.

use molstore_backend::path_components;
use molstore_error::{MolResult, mol_bail};

use crate::{GroupKey, StageId};

pub(crate) const DATA: &str = "data";
pub(crate) const INDICES: &str = "global/indices";
pub(crate) const FLAGS: &str = "global/global_property";
pub(crate) const LEAF_STRUCTURE: &str = "global/leaf_structure";
pub(crate) const REDUCTIONS: &str = "reductions";

pub(crate) fn group_path(key: GroupKey) -> String {
    format!("{DATA}/{key}")
}

pub(crate) fn data_path(key: GroupKey, property: &str) -> String {
    format!("{DATA}/{key}/{property}")
}

pub(crate) fn leaf_path(property: &str) -> String {
    format!("{LEAF_STRUCTURE}/{property}")
}

pub(crate) fn reduction_path(name: &str) -> String {
    format!("{REDUCTIONS}/{name}")
}

pub(crate) fn stage_path(name: &str, stage: StageId) -> String {
    format!("{REDUCTIONS}/{name}/{stage}")
}

/// Property and reduction names become single path components.
pub(crate) fn check_name(name: &str) -> MolResult<()> {
    if name.contains('/') || path_components(name)?.len() != 1 {
        mol_bail!("'{}' must not contain '/'", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths() {
        let key = GroupKey::new(3).unwrap();
        assert_eq!(data_path(key, "forces"), "data/003/forces");
        assert_eq!(group_path(key), "data/003");
        assert_eq!(leaf_path("species"), "global/leaf_structure/species");
        assert_eq!(stage_path("first", StageId::FIRST), "reductions/first/000");
    }

    #[test]
    fn names_are_single_components() {
        assert!(check_name("forces").is_ok());
        assert!(check_name("a/b").is_err());
        assert!(check_name("..").is_err());
        assert!(check_name("").is_err());
    }
}
