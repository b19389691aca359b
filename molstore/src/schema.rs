//! The schema registry: the frozen set of stored properties and their shape templates.

use std::collections::BTreeMap;

use itertools::Itertools;
use molstore_array::{NdArray, PType, Shape};
use molstore_backend::{ArrayMeta, Backend};
use molstore_error::{MolResult, mol_bail, mol_err};

use crate::layout::{LEAF_STRUCTURE, check_name, leaf_path};
use crate::record::{GLOBAL_PROPERTY, Record, SPECIES};

/// Element type and per-record shape of one property, as set by the first record that carried it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafTemplate {
    pub ptype: PType,
    pub shape: Shape,
}

impl LeafTemplate {
    pub fn new(ptype: PType, shape: impl Into<Shape>) -> Self {
        Self {
            ptype,
            shape: shape.into(),
        }
    }

    /// The template of a property value.
    pub fn of(value: &NdArray) -> Self {
        Self::new(value.ptype(), value.shape().clone())
    }

    /// Check a candidate value against this template for a record of `entity_size` elements.
    pub fn check(&self, name: &str, candidate: &NdArray, entity_size: usize) -> MolResult<()> {
        if candidate.ptype() != self.ptype {
            return Err(mol_err!(MismatchedTypes: self.ptype, candidate.ptype())
                .with_context(format!("property '{name}'")));
        }
        if !check_dimensions(&self.shape, candidate.shape(), entity_size) {
            mol_bail!(
                DimensionMismatch: "property '{}' of shape {} does not fit template {} for {} elements",
                name,
                candidate.shape(),
                self.shape,
                entity_size
            );
        }
        Ok(())
    }
}

/// Whether `candidate` is compatible with `template` for a record of `entity_size` elements.
///
/// Both shapes must have the same rank and may differ in at most one axis, whose candidate
/// extent must equal `entity_size`.
pub fn check_dimensions(template: &Shape, candidate: &Shape, entity_size: usize) -> bool {
    if template.ndim() != candidate.ndim() {
        return false;
    }
    let mut differing = template
        .iter()
        .zip(candidate.iter())
        .filter(|(t, c)| t != c)
        .map(|(_, &c)| c);
    match (differing.next(), differing.next()) {
        (None, _) => true,
        (Some(extent), None) => extent == entity_size,
        (Some(_), Some(_)) => false,
    }
}

/// Property names (sorted) and their leaf templates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    property_names: Vec<String>,
    leaf_structure: BTreeMap<String, LeafTemplate>,
}

impl Schema {
    /// Infer the schema from the first record.
    ///
    /// With `explicit` names only those properties (plus `species`) are kept, and the record must
    /// carry each of them. Otherwise every property of the record is kept.
    pub fn infer(record: &Record, explicit: Option<&[String]>) -> MolResult<Self> {
        let names = match explicit {
            Some(names) => names
                .iter()
                .map(String::as_str)
                .chain([SPECIES])
                .filter(|name| *name != GLOBAL_PROPERTY)
                .sorted()
                .dedup()
                .collect_vec(),
            None => record.property_names().collect_vec(),
        };

        let mut leaf_structure = BTreeMap::new();
        for name in names {
            check_name(name)?;
            leaf_structure.insert(name.to_string(), LeafTemplate::of(record.require(name)?));
        }
        if !leaf_structure.contains_key(SPECIES) {
            mol_bail!(MissingProperty: "'{}'", SPECIES);
        }
        Ok(Self {
            property_names: leaf_structure.keys().cloned().collect(),
            leaf_structure,
        })
    }

    /// Load a persisted schema. Returns `None` for a store that has never received a record.
    pub fn load<B: Backend>(backend: &B) -> MolResult<Option<Self>> {
        let names = backend.list_children(LEAF_STRUCTURE)?;
        if names.is_empty() {
            return Ok(None);
        }
        let mut leaf_structure = BTreeMap::new();
        for name in names {
            let meta = backend.array_meta(&leaf_path(&name))?;
            leaf_structure.insert(name, LeafTemplate::new(meta.ptype, meta.row_shape));
        }
        Ok(Some(Self {
            property_names: leaf_structure.keys().cloned().collect(),
            leaf_structure,
        }))
    }

    /// Write every leaf template as an empty array whose rows have the template's shape.
    pub fn persist<B: Backend>(&self, backend: &mut B, chunk_rows: usize) -> MolResult<()> {
        for (name, template) in &self.leaf_structure {
            persist_template(backend, name, template, chunk_rows)?;
        }
        Ok(())
    }

    pub fn property_names(&self) -> &[String] {
        &self.property_names
    }

    pub fn leaf_structure(&self) -> &BTreeMap<String, LeafTemplate> {
        &self.leaf_structure
    }

    pub fn template(&self, name: &str) -> Option<&LeafTemplate> {
        self.leaf_structure.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.leaf_structure.contains_key(name)
    }

    /// Validate a record against the frozen templates. Returns the record's entity size.
    pub fn check_record(&self, record: &Record) -> MolResult<usize> {
        let entity_size = record.entity_size()?;
        for (name, template) in &self.leaf_structure {
            template.check(name, record.require(name)?, entity_size)?;
        }
        for extra in record.property_names().filter(|name| !self.contains(name)) {
            log::debug!("ignoring property '{extra}' which is not part of the schema");
        }
        Ok(entity_size)
    }

    /// Register a new property. Fails if the name is already taken.
    pub fn add_property(&mut self, name: &str, template: LeafTemplate) -> MolResult<()> {
        check_name(name)?;
        if name == GLOBAL_PROPERTY || self.contains(name) {
            mol_bail!("property '{}' already exists", name);
        }
        self.leaf_structure.insert(name.to_string(), template);
        self.property_names = self.leaf_structure.keys().cloned().collect();
        Ok(())
    }
}

pub(crate) fn persist_template<B: Backend>(
    backend: &mut B,
    name: &str,
    template: &LeafTemplate,
    chunk_rows: usize,
) -> MolResult<()> {
    let empty = NdArray::zeros(template.ptype, template.shape.prepend(0));
    backend.create_array(
        &leaf_path(name),
        ArrayMeta::new(template.ptype, template.shape.clone(), chunk_rows),
        &empty,
    )
}

#[cfg(test)]
mod tests {
    use molstore_backend::MemoryBackend;
    use molstore_error::MolError;
    use rstest::rstest;

    use super::*;

    fn water() -> Record {
        Record::new()
            .with_property(SPECIES, NdArray::from_slice(&[1i64, 8, 1]))
            .with_property("forces", NdArray::zeros(PType::F64, [3, 3]))
            .with_property("energy", NdArray::scalar(-76.4f64))
    }

    fn methane() -> Record {
        Record::new()
            .with_property(SPECIES, NdArray::from_slice(&[6i64, 1, 1, 1, 1]))
            .with_property("forces", NdArray::zeros(PType::F64, [5, 3]))
            .with_property("energy", NdArray::scalar(-40.5f64))
    }

    #[rstest]
    #[case(&[3, 3], &[3, 3], 3, true)]
    #[case(&[3, 3], &[5, 3], 5, true)]
    #[case(&[3, 3], &[5, 3], 4, false)]
    #[case(&[3, 3], &[5, 5], 5, false)]
    #[case(&[3, 3], &[3, 3, 1], 3, false)]
    #[case(&[], &[], 7, true)]
    #[case(&[2, 3, 3], &[2, 5, 3], 5, true)]
    fn dimension_rule(
        #[case] template: &[usize],
        #[case] candidate: &[usize],
        #[case] entity_size: usize,
        #[case] expected: bool,
    ) {
        assert_eq!(
            check_dimensions(&Shape::from(template), &Shape::from(candidate), entity_size),
            expected
        );
    }

    #[test]
    fn infer_sorts_names() {
        let schema = Schema::infer(&water(), None).unwrap();
        assert_eq!(schema.property_names(), &["energy", "forces", "species"]);
        assert_eq!(
            schema.template("forces").unwrap(),
            &LeafTemplate::new(PType::F64, [3, 3])
        );
        assert_eq!(schema.check_record(&methane()).unwrap(), 5);
    }

    #[test]
    fn explicit_names_project_the_record() {
        let names = vec!["forces".to_string()];
        let schema = Schema::infer(&water(), Some(&names)).unwrap();
        assert_eq!(schema.property_names(), &["forces", "species"]);

        let missing = vec!["charges".to_string()];
        assert!(matches!(
            Schema::infer(&water(), Some(&missing)).unwrap_err(),
            MolError::MissingProperty(..)
        ));
    }

    #[test]
    fn check_record_failures() {
        let schema = Schema::infer(&water(), None).unwrap();

        let no_energy = Record::new()
            .with_property(SPECIES, NdArray::from_slice(&[1i64]))
            .with_property("forces", NdArray::zeros(PType::F64, [1, 3]));
        assert!(matches!(
            schema.check_record(&no_energy).unwrap_err(),
            MolError::MissingProperty(..)
        ));

        let wrong_axis = methane().with_property("forces", NdArray::zeros(PType::F64, [5, 4]));
        assert!(matches!(
            schema.check_record(&wrong_axis).unwrap_err(),
            MolError::DimensionMismatch(..)
        ));

        let wrong_type = methane().with_property("forces", NdArray::zeros(PType::F32, [5, 3]));
        assert!(matches!(
            schema.check_record(&wrong_type).unwrap_err().root(),
            MolError::MismatchedTypes(..)
        ));
    }

    #[test]
    fn persist_and_load() {
        let mut backend = MemoryBackend::new();
        assert!(Schema::load(&backend).unwrap().is_none());

        let schema = Schema::infer(&water(), None).unwrap();
        schema.persist(&mut backend, 10).unwrap();
        assert_eq!(Schema::load(&backend).unwrap().unwrap(), schema);
    }

    #[test]
    fn add_property_keeps_order() {
        let mut schema = Schema::infer(&water(), None).unwrap();
        schema
            .add_property("charges", LeafTemplate::new(PType::F32, [3]))
            .unwrap();
        assert_eq!(
            schema.property_names(),
            &["charges", "energy", "forces", "species"]
        );
        assert!(
            schema
                .add_property("forces", LeafTemplate::new(PType::F64, [3, 3]))
                .is_err()
        );
    }
}
