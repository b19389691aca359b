use std::collections::BTreeMap;

use molstore_array::{NativePType, NdArray, PType, Shape, match_each_ptype};
use molstore_error::{MolResult, mol_bail, mol_err};
use serde_json::{Number, Value};

/// The property whose length determines a record's group.
pub const SPECIES: &str = "species";
/// The optional per-record scalar that initialises the record's flag.
pub const GLOBAL_PROPERTY: &str = "global_property";

/// One entity: named per-element arrays plus an optional scalar flag value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    properties: BTreeMap<String, NdArray>,
    global_property: Option<f64>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, name: impl Into<String>, value: NdArray) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_global_property(mut self, value: f64) -> Self {
        self.global_property = Some(value);
        self
    }

    pub fn property(&self, name: &str) -> Option<&NdArray> {
        self.properties.get(name)
    }

    /// Look up a property, failing with `MissingProperty` if it is absent.
    pub fn require(&self, name: &str) -> MolResult<&NdArray> {
        self.properties
            .get(name)
            .ok_or_else(|| mol_err!(MissingProperty: "'{}'", name))
    }

    /// Property names in lexicographic order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, NdArray> {
        &self.properties
    }

    /// The flag value the record is stored with, zero unless set.
    pub fn global_property(&self) -> f64 {
        self.global_property.unwrap_or(0.0)
    }

    /// Number of elements of the entity, i.e. the length of its `species` array.
    pub fn entity_size(&self) -> MolResult<usize> {
        let species = self.require(SPECIES)?;
        if species.ndim() != 1 {
            mol_bail!(
                DimensionMismatch: "'{}' must be one-dimensional, found shape {}",
                SPECIES,
                species.shape()
            );
        }
        Ok(species.len())
    }

    /// Parse a record from a JSON object of numeric (nested) arrays.
    ///
    /// JSON does not distinguish `1` from `1.0`, so `species` keeps integer leaves as `i64` and
    /// every other property is read as `f64`. A `global_property` key must hold a single number.
    pub fn from_json(value: &Value) -> MolResult<Self> {
        Self::from_json_typed(value, |_| None)
    }

    /// Parse a record from JSON, reading each property as the element type `ptype_of` returns
    /// for it. Properties without a type follow the rules of [`Record::from_json`].
    pub fn from_json_typed(
        value: &Value,
        ptype_of: impl Fn(&str) -> Option<PType>,
    ) -> MolResult<Self> {
        let Value::Object(map) = value else {
            mol_bail!(UnsupportedType: "expected a JSON object, found {}", json_kind(value));
        };
        let mut record = Record::new();
        for (name, value) in map {
            if name == GLOBAL_PROPERTY {
                let flag = value.as_f64().ok_or_else(|| {
                    mol_err!("'{}' must be a number, found {}", GLOBAL_PROPERTY, json_kind(value))
                })?;
                record.global_property = Some(flag);
                continue;
            }
            let array = match ptype_of(name) {
                Some(ptype) => array_from_json_as(value, ptype),
                None if name == SPECIES => array_from_json(value),
                None => array_from_json_as(value, PType::F64),
            }
            .map_err(|e| e.with_context(format!("property '{name}'")))?;
            record.properties.insert(name.clone(), array);
        }
        Ok(record)
    }
}

/// Input to [`crate::Database::add_instance`]: a record, or a (possibly nested) list of them.
#[derive(Clone, Debug, PartialEq)]
pub enum Instance {
    Record(Record),
    List(Vec<Instance>),
}

impl Instance {
    /// Parse JSON input: objects are records, arrays are lists. Any other JSON value fails with
    /// `UnsupportedType`.
    pub fn from_json(value: &Value) -> MolResult<Self> {
        match value {
            Value::Object(_) => Ok(Instance::Record(Record::from_json(value)?)),
            Value::Array(items) => Ok(Instance::List(
                items.iter().map(Instance::from_json).collect::<MolResult<_>>()?,
            )),
            other => mol_bail!(
                UnsupportedType: "expected a record or a list of records, found {}",
                json_kind(other)
            ),
        }
    }

    /// Number of records, counting through nested lists.
    pub fn num_records(&self) -> usize {
        match self {
            Instance::Record(_) => 1,
            Instance::List(items) => items.iter().map(Instance::num_records).sum(),
        }
    }
}

impl From<Record> for Instance {
    fn from(value: Record) -> Self {
        Instance::Record(value)
    }
}

impl From<Vec<Record>> for Instance {
    fn from(value: Vec<Record>) -> Self {
        Instance::List(value.into_iter().map(Instance::Record).collect())
    }
}

impl From<Vec<Instance>> for Instance {
    fn from(value: Vec<Instance>) -> Self {
        Instance::List(value)
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Convert a JSON number or rectangular nested array of numbers into an [`NdArray`].
///
/// Leaves that are all integers become `i64`, anything else becomes `f64`.
pub fn array_from_json(value: &Value) -> MolResult<NdArray> {
    let (shape, leaves) = json_leaves(value)?;
    let ptype = if !leaves.is_empty() && leaves.iter().all(|n| n.is_i64()) {
        PType::I64
    } else {
        PType::F64
    };
    collect_as(shape, &leaves, ptype)
}

/// Convert a JSON number or rectangular nested array of numbers into an [`NdArray`] of `ptype`.
///
/// Non-integral numbers fail with `MismatchedTypes` when `ptype` is an integer type.
pub fn array_from_json_as(value: &Value, ptype: PType) -> MolResult<NdArray> {
    let (shape, leaves) = json_leaves(value)?;
    collect_as(shape, &leaves, ptype)
}

fn collect_as(shape: Shape, leaves: &[&Number], ptype: PType) -> MolResult<NdArray> {
    match_each_ptype!(ptype, |T| {
        let data = leaves
            .iter()
            .map(|n| number_as::<T>(n))
            .collect::<MolResult<Vec<T>>>()?;
        NdArray::from_vec(shape, data)
    })
}

fn number_as<T: NativePType>(n: &Number) -> MolResult<T> {
    let converted = if T::PTYPE.is_int() {
        n.as_i64().and_then(<T as num_traits::NumCast>::from)
    } else {
        n.as_f64().and_then(<T as num_traits::NumCast>::from)
    };
    converted.ok_or_else(|| mol_err!(MismatchedTypes: T::PTYPE, n))
}

fn json_leaves(value: &Value) -> MolResult<(Shape, Vec<&Number>)> {
    let shape = json_shape(value);
    let mut leaves = Vec::with_capacity(shape.num_elements());
    collect_leaves(value, &shape, 0, &mut leaves)?;
    Ok((shape, leaves))
}

fn json_shape(value: &Value) -> Shape {
    let mut dims = Vec::new();
    let mut current = value;
    while let Value::Array(items) = current {
        dims.push(items.len());
        match items.first() {
            Some(first) => current = first,
            None => break,
        }
    }
    Shape::new(dims)
}

fn collect_leaves<'a>(
    value: &'a Value,
    shape: &Shape,
    depth: usize,
    leaves: &mut Vec<&'a Number>,
) -> MolResult<()> {
    match value {
        Value::Number(n) if depth == shape.ndim() => {
            leaves.push(n);
            Ok(())
        }
        Value::Array(items) if depth < shape.ndim() && items.len() == shape[depth] => {
            for item in items {
                collect_leaves(item, shape, depth + 1, leaves)?;
            }
            Ok(())
        }
        Value::Array(_) | Value::Number(_) => mol_bail!(
            DimensionMismatch: "nested arrays are not rectangular, expected shape {}",
            shape
        ),
        other => mol_bail!("expected a number, found {}", json_kind(other)),
    }
}
