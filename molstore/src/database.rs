use std::collections::BTreeSet;
use std::path::Path;

use itertools::Itertools;
use molstore_array::{NdArray, PType, Shape};
use molstore_backend::{ArrayMeta, Backend, DirectoryBackend, MemoryBackend};
use molstore_error::{MolResult, mol_bail, mol_err};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;

use crate::index::{FLAG_IN_REDUCTION, IndexEntry, IndexPair, pairs_from_array};
use crate::layout::{DATA, FLAGS, INDICES, data_path, group_path};
use crate::metrics::StoreMetrics;
use crate::record::{Instance, Record, SPECIES, json_kind};
use crate::schema::{LeafTemplate, Schema, persist_template};
use crate::{DatabaseOptions, GroupKey};

/// A store of variable-sized records, grouped by entity size.
///
/// Records are appended through [`Database::add_instance`] and addressed by [`IndexPair`]s. Every
/// record ever added also owns a position in the global index and a flag, which reductions use
/// to claim records.
pub struct Database<B> {
    backend: B,
    options: DatabaseOptions,
    schema: Option<Schema>,
    len: usize,
    pub(crate) rng: StdRng,
    metrics: StoreMetrics,
}

impl Database<MemoryBackend> {
    /// A fresh store that lives in memory.
    pub fn in_memory(options: DatabaseOptions) -> MolResult<Self> {
        Self::open(MemoryBackend::new(), options)
    }
}

impl Database<DirectoryBackend> {
    /// Open (or create) a store rooted at a directory.
    pub fn open_dir(root: impl AsRef<Path>, options: DatabaseOptions) -> MolResult<Self> {
        Self::open(DirectoryBackend::open(root)?, options)
    }
}

impl<B: Backend> Database<B> {
    /// Open a store on top of `backend`.
    ///
    /// Existing content is reloaded unless [`DatabaseOptions::allow_overwriting`] is set, in which
    /// case it is removed first.
    pub fn open(mut backend: B, options: DatabaseOptions) -> MolResult<Self> {
        if options.chunk_rows == 0 {
            mol_bail!("chunk_rows must be positive");
        }
        if options.allow_overwriting {
            log::debug!("clearing existing store content");
            backend.clear()?;
        }

        let schema = Schema::load(&backend)?;
        let len = if backend.is_array(INDICES) {
            backend.array_len(INDICES)?
        } else {
            0
        };
        if schema.is_none() && len > 0 {
            mol_bail!(NotFound: "store holds {} records but no leaf structure", len);
        }
        if backend.is_array(FLAGS) && backend.array_len(FLAGS)? != len {
            mol_bail!(
                DimensionMismatch: "global index holds {} entries but there are {} flags",
                len,
                backend.array_len(FLAGS)?
            );
        }

        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        log::debug!("opened store with {len} records");

        Ok(Self {
            backend,
            options,
            schema,
            len,
            rng,
            metrics: StoreMetrics::default(),
        })
    }

    /// Number of records ever added.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The schema, once the first record has been added.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Names of the stored properties, sorted. Empty until the first record has been added.
    pub fn property_names(&self) -> &[String] {
        self.schema
            .as_ref()
            .map(Schema::property_names)
            .unwrap_or_default()
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub(crate) fn require_schema(&self) -> MolResult<&Schema> {
        self.schema
            .as_ref()
            .ok_or_else(|| mol_err!(NotFound: "the store holds no records"))
    }

    /// Add a record, or a (nested) list of records, in order.
    ///
    /// Returns the index pair of every inserted record. A failing record stops the insertion;
    /// records before it stay inserted.
    pub fn add_instance(&mut self, instance: impl Into<Instance>) -> MolResult<Vec<IndexPair>> {
        let instance = instance.into();
        let mut pairs = Vec::with_capacity(instance.num_records());
        self.add_instance_into(instance, &mut pairs)?;
        Ok(pairs)
    }

    fn add_instance_into(&mut self, instance: Instance, pairs: &mut Vec<IndexPair>) -> MolResult<()> {
        match instance {
            Instance::Record(record) => pairs.push(self.add_record(&record)?),
            Instance::List(items) => {
                for item in items {
                    self.add_instance_into(item, pairs)?;
                }
            }
        }
        Ok(())
    }

    /// Add records parsed from JSON: objects are records, arrays are (nested) lists of them.
    ///
    /// Once the store has a schema, each known property is read as its template's element type.
    /// Records are parsed and inserted one at a time, so a failing record keeps the records
    /// before it.
    pub fn add_json(&mut self, value: &Value) -> MolResult<Vec<IndexPair>> {
        let mut pairs = Vec::new();
        self.add_json_into(value, &mut pairs)?;
        Ok(pairs)
    }

    fn add_json_into(&mut self, value: &Value, pairs: &mut Vec<IndexPair>) -> MolResult<()> {
        match value {
            Value::Object(_) => {
                let schema = self.schema.as_ref();
                let record = Record::from_json_typed(value, |name| {
                    schema.and_then(|s| s.template(name)).map(|t| t.ptype)
                })?;
                pairs.push(self.add_record(&record)?);
            }
            Value::Array(items) => {
                for item in items {
                    self.add_json_into(item, pairs)?;
                }
            }
            other => mol_bail!(
                UnsupportedType: "expected a record or a list of records, found {}",
                json_kind(other)
            ),
        }
        Ok(())
    }

    /// Add a single record. Nothing is written unless the record is valid.
    ///
    /// The record's `global_property` becomes its flag. Only reductions may claim a record, so a
    /// `global_property` equal to [`FLAG_IN_REDUCTION`] is rejected.
    pub fn add_record(&mut self, record: &Record) -> MolResult<IndexPair> {
        if record.global_property() == FLAG_IN_REDUCTION {
            mol_bail!(
                "global_property {} is reserved for records held by a reduction",
                FLAG_IN_REDUCTION
            );
        }
        let chunk_rows = self.options.chunk_rows;
        let fresh = match &self.schema {
            Some(_) => None,
            None => Some(Schema::infer(record, self.options.property_names.as_deref())?),
        };
        let schema = fresh
            .as_ref()
            .or(self.schema.as_ref())
            .ok_or_else(|| mol_err!(AssertionFailed: "schema must be available"))?;

        let entity_size = schema.check_record(record)?;
        let key = GroupKey::new(entity_size)?;
        let rows = schema
            .property_names()
            .iter()
            .map(|name| Ok((name.as_str(), record.require(name)?.clone().with_leading_axis())))
            .collect::<MolResult<Vec<_>>>()?;

        let group_exists = self.backend.contains(&group_path(key));
        let offset = if group_exists {
            for (name, row) in &rows {
                self.backend.array_meta(&data_path(key, name))?.check_rows(row)?;
            }
            self.backend.array_len(&data_path(key, SPECIES))?
        } else {
            0
        };

        if let Some(schema) = &fresh {
            schema.persist(&mut self.backend, chunk_rows)?;
            self.backend.create_array(
                INDICES,
                ArrayMeta::new(PType::I64, [2], chunk_rows),
                &NdArray::zeros(PType::I64, [0, 2]),
            )?;
            self.backend.create_array(
                FLAGS,
                ArrayMeta::new(PType::F64, Shape::scalar(), chunk_rows),
                &NdArray::zeros(PType::F64, [0]),
            )?;
        }

        for (name, row) in &rows {
            let path = data_path(key, name);
            if group_exists {
                self.backend.append_rows(&path, row)?;
            } else {
                self.backend
                    .create_array(&path, ArrayMeta::for_rows(row, chunk_rows), row)?;
            }
        }
        if !group_exists {
            log::debug!("created group {key}");
            self.metrics.groups_created().inc();
        }

        let pair = IndexPair::new(key, offset);
        self.backend.append_rows(INDICES, &pair.to_row())?;
        self.backend
            .append_rows(FLAGS, &NdArray::from_slice(&[record.global_property()]))?;

        if let Some(schema) = fresh {
            log::debug!(
                "created schema with properties {}",
                schema.property_names().join(", ")
            );
            self.schema = Some(schema);
        }
        self.len += 1;
        self.metrics.records_added().inc();
        log::trace!("added record {pair} at position {}", self.len - 1);
        Ok(pair)
    }

    /// Add a new property to a populated store.
    ///
    /// Every existing record receives zeros of `example`'s shape. If `group_dim` is given, that
    /// axis is replaced in each group by the group's entity size.
    pub fn add_instance_and_property(
        &mut self,
        name: &str,
        example: &NdArray,
        group_dim: Option<usize>,
    ) -> MolResult<()> {
        let chunk_rows = self.options.chunk_rows;
        if self.is_empty() {
            mol_bail!("cannot add property '{}' to an empty store", name);
        }
        if let Some(axis) = group_dim {
            if axis >= example.ndim() {
                mol_bail!(
                    "group_dim {} is out of range for an example of shape {}",
                    axis,
                    example.shape()
                );
            }
        }
        let template = LeafTemplate::of(example);
        let mut schema = self.require_schema()?.clone();
        schema.add_property(name, template.clone())?;

        for key in self.group_keys()? {
            let group_len = self.group_len(key)?;
            let mut row_shape = template.shape.clone().into_inner();
            if let Some(axis) = group_dim {
                row_shape[axis] = key.entity_size();
            }
            let row_shape = Shape::from(row_shape);
            let zeros = NdArray::zeros(template.ptype, row_shape.prepend(group_len));
            self.backend.create_array(
                &data_path(key, name),
                ArrayMeta::new(template.ptype, row_shape, chunk_rows),
                &zeros,
            )?;
            log::debug!("backfilled '{name}' for {group_len} records of group {key}");
        }
        persist_template(&mut self.backend, name, &template, chunk_rows)?;
        self.schema = Some(schema);
        Ok(())
    }

    /// Keys of every group, ascending.
    pub fn group_keys(&self) -> MolResult<Vec<GroupKey>> {
        self.backend
            .list_children(DATA)?
            .iter()
            .map(|key| key.parse::<GroupKey>())
            .collect()
    }

    /// Number of records in one group.
    pub fn group_len(&self, key: GroupKey) -> MolResult<usize> {
        let path = data_path(key, SPECIES);
        if !self.backend.is_array(&path) {
            mol_bail!(NotFound: "group {}", key);
        }
        self.backend.array_len(&path)
    }

    /// The index pair of every record, in insertion order.
    pub fn global_index(&self) -> MolResult<Vec<IndexPair>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        pairs_from_array(&self.backend.read_all(INDICES)?)
    }

    /// Global index pairs together with their positions.
    pub fn index_entries(&self) -> MolResult<Vec<IndexEntry>> {
        Ok(self
            .global_index()?
            .into_iter()
            .enumerate()
            .map(|(position, pair)| IndexEntry { position, pair })
            .collect())
    }

    /// The flag of every record, in insertion order.
    pub fn flags(&self) -> MolResult<Vec<f64>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.backend.read_all(FLAGS)?.as_slice::<f64>()?.to_vec())
    }

    pub(crate) fn set_flags(&mut self, positions: &[usize], flag: f64) -> MolResult<()> {
        if positions.is_empty() {
            return Ok(());
        }
        let unique = positions.iter().copied().collect::<BTreeSet<_>>().into_iter().collect_vec();
        let values = NdArray::from_slice(&vec![flag; unique.len()]);
        self.backend.write_rows(FLAGS, &unique, &values)
    }

    /// Look up the index pairs stored at the given positions.
    pub fn pairs_at(&self, positions: &[usize]) -> MolResult<Vec<IndexPair>> {
        if positions.is_empty() {
            return Ok(Vec::new());
        }
        for &position in positions {
            if position >= self.len {
                mol_bail!(OutOfBounds: position, 0, self.len);
            }
        }
        pairs_from_array(&self.backend.read_rows(INDICES, positions)?)
    }
}
