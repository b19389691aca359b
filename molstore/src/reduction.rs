//! Reductions: named, staged subsets of the records of a store.
//!
//! A reduction starts with a uniformly sampled stage `000`. Later stages are appended by
//! [`Database::update_reduction`], which scores the records outside every reduction and lets a
//! caller-supplied policy decide which of them to promote. Every record held by a stage is
//! flagged [`FLAG_IN_REDUCTION`].

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use itertools::Itertools;
use molstore_array::PType;
use molstore_backend::{ArrayMeta, Backend};
use molstore_error::{MolError, MolResult, mol_bail, mol_err};
use rand::seq::index::sample;

use crate::index::{
    FLAG_EXCLUDED, FLAG_IN_REDUCTION, FLAG_UNFLAGGED, IndexPair, exclude_values, pairs_from_array,
    pairs_to_array,
};
use crate::layout::{REDUCTIONS, check_name, reduction_path, stage_path};
use crate::{Batch, Database, DenseBatch};

/// The key of one stage of a reduction, rendered as three zero-padded digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageId(u16);

impl StageId {
    pub const FIRST: StageId = StageId(0);
    pub const MAX: u16 = 999;

    pub fn new(id: u16) -> MolResult<Self> {
        if id > Self::MAX {
            mol_bail!("stage {} exceeds the largest stage {}", id, Self::MAX);
        }
        Ok(Self(id))
    }

    pub fn id(&self) -> u16 {
        self.0
    }

    /// The stage after this one.
    pub fn next(&self) -> MolResult<Self> {
        Self::new(self.0 + 1)
    }
}

impl Display for StageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl FromStr for StageId {
    type Err = MolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
            mol_bail!("'{}' is not a three digit stage key", s);
        }
        let id = s
            .parse::<u16>()
            .map_err(|e| mol_err!("'{}' is not a stage key: {}", s, e))?;
        Self::new(id)
    }
}

impl TryFrom<u16> for StageId {
    type Error = MolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// One stage of a reduction: the index pairs it added, sorted by global position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stage {
    pub id: StageId,
    pub indices: Vec<IndexPair>,
}

/// Options of [`Database::create_initial_reduction`].
#[derive(Clone, Debug, PartialEq)]
pub struct ReductionOptions {
    /// Records with one of these flags are not sampled.
    pub exclude_flags: Vec<f64>,
    /// Replace an existing reduction of the same name.
    pub overwrite: bool,
}

impl Default for ReductionOptions {
    fn default() -> Self {
        Self {
            exclude_flags: vec![FLAG_EXCLUDED],
            overwrite: false,
        }
    }
}

impl ReductionOptions {
    pub fn with_exclude_flags(mut self, exclude_flags: impl Into<Vec<f64>>) -> Self {
        self.exclude_flags = exclude_flags.into();
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// Options of [`Database::update_reduction`].
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateOptions {
    /// Records scored per predictor call.
    pub chunk_size: usize,
    /// Flags skipped in addition to [`FLAG_IN_REDUCTION`].
    pub exclude_flags: Vec<f64>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            exclude_flags: vec![FLAG_EXCLUDED],
        }
    }
}

impl UpdateOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_exclude_flags(mut self, exclude_flags: impl Into<Vec<f64>>) -> Self {
        self.exclude_flags = exclude_flags.into();
        self
    }
}

/// A candidate record together with the score the caller's scorer gave it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredRecord {
    pub position: usize,
    pub pair: IndexPair,
    pub score: f64,
}

impl<B: Backend> Database<B> {
    /// Start a reduction by sampling `floor(fraction * population)` distinct records.
    ///
    /// The population is every record whose flag is not in `options.exclude_flags`. The sampled
    /// records are flagged [`FLAG_IN_REDUCTION`] and stored as stage `000`.
    pub fn create_initial_reduction(
        &mut self,
        name: &str,
        fraction: f64,
        options: &ReductionOptions,
    ) -> MolResult<Stage> {
        check_name(name)?;
        if !(0.0..=1.0).contains(&fraction) {
            mol_bail!("fraction must be within [0, 1], got {}", fraction);
        }
        self.require_schema()?;

        if self.backend().contains(&reduction_path(name)) {
            if !options.overwrite {
                mol_bail!(AlreadyExists: "reduction '{}'", name);
            }
            self.drop_reduction(name)?;
        }

        let flags = self.flags()?;
        let population = exclude_values(&flags, &options.exclude_flags);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let amount = (fraction * population.len() as f64).floor() as usize;
        let positions = sample(&mut self.rng, population.len(), amount)
            .into_iter()
            .map(|i| population[i])
            .sorted()
            .collect_vec();
        let indices = self.pairs_at(&positions)?;

        let stage = Stage {
            id: StageId::FIRST,
            indices,
        };
        self.write_stage(name, &stage)?;
        self.set_flags(&positions, FLAG_IN_REDUCTION)?;
        log::debug!(
            "reduction '{name}' sampled {amount} of {} records",
            population.len()
        );
        Ok(stage)
    }

    /// Remove a reduction, releasing the flags of records no other reduction holds.
    fn drop_reduction(&mut self, name: &str) -> MolResult<()> {
        let held_elsewhere = self
            .reduction_names()?
            .into_iter()
            .filter(|other| other != name)
            .map(|other| self.reduction_pairs(&other))
            .flatten_ok()
            .collect::<MolResult<BTreeSet<_>>>()?;
        let released = self
            .reduction_pairs(name)?
            .into_iter()
            .filter(|pair| !held_elsewhere.contains(pair))
            .collect::<BTreeSet<_>>();

        let positions = self
            .index_entries()?
            .into_iter()
            .filter(|entry| released.contains(&entry.pair))
            .map(|entry| entry.position)
            .collect_vec();
        self.set_flags(&positions, FLAG_UNFLAGGED)?;
        self.backend_mut().remove(&reduction_path(name))?;
        log::debug!(
            "replaced reduction '{name}', released {} records",
            positions.len()
        );
        Ok(())
    }

    fn reduction_pairs(&self, name: &str) -> MolResult<Vec<IndexPair>> {
        let mut pairs = Vec::new();
        for stage in self.reduction_stages(name)? {
            pairs.extend(self.read_stage(name, stage)?.indices);
        }
        Ok(pairs)
    }

    fn write_stage(&mut self, name: &str, stage: &Stage) -> MolResult<()> {
        let chunk_rows = self.options().chunk_rows;
        self.backend_mut().create_array(
            &stage_path(name, stage.id),
            ArrayMeta::new(PType::I64, [2], chunk_rows),
            &pairs_to_array(&stage.indices),
        )
    }

    /// Names of all reductions, sorted.
    pub fn reduction_names(&self) -> MolResult<Vec<String>> {
        self.backend().list_children(REDUCTIONS)
    }

    /// Stage keys of a reduction, ascending.
    pub fn reduction_stages(&self, name: &str) -> MolResult<Vec<StageId>> {
        check_name(name)?;
        if !self.backend().contains(&reduction_path(name)) {
            mol_bail!(NotFound: "reduction '{}'", name);
        }
        let mut stages = self
            .backend()
            .list_children(&reduction_path(name))?
            .iter()
            .map(|key| key.parse::<StageId>())
            .collect::<MolResult<Vec<_>>>()?;
        stages.sort();
        Ok(stages)
    }

    pub fn read_stage(&self, name: &str, id: StageId) -> MolResult<Stage> {
        let path = stage_path(name, id);
        if !self.backend().is_array(&path) {
            mol_bail!(NotFound: "stage {} of reduction '{}'", id, name);
        }
        Ok(Stage {
            id,
            indices: pairs_from_array(&self.backend().read_all(&path)?)?,
        })
    }

    /// The numerically greatest stage of a reduction.
    pub fn get_last_reduction(&self, name: &str) -> MolResult<Stage> {
        let last = self
            .reduction_stages(name)?
            .last()
            .copied()
            .ok_or_else(|| mol_err!(NotFound: "reduction '{}' has no stages", name))?;
        self.read_stage(name, last)
    }

    /// Materialise the records of a stage (the latest by default) as dense, zero-padded arrays.
    pub fn dump_reduction(&self, name: &str, stage: Option<StageId>) -> MolResult<DenseBatch> {
        let stage = match stage {
            Some(id) => self.read_stage(name, id)?,
            None => self.get_last_reduction(name)?,
        };
        self.get_batch(&stage.indices)?.padded()
    }

    /// Extend a reduction by one stage.
    ///
    /// Every record outside all reductions (and not in `options.exclude_flags`) is passed, one
    /// window at a time, to `predictor` and then `scorer`, which must return one score per
    /// record of the window in [`Batch::indices`] order. `policy` receives every scored record and
    /// returns the ones to promote. The promoted records form the next stage and are flagged
    /// [`FLAG_IN_REDUCTION`]. Returns `None`, appending nothing, if the policy promotes nothing.
    pub fn update_reduction<P, Pred, Score, Policy>(
        &mut self,
        name: &str,
        options: &UpdateOptions,
        mut predictor: Pred,
        mut scorer: Score,
        policy: Policy,
    ) -> MolResult<Option<Stage>>
    where
        Pred: FnMut(&Batch) -> MolResult<P>,
        Score: FnMut(&Batch, &P) -> MolResult<Vec<f64>>,
        Policy: FnOnce(Vec<ScoredRecord>) -> MolResult<Vec<ScoredRecord>>,
    {
        let last = self
            .reduction_stages(name)?
            .last()
            .copied()
            .ok_or_else(|| mol_err!(NotFound: "reduction '{}' has no stages", name))?;
        let mut exclude = options.exclude_flags.clone();
        exclude.push(FLAG_IN_REDUCTION);

        let mut scored = Vec::new();
        {
            let loader = self.get_chunk_loader(options.chunk_size, Some(exclude.as_slice()))?;
            for i in 0..loader.len() {
                let window = loader.window(i)?;
                let batch = loader.get(i)?;
                let prediction = predictor(&batch)?;
                let scores = scorer(&batch, &prediction)?;
                if scores.len() != window.len() {
                    mol_bail!(
                        "scorer returned {} scores for a window of {} records",
                        scores.len(),
                        window.len()
                    );
                }
                scored.extend(window.iter().zip(scores).map(|(entry, score)| ScoredRecord {
                    position: entry.position,
                    pair: entry.pair,
                    score,
                }));
            }
        }

        let candidates = scored
            .iter()
            .map(|record| (record.position, record.pair))
            .collect::<HashMap<_, _>>();
        let num_candidates = scored.len();
        let promoted = policy(scored)?;

        let mut positions = BTreeSet::new();
        for record in &promoted {
            if candidates.get(&record.position) != Some(&record.pair) {
                mol_bail!(
                    "record {} at position {} was not a candidate",
                    record.pair,
                    record.position
                );
            }
            if !positions.insert(record.position) {
                mol_bail!("record at position {} promoted twice", record.position);
            }
        }
        if positions.is_empty() {
            log::debug!("reduction '{name}': nothing promoted from {num_candidates} candidates");
            return Ok(None);
        }

        let positions = positions.into_iter().collect_vec();
        let stage = Stage {
            id: last.next()?,
            indices: positions
                .iter()
                .map(|position| candidates[position])
                .collect(),
        };
        self.write_stage(name, &stage)?;
        self.set_flags(&positions, FLAG_IN_REDUCTION)?;
        log::debug!(
            "reduction '{name}' stage {} promoted {} of {num_candidates} candidates",
            stage.id,
            positions.len()
        );
        Ok(Some(stage))
    }
}
