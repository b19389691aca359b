use molstore_backend::DEFAULT_CHUNK_ROWS;
use molstore_error::{MolResult, mol_bail};
use serde::Deserialize;

/// Options used when opening a [`crate::Database`].
///
/// Options can be built with the `with_*` methods or deserialized from JSON, in which case every
/// field is optional.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseOptions {
    /// Properties to store. Inferred from the first record when absent. Only applies to a
    /// fresh store.
    pub property_names: Option<Vec<String>>,
    /// Clear any existing content when opening.
    pub allow_overwriting: bool,
    /// Rows per storage chunk of every growable array.
    pub chunk_rows: usize,
    /// Seed for reduction sampling. Sampling uses OS entropy when absent.
    pub seed: Option<u64>,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            property_names: None,
            allow_overwriting: false,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            seed: None,
        }
    }
}

impl DatabaseOptions {
    /// Store only the given properties. `species` is added if missing.
    pub fn with_property_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.property_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Clear existing content on open.
    pub fn with_overwriting(mut self, allow_overwriting: bool) -> Self {
        self.allow_overwriting = allow_overwriting;
        self
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> MolResult<Self> {
        if chunk_rows == 0 {
            mol_bail!("chunk_rows must be positive");
        }
        self.chunk_rows = chunk_rows;
        Ok(self)
    }

    /// Make reduction sampling reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Read options from a JSON object such as `{"allow_overwriting": true, "chunk_rows": 50}`.
    pub fn from_json_str(json: &str) -> MolResult<Self> {
        let options: Self = serde_json::from_str(json)?;
        if options.chunk_rows == 0 {
            mol_bail!("chunk_rows must be positive");
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use molstore_error::MolError;

    use super::*;

    #[test]
    fn defaults() {
        let options = DatabaseOptions::default();
        assert_eq!(options.chunk_rows, 100);
        assert!(!options.allow_overwriting);
        assert!(options.property_names.is_none());
    }

    #[test]
    fn from_json() {
        let options =
            DatabaseOptions::from_json_str(r#"{"property_names": ["species", "forces"], "seed": 7}"#)
                .unwrap();
        assert_eq!(
            options,
            DatabaseOptions::default()
                .with_property_names(["species", "forces"])
                .with_seed(7)
        );

        assert!(matches!(
            DatabaseOptions::from_json_str(r#"{"chunk_size": 3}"#).unwrap_err(),
            MolError::JSONError(..)
        ));
        assert!(DatabaseOptions::from_json_str(r#"{"chunk_rows": 0}"#).is_err());
    }

    #[test]
    fn zero_chunk_rows_rejected() {
        assert!(DatabaseOptions::default().with_chunk_rows(0).is_err());
        assert_eq!(
            DatabaseOptions::default()
                .with_chunk_rows(8)
                .unwrap()
                .chunk_rows,
            8
        );
    }
}
