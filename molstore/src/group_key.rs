use std::fmt::{Display, Formatter};
use std::str::FromStr;

use molstore_error::{MolError, MolResult, mol_bail, mol_err};

/// Identifies the storage group of a record by its entity size (e.g. its atom count).
///
/// Group keys are rendered as exactly three zero-padded digits, so sizes above
/// [`GroupKey::MAX`] cannot be stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey(u16);

impl GroupKey {
    pub const MAX: usize = 999;

    pub fn new(entity_size: usize) -> MolResult<Self> {
        if entity_size > Self::MAX {
            mol_bail!(
                "entity size {} exceeds the largest representable group key {}",
                entity_size,
                Self::MAX
            );
        }
        let key = u16::try_from(entity_size)
            .map_err(|_| mol_err!("entity size {} does not fit a group key", entity_size))?;
        Ok(Self(key))
    }

    /// The entity size shared by every record of this group.
    pub fn entity_size(&self) -> usize {
        usize::from(self.0)
    }

    pub(crate) fn from_i64(value: i64) -> MolResult<Self> {
        let size = usize::try_from(value)
            .map_err(|_| mol_err!("negative group key {}", value))?;
        Self::new(size)
    }

    pub(crate) fn as_i64(&self) -> i64 {
        i64::from(self.0)
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl FromStr for GroupKey {
    type Err = MolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
            mol_bail!("'{}' is not a three digit group key", s);
        }
        let size = s
            .parse::<usize>()
            .map_err(|e| mol_err!("'{}' is not a group key: {}", s, e))?;
        Self::new(size)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(3, "003")]
    #[case(42, "042")]
    #[case(0, "000")]
    #[case(999, "999")]
    fn renders_three_digits(#[case] size: usize, #[case] expected: &str) {
        let key = GroupKey::new(size).unwrap();
        assert_eq!(key.to_string(), expected);
        assert_eq!(expected.parse::<GroupKey>().unwrap(), key);
    }

    #[test]
    fn rejects_oversized_entities() {
        assert!(GroupKey::new(1000).is_err());
        assert!(GroupKey::from_i64(-1).is_err());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!("3".parse::<GroupKey>().is_err());
        assert!("0x3".parse::<GroupKey>().is_err());
        assert!("1000".parse::<GroupKey>().is_err());
    }
}
