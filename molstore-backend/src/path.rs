use itertools::Itertools;
use molstore_error::{MolResult, mol_bail};

/// Split a `/`-separated path into its components.
///
/// Leading and trailing separators are ignored. Empty components, `.` and `..` are rejected.
pub fn path_components(path: &str) -> MolResult<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parts = trimmed.split('/').collect_vec();
    for part in &parts {
        if part.is_empty() || *part == "." || *part == ".." {
            mol_bail!("invalid path component '{}' in '{}'", part, path);
        }
    }
    Ok(parts)
}

/// Join path components with `/`.
pub fn join_path<S: AsRef<str>>(parts: &[S]) -> String {
    parts.iter().map(|p| p.as_ref()).join("/")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("data/003/forces", &["data", "003", "forces"])]
    #[case("/global/", &["global"])]
    #[case("", &[])]
    fn valid_components(#[case] path: &str, #[case] expected: &[&str]) {
        assert_eq!(path_components(path).unwrap(), expected);
    }

    #[rstest]
    #[case("data//forces")]
    #[case("data/../etc")]
    #[case("./data")]
    fn invalid_components(#[case] path: &str) {
        assert!(path_components(path).is_err());
    }

    #[test]
    fn join() {
        assert_eq!(join_path(&["reductions", "first", "000"]), "reductions/first/000");
    }
}
