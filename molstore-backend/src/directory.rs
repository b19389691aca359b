use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use itertools::Itertools;
use molstore_array::{NdArray, PType, Shape};
use molstore_error::{MolResult, ResultExt, mol_bail, mol_err};
use serde::{Deserialize, Serialize};

use crate::{ArrayMeta, Backend, path_components};

const ARRAY_META_FILE: &str = ".array.json";

/// On-disk metadata of one array.
#[derive(Debug, Serialize, Deserialize)]
struct ArrayFile {
    ptype: PType,
    row_shape: Shape,
    chunk_rows: usize,
    len: usize,
}

impl ArrayFile {
    fn meta(&self) -> ArrayMeta {
        ArrayMeta::new(self.ptype, self.row_shape.clone(), self.chunk_rows)
    }

    fn rows_in_chunk(&self, chunk: usize) -> usize {
        let start = chunk * self.chunk_rows;
        self.len.saturating_sub(start).min(self.chunk_rows)
    }
}

/// A [`Backend`] that maps the namespace onto a directory tree.
///
/// Groups are directories. Each array is a directory holding a `.array.json` metadata file and
/// one file per chunk (`c.0`, `c.1`, ...), each containing `chunk_rows` rows as raw
/// little-endian elements (the last chunk may be shorter). Metadata is replaced atomically
/// after chunk data has been written, so the committed length never covers unwritten rows.
/// An interrupted append may leave rows beyond the committed length in the last chunk file;
/// they are ignored and overwritten by the next append.
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    /// Open (creating if needed) a directory backend rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> MolResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        log::debug!("opened directory backend at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> MolResult<PathBuf> {
        let mut resolved = self.root.clone();
        for part in path_components(path)? {
            resolved.push(part);
        }
        Ok(resolved)
    }

    fn read_meta(dir: &Path) -> MolResult<ArrayFile> {
        let raw = match fs::read(dir.join(ARRAY_META_FILE)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                mol_bail!(NotFound: "no array at '{}'", dir.display())
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    fn write_meta(dir: &Path, file: &ArrayFile) -> MolResult<()> {
        let tmp = dir.join(format!("{ARRAY_META_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec(file)?)?;
        fs::rename(&tmp, dir.join(ARRAY_META_FILE))?;
        Ok(())
    }

    fn chunk_path(dir: &Path, chunk: usize) -> PathBuf {
        dir.join(format!("c.{chunk}"))
    }

    fn read_chunk(dir: &Path, file: &ArrayFile, chunk: usize) -> MolResult<NdArray> {
        let rows = file.rows_in_chunk(chunk);
        let row_bytes = file.row_shape.num_elements() * file.ptype.byte_width();
        let mut raw = fs::read(Self::chunk_path(dir, chunk))
            .map_err(|e| mol_err!(NotFound: "chunk {} of '{}': {}", chunk, dir.display(), e))?;
        // Bytes past the committed length belong to an interrupted append.
        raw.truncate(rows * row_bytes);
        NdArray::from_le_bytes(file.ptype, file.row_shape.prepend(rows), Bytes::from(raw))
    }

    fn write_chunk(dir: &Path, chunk: usize, data: &NdArray) -> MolResult<()> {
        fs::write(Self::chunk_path(dir, chunk), data.to_le_bytes())?;
        Ok(())
    }

    /// Write `rows` after the first `file.len` rows, chunk by chunk, then commit the new length.
    fn append_to(dir: &Path, file: &mut ArrayFile, rows: &NdArray) -> MolResult<()> {
        let mut written = 0;
        while written < rows.len() {
            let chunk = file.len / file.chunk_rows;
            let filled = file.len % file.chunk_rows;
            let take = (file.chunk_rows - filled).min(rows.len() - written);
            let incoming = rows.slice_rows(written..written + take)?;
            let data = if filled == 0 {
                incoming
            } else {
                let mut existing = Self::read_chunk(dir, file, chunk)?;
                existing.append_rows(&incoming)?;
                existing
            };
            Self::write_chunk(dir, chunk, &data)?;
            written += take;
            file.len += take;
        }
        Self::write_meta(dir, file)
    }
}

impl Backend for DirectoryBackend {
    fn create_array(&mut self, path: &str, meta: ArrayMeta, initial: &NdArray) -> MolResult<()> {
        meta.check()?;
        meta.check_rows(initial)?;
        if path_components(path)?.is_empty() {
            mol_bail!("cannot create an array at the root");
        }
        let dir = self.resolve(path)?;
        if dir.exists() {
            mol_bail!(AlreadyExists: "'{}'", path);
        }
        if let Some(parent) = dir.parent() {
            // An array cannot live below another array.
            let mut ancestor = Some(parent);
            while let Some(candidate) = ancestor {
                if candidate == self.root {
                    break;
                }
                if candidate.join(ARRAY_META_FILE).exists() {
                    mol_bail!(AlreadyExists: "'{}' is an array", candidate.display());
                }
                ancestor = candidate.parent();
            }
        }
        fs::create_dir_all(&dir)?;

        let mut file = ArrayFile {
            ptype: meta.ptype,
            row_shape: meta.row_shape,
            chunk_rows: meta.chunk_rows,
            len: 0,
        };
        log::trace!("creating array '{}' with {} rows", path, initial.len());
        Self::append_to(&dir, &mut file, initial)
            .with_context(|| format!("creating array '{path}'"))
    }

    fn append_rows(&mut self, path: &str, rows: &NdArray) -> MolResult<usize> {
        let dir = self.resolve(path)?;
        let mut file = Self::read_meta(&dir)?;
        file.meta().check_rows(rows)?;
        Self::append_to(&dir, &mut file, rows)
            .with_context(|| format!("appending to '{path}'"))?;
        Ok(file.len)
    }

    fn write_rows(&mut self, path: &str, indices: &[usize], rows: &NdArray) -> MolResult<()> {
        let dir = self.resolve(path)?;
        let file = Self::read_meta(&dir)?;
        file.meta().check_rows(rows)?;
        if indices.len() != rows.len() {
            mol_bail!(
                "{} row indices given for {} replacement rows",
                indices.len(),
                rows.len()
            );
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= file.len) {
            mol_bail!(OutOfBounds: bad, 0, file.len);
        }

        let by_chunk = indices
            .iter()
            .enumerate()
            .map(|(n, &index)| (index / file.chunk_rows, (index % file.chunk_rows, n)))
            .into_group_map();
        for (chunk, targets) in by_chunk.into_iter().sorted_by_key(|(chunk, _)| *chunk) {
            let mut data = Self::read_chunk(&dir, &file, chunk)?;
            let (local, source): (Vec<usize>, Vec<usize>) = targets.into_iter().unzip();
            data.write_rows(&local, &rows.take_rows(&source)?)?;
            Self::write_chunk(&dir, chunk, &data)?;
        }
        Ok(())
    }

    fn read_rows(&self, path: &str, indices: &[usize]) -> MolResult<NdArray> {
        let dir = self.resolve(path)?;
        let file = Self::read_meta(&dir)?;
        if let Some(&bad) = indices.iter().find(|&&i| i >= file.len) {
            mol_bail!(OutOfBounds: bad, 0, file.len);
        }

        let mut chunks: HashMap<usize, NdArray> = HashMap::new();
        let mut result = NdArray::zeros(file.ptype, file.meta().shape(0));
        for &index in indices {
            let chunk = index / file.chunk_rows;
            if !chunks.contains_key(&chunk) {
                chunks.insert(chunk, Self::read_chunk(&dir, &file, chunk)?);
            }
            let data = chunks
                .get(&chunk)
                .ok_or_else(|| mol_err!(AssertionFailed: "chunk {} was just loaded", chunk))?;
            result.append_rows(&data.take_rows(&[index % file.chunk_rows])?)?;
        }
        Ok(result)
    }

    fn array_meta(&self, path: &str) -> MolResult<ArrayMeta> {
        Ok(Self::read_meta(&self.resolve(path)?)?.meta())
    }

    fn array_len(&self, path: &str) -> MolResult<usize> {
        Ok(Self::read_meta(&self.resolve(path)?)?.len)
    }

    fn contains(&self, path: &str) -> bool {
        self.resolve(path).map(|dir| dir.is_dir()).unwrap_or(false)
    }

    fn is_array(&self, path: &str) -> bool {
        self.resolve(path)
            .map(|dir| dir.join(ARRAY_META_FILE).is_file())
            .unwrap_or(false)
    }

    fn list_children(&self, path: &str) -> MolResult<Vec<String>> {
        let dir = self.resolve(path)?;
        if !dir.is_dir() || dir.join(ARRAY_META_FILE).is_file() {
            return Ok(Vec::new());
        }
        let mut children = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                children.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        children.sort();
        Ok(children)
    }

    fn remove(&mut self, path: &str) -> MolResult<()> {
        let dir = self.resolve(path)?;
        if dir == self.root {
            return self.clear();
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&mut self) -> MolResult<()> {
        log::debug!("clearing directory backend at {}", self.root.display());
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}
