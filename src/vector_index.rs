use memmap2::Mmap;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use tracing::debug;

use crate::error::{FilterError, Result};
use crate::manifest::{key_string, split_fields};

/// Set of utterance keys available in a vector store.
///
/// Only the first whitespace-delimited field of each line is read; the vector
/// payload (an `ark:` offset, inline values, ...) is never interpreted.
#[derive(Debug, Default, Clone)]
pub struct VectorStoreIndex {
    keys: HashSet<String>,
}

impl VectorStoreIndex {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FilterError::MissingFile {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path).map_err(|e| FilterError::io(path, e))?;
        let len = file.metadata().map_err(|e| FilterError::io(path, e))?.len();
        if len == 0 {
            debug!(path = %path.display(), "vector store is empty");
            return Ok(Self::default());
        }

        let mmap = unsafe { Mmap::map(&file).map_err(|e| FilterError::io(path, e))? };
        let index = Self::from_bytes(&mmap);
        debug!(
            path = %path.display(),
            bytes = len,
            keys = index.len(),
            "built vector store index"
        );
        Ok(index)
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut keys = HashSet::new();
        let mut duplicates = 0usize;
        for line in bytes.split(|&b| b == b'\n') {
            if let Some(key) = split_fields(line).next() {
                if !keys.insert(key_string(key)) {
                    duplicates += 1;
                }
            }
        }
        if duplicates > 0 {
            debug!(duplicates, "ignored duplicate vector keys");
        }
        Self { keys }
    }

    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
