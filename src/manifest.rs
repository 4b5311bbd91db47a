use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{FilterError, Result};

/// How to treat a manifest line that has a key but no label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinePolicy {
    /// Fail with `MalformedLine`.
    Strict,
    /// Treat the label as empty and emit `key ` in its place.
    Permissive,
}

/// One `key label` line of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLine {
    pub line_number: usize,
    pub key: String,
    /// Exact bytes to write out, line terminator included.
    pub text: Vec<u8>,
    /// Set when the line had no label and was rewritten under the permissive policy.
    pub normalized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestItem {
    Blank,
    Line(ManifestLine),
}

/// Whitespace-separated fields of a line. Vector stores and manifests both
/// split with this, so a key tokenizes the same way on either side.
pub fn split_fields(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(|b| b.is_ascii_whitespace())
        .filter(|field| !field.is_empty())
}

/// Key as stored in the index; invalid UTF-8 is replaced, never rejected.
pub fn key_string(field: &[u8]) -> String {
    String::from_utf8_lossy(field).into_owned()
}

/// Streams a label manifest in file order.
pub struct ManifestReader<R> {
    reader: R,
    path: PathBuf,
    policy: LinePolicy,
    line_number: usize,
    buf: Vec<u8>,
}

impl ManifestReader<BufReader<File>> {
    pub fn open(path: &Path, policy: LinePolicy) -> Result<Self> {
        if !path.exists() {
            return Err(FilterError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path).map_err(|e| FilterError::io(path, e))?;
        Ok(Self::new(BufReader::new(file), path, policy))
    }
}

impl<R: BufRead> ManifestReader<R> {
    pub fn new(reader: R, path: &Path, policy: LinePolicy) -> Self {
        Self {
            reader,
            path: path.to_path_buf(),
            policy,
            line_number: 0,
            buf: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_next(&mut self) -> Result<Option<ManifestItem>> {
        self.buf.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .map_err(|e| FilterError::io(&self.path, e))?;
        if read == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        parse_line(&self.buf, self.line_number, self.policy, &self.path).map(Some)
    }
}

impl<R: BufRead> Iterator for ManifestReader<R> {
    type Item = Result<ManifestItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

pub fn parse_line(
    raw: &[u8],
    line_number: usize,
    policy: LinePolicy,
    path: &Path,
) -> Result<ManifestItem> {
    let body_len = raw.len()
        - raw
            .iter()
            .rev()
            .take_while(|&&b| b == b'\n' || b == b'\r')
            .count();
    let (body, terminator) = raw.split_at(body_len);

    let mut fields = split_fields(body);
    let key = match fields.next() {
        Some(key) => key,
        None => return Ok(ManifestItem::Blank),
    };

    if fields.next().is_some() {
        return Ok(ManifestItem::Line(ManifestLine {
            line_number,
            key: key_string(key),
            text: raw.to_vec(),
            normalized: false,
        }));
    }

    match policy {
        LinePolicy::Strict => Err(FilterError::MalformedLine {
            path: path.to_path_buf(),
            line_number,
            line: String::from_utf8_lossy(body).into_owned(),
        }),
        LinePolicy::Permissive => {
            let mut text = Vec::with_capacity(key.len() + 1 + terminator.len());
            text.extend_from_slice(key);
            text.push(b' ');
            text.extend_from_slice(terminator);
            Ok(ManifestItem::Line(ManifestLine {
                line_number,
                key: key_string(key),
                text,
                normalized: true,
            }))
        }
    }
}
