//! NDJSON record reading

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

use super::{category_path, Record};
use crate::category::Category;
use crate::error::JoinError;

/// Reader yielding one [`Record`] per non-blank line
pub struct RecordReader<R> {
    inner: R,
    path: PathBuf,
    line: usize,
    buf: String,
}

impl<R: BufRead> RecordReader<R> {
    /// Create a reader; `path` is only used in error messages
    pub fn new(inner: R, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
            line: 0,
            buf: String::new(),
        }
    }

    /// Read the next record, `None` at end of input
    pub fn read_record(&mut self) -> Result<Option<Record>, JoinError> {
        loop {
            self.buf.clear();
            let n = self.inner.read_line(&mut self.buf).map_err(|e| JoinError::Io {
                msg: format!("Failed to read {}: {}", self.path.display(), e),
            })?;
            if n == 0 {
                return Ok(None);
            }
            self.line += 1;

            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }

            return Record::parse(line).map(Some).map_err(|msg| JoinError::Parse {
                path: self.path.clone(),
                line: self.line,
                msg,
            });
        }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<Record, JoinError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Open an NDJSON file, decompressing `.gz` files
pub fn open_records<P: AsRef<Path>>(
    path: P,
) -> Result<RecordReader<Box<dyn BufRead>>, JoinError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| JoinError::Io {
        msg: format!("Failed to open {}: {}", path.display(), e),
    })?;

    let reader: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    Ok(RecordReader::new(reader, path))
}

/// Read every record of an NDJSON file
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, JoinError> {
    open_records(path)?.collect()
}

/// Read every part file of a category for one project.
///
/// Part files are read in file-name order. Hidden files and files starting
/// with `_` (markers such as `_SUCCESS`) are skipped.
pub fn read_category(
    root: &Path,
    category: &Category,
    project: &str,
) -> Result<Vec<Record>, JoinError> {
    let dir = category_path(root, category, project);
    let mut records = Vec::new();
    for part in part_files(&dir)? {
        records.extend(read_records(&part)?);
    }
    Ok(records)
}

fn part_files(dir: &Path) -> Result<Vec<PathBuf>, JoinError> {
    let entries = fs::read_dir(dir).map_err(|e| JoinError::Io {
        msg: format!("Failed to list {}: {}", dir.display(), e),
    })?;

    let mut parts = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }
        if entry.file_type()?.is_file() {
            parts.push(entry.path());
        }
    }
    parts.sort();
    Ok(parts)
}
