//! NDJSON record writing with staged, all-or-nothing commits

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::Record;
use crate::error::JoinError;

/// Write records to a single NDJSON file
pub fn write_records<P: AsRef<Path>>(path: P, records: &[Record]) -> Result<usize, JoinError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| JoinError::Io {
        msg: format!("Failed to create {}: {}", path.display(), e),
    })?;
    let mut writer = BufWriter::new(file);
    for record in records {
        writer.write_all(record.to_json_line()?.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(records.len())
}

/// Writes part files into a hidden staging directory next to the target and
/// moves them into place on [`StagedWriter::commit`].
///
/// Dropping an uncommitted writer removes the staging directory, so a failed
/// task leaves neither partial output nor a stale target.
#[derive(Debug)]
pub struct StagedWriter {
    staging: PathBuf,
    backup: PathBuf,
    target: PathBuf,
    parts: usize,
    records: usize,
    committed: bool,
}

impl StagedWriter {
    /// Prepare a staging directory for `target`
    pub fn create<P: AsRef<Path>>(target: P) -> Result<Self, JoinError> {
        let target = target.as_ref().to_path_buf();
        let name = target
            .file_name()
            .ok_or_else(|| JoinError::Io {
                msg: format!("Invalid output directory: {}", target.display()),
            })?
            .to_string_lossy()
            .into_owned();
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        let staging = parent.join(format!(".{}.staging", name));
        let backup = parent.join(format!(".{}.previous", name));

        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging).map_err(|e| JoinError::Io {
            msg: format!("Failed to create {}: {}", staging.display(), e),
        })?;

        Ok(Self {
            staging,
            backup,
            target,
            parts: 0,
            records: 0,
            committed: false,
        })
    }

    /// Write the next part file
    pub fn write_part(&mut self, records: &[Record]) -> Result<PathBuf, JoinError> {
        let path = self.staging.join(format!("part-{:05}.json", self.parts));
        self.records += write_records(&path, records)?;
        self.parts += 1;
        Ok(self.target.join(format!("part-{:05}.json", self.parts - 1)))
    }

    /// Number of records written so far
    pub fn records_written(&self) -> usize {
        self.records
    }

    /// Directory the output is committed to
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Replace the target directory with the staged output.
    ///
    /// A previous output is moved aside first and only deleted once the new
    /// output is in place.
    pub fn commit(mut self) -> Result<PathBuf, JoinError> {
        let previous = self.swap_in()?;
        if let Some(previous) = previous {
            fs::remove_dir_all(previous)?;
        }
        Ok(self.target.clone())
    }

    /// Move the staged output into place, returning where the previous output
    /// was moved to. On failure the previous output is restored.
    fn swap_in(&mut self) -> Result<Option<PathBuf>, JoinError> {
        let previous = if self.target.exists() {
            if self.backup.exists() {
                fs::remove_dir_all(&self.backup)?;
            }
            fs::rename(&self.target, &self.backup).map_err(|e| JoinError::Io {
                msg: format!("Failed to move aside {}: {}", self.target.display(), e),
            })?;
            Some(self.backup.clone())
        } else {
            None
        };

        if let Err(e) = fs::rename(&self.staging, &self.target) {
            if let Some(previous) = &previous {
                let _ = fs::rename(previous, &self.target);
            }
            return Err(JoinError::Io {
                msg: format!(
                    "Failed to commit {} to {}: {}",
                    self.staging.display(),
                    self.target.display(),
                    e
                ),
            });
        }
        self.committed = true;
        Ok(previous)
    }
}

/// Undo a swap: drop the new output and put the previous one back
fn restore(target: &Path, previous: Option<&Path>) {
    let _ = fs::remove_dir_all(target);
    if let Some(previous) = previous {
        let _ = fs::rename(previous, target);
    }
}

/// Commit several staged outputs together.
///
/// Either every target is replaced or, if any move fails, every target is
/// left as it was before the call.
pub fn commit_all(writers: Vec<StagedWriter>) -> Result<Vec<PathBuf>, JoinError> {
    let mut swapped: Vec<(PathBuf, Option<PathBuf>)> = Vec::with_capacity(writers.len());
    for mut writer in writers {
        match writer.swap_in() {
            Ok(previous) => swapped.push((writer.target.clone(), previous)),
            Err(e) => {
                for (target, previous) in swapped.iter().rev() {
                    restore(target, previous.as_deref());
                }
                return Err(e);
            }
        }
    }

    for (_, previous) in &swapped {
        if let Some(previous) = previous {
            fs::remove_dir_all(previous)?;
        }
    }
    Ok(swapped.into_iter().map(|(target, _)| target).collect())
}

impl Drop for StagedWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_dir_all(&self.staging);
        }
    }
}
