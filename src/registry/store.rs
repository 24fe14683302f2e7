//! On-disk administrative database: one record file per format.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BinfmtError, BinfmtResult};
use crate::format::FormatRecord;

/// The administrative directory. Loading is a projection of what is on
/// disk; nothing here caches.
#[derive(Debug, Clone)]
pub struct RecordStore {
    admindir: PathBuf,
}

impl RecordStore {
    pub fn new(admindir: impl Into<PathBuf>) -> Self {
        Self { admindir: admindir.into() }
    }

    pub fn admindir(&self) -> &Path {
        &self.admindir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.admindir.join(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Load one record. Absent records are `None`; unreadable or corrupt
    /// ones are errors.
    pub fn load(&self, name: &str) -> BinfmtResult<Option<FormatRecord>> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Ok(None);
        }
        FormatRecord::load(name, &path).map(Some)
    }

    /// Like [`load`](Self::load), but a broken record counts as absent.
    pub fn load_quiet(&self, name: &str) -> Option<FormatRecord> {
        match self.load(name) {
            Ok(record) => record,
            Err(e) => {
                debug!(name, error = %e, "Ignoring unreadable binary format");
                None
            }
        }
    }

    /// Names of every regular file in the administrative directory, sorted.
    ///
    /// An unreadable directory is fatal.
    pub fn names(&self) -> BinfmtResult<Vec<String>> {
        let entries = fs::read_dir(&self.admindir)
            .map_err(|source| BinfmtError::AdminDir { path: self.admindir.clone(), source })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|source| BinfmtError::AdminDir { path: self.admindir.clone(), source })?;
            let Ok(name) = entry.file_name().into_string() else {
                debug!(entry = ?entry.file_name(), "Skipping non-UTF-8 file name");
                continue;
            };
            if entry.path().is_file() {
                names.push(name);
            }
        }
        names.sort();

        Ok(names)
    }

    /// Every loadable record, in name order. Broken records are skipped.
    pub fn load_all(&self) -> BinfmtResult<Vec<FormatRecord>> {
        Ok(self.names()?.iter().filter_map(|name| self.load_quiet(name)).collect())
    }

    /// Write a record so that readers only ever see the old or the new file.
    pub fn write(&self, record: &FormatRecord) -> BinfmtResult<()> {
        let target = self.path_for(&record.name);

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", record.name))
            .suffix(".tmp")
            .tempfile_in(&self.admindir)
            .map_err(|e| {
                let context =
                    format!("unable to create temporary file in {}", self.admindir.display());
                BinfmtError::io(context, e)
            })?;

        tmp.write_all(record.to_file_contents().as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| BinfmtError::io(format!("unable to write {}", tmp.path().display()), e))?;

        if let Err(e) = tmp.persist(&target) {
            debug!(target = %target.display(), error = %e.error, "Rename failed, copying instead");
            // Dropping the temporary file afterwards removes it.
            fs::copy(e.file.path(), &target).map_err(|source| {
                BinfmtError::io(
                    format!("unable to install {} as {}", e.file.path().display(), target.display()),
                    source,
                )
            })?;
        }

        Ok(())
    }

    pub fn remove(&self, name: &str) -> BinfmtResult<()> {
        let path = self.path_for(name);
        fs::remove_file(&path)
            .map_err(|e| BinfmtError::io(format!("unable to remove {}", path.display()), e))
    }
}
