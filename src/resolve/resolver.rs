//! Interpreter resolution.
//!
//! Redoes the kernel's matching in userspace (see `check_file()` in
//! `fs/binfmt_misc.c`) and then consults detectors, which the kernel
//! cannot run itself. There is a small window between the kernel's check
//! and ours; no privilege is gained through it unless a set-id binary is
//! made a handler.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{BinfmtError, BinfmtResult};
use crate::format::{FormatRecord, MatchRule, filename_extension};
use crate::registry::RecordStore;
use crate::resolve::detector::DetectorRunner;

/// A loaded set of records ready to be matched against files.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    formats: Vec<(FormatRecord, MatchRule)>,
}

impl Resolver {
    /// Compile `records`, dropping any whose rule is unusable.
    pub fn new(records: impl IntoIterator<Item = FormatRecord>) -> Self {
        let formats = records
            .into_iter()
            .filter_map(|record| match MatchRule::compile(&record) {
                Ok(rule) => Some((record, rule)),
                Err(e) => {
                    // Not worth a warning: it would fire for unrelated programs.
                    debug!(name = %record.name, error = %e, "Skipping binary format");
                    None
                }
            })
            .collect();

        Self { formats }
    }

    /// Every record in the administrative directory.
    pub fn from_store(store: &RecordStore) -> BinfmtResult<Self> {
        Ok(Self::new(store.load_all()?))
    }

    /// Records in the administrative directory for which `keep` holds.
    pub fn from_store_filtered(
        store: &RecordStore,
        keep: impl Fn(&str) -> bool,
    ) -> BinfmtResult<Self> {
        let records = store.names()?.into_iter().filter(|name| keep(name)).collect::<Vec<_>>();
        Ok(Self::new(records.iter().filter_map(|name| store.load_quiet(name))))
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Number of leading bytes any rule needs to look at.
    pub fn probe_len(&self) -> usize {
        self.formats.iter().map(|(_, rule)| rule.probe_len()).max().unwrap_or(0)
    }

    /// Records whose static rule matches, in load order.
    pub fn candidates<'a>(
        &'a self,
        probe: &[u8],
        extension: Option<&str>,
    ) -> Vec<&'a FormatRecord> {
        self.formats
            .iter()
            .filter(|(_, rule)| rule.matches(probe, extension))
            .map(|(record, _)| record)
            .collect()
    }

    /// Ordered list of records that should handle `path`.
    ///
    /// Records with a detector come first, in order, and only if their
    /// detector accepts the file. Records without one follow as fallbacks.
    pub fn resolve(
        &self,
        path: &Path,
        detectors: &impl DetectorRunner,
    ) -> BinfmtResult<Vec<FormatRecord>> {
        let probe = read_probe(path, self.probe_len())?;
        let path_str = path.to_string_lossy();
        let extension = filename_extension(&path_str);

        let candidates = self.candidates(&probe, extension);
        let (with_detector, without_detector): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|record| record.has_detector());

        let mut resolved: Vec<FormatRecord> = with_detector
            .into_iter()
            .filter(|record| detectors.accepts(&record.detector, path))
            .cloned()
            .collect();
        resolved.extend(without_detector.into_iter().cloned());

        debug!(path = %path.display(), count = resolved.len(), "Resolved interpreters");
        Ok(resolved)
    }
}

/// Read up to `len` bytes of `path` into a zero-filled buffer of exactly
/// `len` bytes. Short files are not an error.
pub fn read_probe(path: &Path, len: usize) -> BinfmtResult<Vec<u8>> {
    let target = |source| BinfmtError::Target { path: path.to_path_buf(), source };

    let file = File::open(path).map_err(target)?;
    let mut buf = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buf).map_err(target)?;
    buf.resize(len, 0);

    Ok(buf)
}
