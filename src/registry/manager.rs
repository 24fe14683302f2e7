//! Registry operations.
//!
//! Each operation keeps the administrative directory, package ownership and
//! the kernel's binfmt_misc entries in step. The administrative directory is
//! the reference: when the kernel disagrees, re-running a bulk enable or
//! disable brings it back in line.

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::PathsConfig;
use crate::error::{BinfmtError, BinfmtResult};
use crate::format::{FormatRecord, FormatSpec, owner_label, validate_name};
use crate::kernel::{BinfmtKernel, Registration, is_executable};
use crate::registry::import::read_import;
use crate::registry::store::RecordStore;
use crate::resolve::{DetectorRunner, Resolver};

/// A record together with whether the kernel currently has it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatStatus {
    pub record: FormatRecord,
    pub enabled: bool,
}

impl fmt::Display for FormatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = &self.record;
        let state = if self.enabled { "enabled" } else { "disabled" };

        writeln!(f, "{} ({}):", record.name, state)?;
        writeln!(f, "{:>12} = {}", "package", record.owner_label())?;
        writeln!(f, "{:>12} = {}", "type", record.kind)?;
        writeln!(f, "{:>12} = {}", "offset", record.offset)?;
        writeln!(f, "{:>12} = {}", "magic", record.pattern)?;
        writeln!(f, "{:>12} = {}", "mask", record.mask)?;
        writeln!(f, "{:>12} = {}", "interpreter", record.interpreter)?;
        writeln!(f, "{:>12} = {}", "detector", record.detector)
    }
}

/// The binary format registry: administrative database plus kernel.
pub struct Registry<K: BinfmtKernel> {
    store: RecordStore,
    kernel: K,
    importdir: PathBuf,
    run_detectors: String,
    dry_run: bool,
    /// Where dry runs report what they would have done.
    output: RefCell<Box<dyn Write>>,
}

impl<K: BinfmtKernel> Registry<K> {
    pub fn new(paths: &PathsConfig, kernel: K) -> Self {
        Self {
            store: RecordStore::new(&paths.admindir),
            kernel,
            importdir: paths.importdir.clone(),
            run_detectors: paths.run_detectors.to_string_lossy().into_owned(),
            dry_run: false,
            output: RefCell::new(Box::new(io::stdout())),
        }
    }

    /// Print what would be done instead of doing it.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Send dry-run output somewhere other than stdout.
    pub fn with_output(mut self, output: impl Write + 'static) -> Self {
        self.output = RefCell::new(Box::new(output));
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Add or replace a format and enable it.
    ///
    /// An existing format may only be replaced by its own package.
    pub fn install(&self, record: FormatRecord) -> BinfmtResult<()> {
        record.validate()?;
        let name = record.name.as_str();

        let previous = self.store.load_quiet(name);
        if let Some(existing) = &previous
            && existing.owner != record.owner
        {
            return Err(BinfmtError::OwnershipConflict {
                current: owner_label(&record.owner).to_string(),
                existing: existing.owner_label().to_string(),
            });
        }

        // Checked separately in case the existing file is corrupt.
        if self.store.contains(name) {
            self.disable(Some(name)).map_err(|e| {
                warn!("{}", e);
                BinfmtError::DisableFailed(name.to_string())
            })?;
        }

        if !self.dry_run && self.kernel.is_enabled(name) {
            // Somebody used binfmt_misc directly, or a previous run went
            // wrong. Disabling and re-enabling everything sorts this out.
            warn!(
                "found manually created entry for {} in the kernel; leaving it alone",
                name
            );
            return Ok(());
        }

        if self.dry_run {
            self.report(&format!(
                "install the following binary format description:\n{}",
                record.describe()
            ))?;
        } else {
            self.store.write(&record)?;
        }

        self.load_support().and_then(|_| self.register(&record)).map_err(|e| {
            warn!("{}", e);
            BinfmtError::EnableFailed(name.to_string())
        })?;

        // Peers of the rule being replaced lose a sharer too.
        let refreshed = self.refresh_peers(&record);
        match previous {
            Some(previous) if !previous.same_rule(&record) => {
                refreshed.and(self.refresh_peers(&previous))
            }
            _ => refreshed,
        }
    }

    /// Disable a format in the kernel and delete it from the database.
    pub fn remove(&self, name: &str, owner: &str) -> BinfmtResult<()> {
        validate_name(name)?;
        let path = self.store.path_for(name);
        if !self.store.contains(name) {
            warn!("{} does not exist; nothing to do!", path.display());
            return Ok(());
        }

        let existing = self.store.load_quiet(name);
        if let Some(existing) = &existing
            && existing.owner != owner
        {
            return Err(BinfmtError::OwnershipConflict {
                current: owner_label(owner).to_string(),
                existing: existing.owner_label().to_string(),
            });
        }

        // Never delete a record the kernel still has.
        self.disable(Some(name)).map_err(|e| {
            warn!("{}", e);
            BinfmtError::DisableFailed(name.to_string())
        })?;

        if self.dry_run {
            self.report(&format!("remove {}\n", path.display()))?;
        } else {
            self.store.remove(name)?;
        }

        match existing {
            Some(existing) => self.refresh_peers(&existing),
            None => Ok(()),
        }
    }

    /// Import one packaged format description, or every file in the import
    /// directory when `name` is `None`.
    pub fn import(&self, name: Option<&str>) -> BinfmtResult<()> {
        let Some(name) = name else {
            let names = regular_files(&self.importdir).map_err(|e| {
                BinfmtError::io(format!("unable to open {}", self.importdir.display()), e)
            })?;
            return self.for_each(&names, |name| self.import_one(name));
        };

        self.import_one(name)
    }

    fn import_one(&self, name: &str) -> BinfmtResult<()> {
        let (id, path) = match name.rsplit_once('/') {
            Some((_, id)) => (id, PathBuf::from(name)),
            None => (name, self.importdir.join(name)),
        };
        validate_name(id)?;

        let fields = match read_import(&path) {
            Ok(fields) if !fields.is_empty() => fields,
            Ok(_) => return Err(BinfmtError::NothingToImport(id.to_string())),
            Err(e) => {
                warn!("unable to open {}: {}", path.display(), e);
                return Err(BinfmtError::NothingToImport(id.to_string()));
            }
        };

        if let Some(existing) = self.store.load_quiet(id)
            && existing.is_local()
        {
            warn!("preserving local changes to {}", id);
            return Ok(());
        }

        if !fields.contains_key("package") {
            return Err(BinfmtError::MissingPackage { path });
        }

        match fields.get("interpreter") {
            Some(interpreter) if is_executable(interpreter) => {}
            interpreter => warn!(
                "{}: no executable {} found, but continuing anyway as you request",
                path.display(),
                interpreter.map(String::as_str).unwrap_or("interpreter")
            ),
        }

        let record = FormatSpec::from_fields(&fields).build(id)?;
        self.install(record)
    }

    /// Register one format with the kernel, or every format the kernel does
    /// not already have when `name` is `None`.
    pub fn enable(&self, name: Option<&str>) -> BinfmtResult<()> {
        if let Some(name) = name {
            validate_name(name)?;
        }
        self.load_support()?;

        let Some(name) = name else {
            let records = self.store.load_all()?;
            let pending = records.iter().filter(|record| !self.kernel.is_enabled(&record.name));
            return self.for_each(pending, |record| self.register(record));
        };

        if self.kernel.is_enabled(name) {
            // Happens in chroots, which share binfmt_misc with the host.
            info!("{} already enabled in kernel", name);
            return Ok(());
        }

        let record =
            self.store.load(name)?.ok_or_else(|| BinfmtError::NotInstalled(name.to_string()))?;
        self.register(&record)
    }

    /// Remove one format from the kernel, or every enabled format when
    /// `name` is `None` (and then unmount binfmt_misc if possible).
    pub fn disable(&self, name: Option<&str>) -> BinfmtResult<()> {
        if let Some(name) = name {
            validate_name(name)?;
        }
        if !self.kernel.is_available() {
            return Ok(());
        }

        let Some(name) = name else {
            let records = self.store.load_all()?;
            let enabled = records.iter().filter(|record| self.kernel.is_enabled(&record.name));
            let result = self.for_each(enabled, |record| self.unregister(&record.name));
            self.unload_support();
            return result;
        };

        self.unregister(name)
    }

    /// Every record (or just `name`) with its kernel state.
    pub fn display(&self, name: Option<&str>) -> BinfmtResult<Vec<FormatStatus>> {
        let records = match name {
            Some(name) => {
                validate_name(name)?;
                vec![
                    self.store
                        .load(name)?
                        .ok_or_else(|| BinfmtError::NotInstalled(name.to_string()))?,
                ]
            }
            None => self.store.load_all()?,
        };

        Ok(records
            .into_iter()
            .map(|record| FormatStatus { enabled: self.kernel.is_enabled(&record.name), record })
            .collect())
    }

    /// Formats that would handle `path`, best first.
    pub fn find(
        &self,
        path: &Path,
        detectors: &impl DetectorRunner,
    ) -> BinfmtResult<Vec<FormatRecord>> {
        Resolver::from_store(&self.store)?.resolve(path, detectors)
    }

    /// Interpreter to hand the kernel for `record`.
    ///
    /// Formats with a detector, or sharing their rule with another format,
    /// go through the detector proxy so the choice is made at exec time.
    /// A shared rule with no detector is not given one here: the proxy tries
    /// detector-less formats last anyway.
    pub fn kernel_interpreter(&self, record: &FormatRecord) -> BinfmtResult<String> {
        if record.has_detector() || !self.rule_peers(record)?.is_empty() {
            Ok(self.run_detectors.clone())
        } else {
            Ok(record.interpreter.clone())
        }
    }

    /// Other formats the kernel could not tell apart from `record`.
    fn rule_peers(&self, record: &FormatRecord) -> BinfmtResult<Vec<FormatRecord>> {
        Ok(self
            .store
            .load_all()?
            .into_iter()
            .filter(|other| other.name != record.name && other.same_rule(record))
            .collect())
    }

    fn register(&self, record: &FormatRecord) -> BinfmtResult<()> {
        let registration = Registration::new(record, self.kernel_interpreter(record)?);

        if self.dry_run {
            return self.report(&format!(
                "enable {} with the following format string:\n {}",
                record.name,
                registration.to_line()
            ));
        }

        self.kernel.register(&registration)
    }

    fn unregister(&self, name: &str) -> BinfmtResult<()> {
        if !self.kernel.is_enabled(name) {
            // A package and binfmt-support being upgraded together can get
            // here; the format is already gone, which is what was asked.
            debug!(name, "Already disabled");
            return Ok(());
        }

        if self.dry_run {
            return self.report(&format!("disable {}\n", name));
        }

        self.kernel.unregister(name)
    }

    /// Re-register enabled formats sharing `record`'s rule whose kernel
    /// interpreter no longer matches what they should have, so the kernel
    /// follows `record` appearing or disappearing.
    fn refresh_peers(&self, record: &FormatRecord) -> BinfmtResult<()> {
        if self.dry_run {
            return Ok(());
        }

        let peers: Vec<FormatRecord> = self
            .rule_peers(record)?
            .into_iter()
            .filter(|peer| self.kernel.is_enabled(&peer.name))
            .collect();

        let mut stale = Vec::new();
        for peer in &peers {
            let wanted = self.kernel_interpreter(peer)?;
            if self.kernel.entry_interpreter(&peer.name).as_deref() != Some(wanted.as_str()) {
                stale.push(peer);
            }
        }

        self.for_each(stale, |peer| {
            info!(name = %peer.name, "Re-registering for rule shared with {}", record.name);
            self.kernel.unregister(&peer.name)?;
            self.register(peer)
        })
    }

    fn load_support(&self) -> BinfmtResult<()> {
        if self.dry_run {
            return self.report("load binfmt_misc\n");
        }
        self.kernel.ensure_loaded()
    }

    fn unload_support(&self) {
        if self.dry_run {
            let text = format!("unload binfmt_misc ({})\n", self.kernel.style());
            if let Err(e) = self.report(&text) {
                warn!("{}", e);
            }
            return;
        }
        if let Err(e) = self.kernel.ensure_unloaded() {
            debug!(error = %e, "Leaving binfmt_misc mounted");
        }
    }

    /// Write dry-run output.
    fn report(&self, text: &str) -> BinfmtResult<()> {
        let mut output = self.output.borrow_mut();
        output
            .write_all(text.as_bytes())
            .and_then(|_| output.flush())
            .map_err(|e| BinfmtError::io("unable to write dry-run output", e))
    }

    /// Apply `op` to every item, carrying on past ordinary failures.
    fn for_each<T>(
        &self,
        items: impl IntoIterator<Item = T>,
        op: impl Fn(T) -> BinfmtResult<()>,
    ) -> BinfmtResult<()> {
        let mut total = 0;
        let mut failed = 0;

        for item in items {
            total += 1;
            if let Err(e) = op(item) {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("{}", e);
                failed += 1;
            }
        }

        if failed > 0 { Err(BinfmtError::Incomplete { failed, total }) } else { Ok(()) }
    }
}

/// Sorted names of the regular files in `dir`.
fn regular_files(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().is_file()
            && let Ok(name) = entry.file_name().into_string()
        {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
