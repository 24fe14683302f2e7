// Shared fixtures for integration tests: temporary directories and an
// in-memory stand-in for the kernel's binfmt_misc interface.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;

use binfmt_support::config::PathsConfig;
use binfmt_support::error::{BinfmtError, BinfmtResult};
use binfmt_support::format::{FormatRecord, FormatSpec};
use binfmt_support::kernel::{BinfmtKernel, InterfaceStyle, Registration};
use binfmt_support::registry::Registry;
use tempfile::TempDir;

pub const RUN_DETECTORS: &str = "/usr/lib/binfmt-support/run-detectors";

/// Records registrations in memory. Entries listed in `sticky` ignore
/// removal, the way a kernel with a busy entry would.
#[derive(Debug, Default)]
pub struct FakeKernel {
    pub entries: RefCell<BTreeMap<String, Registration>>,
    pub sticky: RefCell<BTreeSet<String>>,
    pub loaded: Cell<bool>,
    pub unload_calls: Cell<usize>,
    pub unavailable: bool,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Registration> {
        self.entries.borrow().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    pub fn interpreter(&self, name: &str) -> Option<String> {
        self.entries.borrow().get(name).map(|entry| entry.interpreter.clone())
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Put an entry into the kernel behind the registry's back.
    pub fn insert_manual(&self, record: &FormatRecord) {
        let registration = Registration::new(record, record.interpreter.clone());
        self.entries.borrow_mut().insert(record.name.clone(), registration);
    }
}

impl BinfmtKernel for FakeKernel {
    fn style(&self) -> InterfaceStyle {
        InterfaceStyle::Filesystem
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }

    fn ensure_loaded(&self) -> BinfmtResult<()> {
        self.loaded.set(true);
        Ok(())
    }

    fn ensure_unloaded(&self) -> BinfmtResult<()> {
        self.unload_calls.set(self.unload_calls.get() + 1);
        self.loaded.set(false);
        Ok(())
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    fn entry_interpreter(&self, name: &str) -> Option<String> {
        self.interpreter(name)
    }

    fn register(&self, registration: &Registration) -> BinfmtResult<()> {
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&registration.name) {
            return Err(BinfmtError::KernelWrite {
                path: PathBuf::from("register"),
                source: io::Error::new(io::ErrorKind::AlreadyExists, "File exists"),
            });
        }
        entries.insert(registration.name.clone(), registration.clone());
        Ok(())
    }

    fn unregister(&self, name: &str) -> BinfmtResult<()> {
        if self.sticky.borrow().contains(name) {
            return Err(BinfmtError::RemovalIgnored { path: PathBuf::from(name) });
        }
        self.entries.borrow_mut().remove(name);
        Ok(())
    }
}

/// Collects whatever is written to it; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Administrative and import directories under one temporary root.
pub struct TestEnv {
    pub dir: TempDir,
    pub paths: PathsConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let paths = PathsConfig {
            admindir: dir.path().join("admin"),
            importdir: dir.path().join("import"),
            procdir: dir.path().join("binfmt_misc"),
            filesystems: dir.path().join("filesystems"),
            run_detectors: PathBuf::from(RUN_DETECTORS),
        };
        fs::create_dir(&paths.admindir).expect("create admindir");
        fs::create_dir(&paths.importdir).expect("create importdir");
        Self { dir, paths }
    }

    pub fn registry(&self) -> Registry<FakeKernel> {
        Registry::new(&self.paths, FakeKernel::new())
    }

    /// A dry-run registry whose report goes to the returned buffer.
    pub fn dry_registry(&self) -> (Registry<FakeKernel>, SharedOutput) {
        let output = SharedOutput::default();
        let registry = self.registry().with_dry_run(true).with_output(output.clone());
        (registry, output)
    }

    pub fn write_import(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.paths.importdir.join(name);
        fs::write(&path, contents).expect("write import file");
        path
    }

    pub fn write_target(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write target file");
        path
    }

    pub fn record_file(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.paths.admindir.join(name)).ok()
    }

    pub fn admin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.paths.admindir)
            .expect("read admindir")
            .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

pub fn magic_record(name: &str, owner: Option<&str>, magic: &str) -> FormatRecord {
    FormatSpec {
        package: owner.map(str::to_string),
        magic: Some(magic.to_string()),
        interpreter: Some(format!("/usr/bin/{}", name)),
        ..Default::default()
    }
    .build(name)
    .expect("valid record")
}

pub fn with_detector(mut record: FormatRecord, detector: &str) -> FormatRecord {
    record.detector = detector.to_string();
    record
}
