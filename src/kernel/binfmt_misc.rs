// binfmt_misc control files under the proc directory
//
// register   write one registration line to add a format
// status     write "1" to enable the whole mechanism
// <name>     one file per format; read for details, write "-1" to remove

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{CommandsConfig, PathsConfig};
use crate::error::{BinfmtError, BinfmtResult};
use crate::kernel::command::{CommandRunner, SystemCommandRunner, is_executable};
use crate::kernel::registration::Registration;
use crate::kernel::style::{InterfaceStyle, detect_style};
use crate::kernel::BinfmtKernel;

const MODULE_NAME: &str = "binfmt_misc";
const MOUNT_OPTIONS: &str = "nodev,noexec,nosuid";
#[cfg(target_os = "linux")]
const FUSE_SUPER_MAGIC: i64 = 0x6573_5546;

/// binfmt_misc as exposed by the running kernel.
#[derive(Debug, Clone)]
pub struct ProcBinfmtMisc<R = SystemCommandRunner> {
    procdir: PathBuf,
    filesystems: PathBuf,
    commands: CommandsConfig,
    runner: R,
}

impl ProcBinfmtMisc<SystemCommandRunner> {
    pub fn new(paths: &PathsConfig, commands: &CommandsConfig) -> Self {
        Self::with_runner(paths, commands, SystemCommandRunner)
    }
}

impl<R: CommandRunner> ProcBinfmtMisc<R> {
    pub fn with_runner(paths: &PathsConfig, commands: &CommandsConfig, runner: R) -> Self {
        Self {
            procdir: paths.procdir.clone(),
            filesystems: paths.filesystems.clone(),
            commands: commands.clone(),
            runner,
        }
    }

    pub fn procdir(&self) -> &Path {
        &self.procdir
    }

    pub fn register_path(&self) -> PathBuf {
        self.procdir.join("register")
    }

    pub fn status_path(&self) -> PathBuf {
        self.procdir.join("status")
    }

    pub fn entry_path(&self, name: &str) -> PathBuf {
        self.procdir.join(name)
    }

    fn procdir_arg(&self) -> String {
        self.procdir.to_string_lossy().into_owned()
    }

    /// Best effort: the support may be built in, or modprobe may be absent.
    fn load_module(&self) {
        let modprobe = &self.commands.modprobe;
        if !is_executable(modprobe) {
            debug!(modprobe, "No usable modprobe; assuming binfmt_misc is built in");
            return;
        }

        let args = vec!["-q".to_string(), MODULE_NAME.to_string()];
        match self.runner.run(modprobe, &args) {
            Ok(true) => debug!("Loaded the binfmt_misc module"),
            Ok(false) => info!("Couldn't load the binfmt_misc module"),
            Err(e) => info!(error = %e, "Couldn't run {}", modprobe),
        }
    }

    fn mount(&self) -> BinfmtResult<()> {
        let args = vec![
            "-t".to_string(),
            MODULE_NAME.to_string(),
            "-o".to_string(),
            MOUNT_OPTIONS.to_string(),
            MODULE_NAME.to_string(),
            self.procdir_arg(),
        ];

        match self.runner.run(&self.commands.mount, &args) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(BinfmtError::SupportUnavailable(format!(
                "Couldn't mount the binfmt_misc filesystem on {}.",
                self.procdir.display()
            ))),
        }
    }

    #[cfg(target_os = "linux")]
    fn is_fuse(&self) -> bool {
        nix::sys::statfs::statfs(&self.procdir)
            .map(|stat| stat.filesystem_type().0 as i64 == FUSE_SUPER_MAGIC)
            .unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    fn is_fuse(&self) -> bool {
        false
    }

    fn write_status(&self) {
        let path = self.status_path();
        if let Err(e) = write_control(&path, b"1\n") {
            warn!("unable to open {} for writing: {}", path.display(), e);
        }
    }
}

fn write_control(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(data)?;
    file.flush()
}

impl<R: CommandRunner> BinfmtKernel for ProcBinfmtMisc<R> {
    fn style(&self) -> InterfaceStyle {
        detect_style(&self.filesystems)
    }

    fn is_available(&self) -> bool {
        self.procdir.is_dir()
    }

    fn ensure_loaded(&self) -> BinfmtResult<()> {
        let register = self.register_path();

        if !register.is_file() {
            self.load_module();
        }

        if !self.procdir.is_dir() {
            return Err(BinfmtError::SupportUnavailable(format!(
                "binfmt_misc module seemed to be loaded, but no {} directory! Giving up.",
                self.procdir.display()
            )));
        }

        // Loading the module may have changed the answer.
        if self.style() == InterfaceStyle::Filesystem && !register.is_file() {
            self.mount()?;
        }

        if !register.is_file() {
            return Err(BinfmtError::SupportUnavailable(format!(
                "binfmt_misc initialised, but {} missing! Giving up.",
                register.display()
            )));
        }

        self.write_status();
        Ok(())
    }

    fn ensure_unloaded(&self) -> BinfmtResult<()> {
        if self.style() != InterfaceStyle::Filesystem {
            return Ok(());
        }
        if !self.register_path().is_file() {
            debug!(procdir = %self.procdir.display(), "binfmt_misc already unmounted");
            return Ok(());
        }

        // An emulated binfmt_misc (as in test rigs) is a FUSE mount.
        if self.is_fuse() {
            let args = vec!["-u".to_string(), self.procdir_arg()];
            if let Ok(true) = self.runner.run(&self.commands.fusermount, &args) {
                return Ok(());
            }
        }

        match self.runner.run(&self.commands.umount, &[self.procdir_arg()]) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(BinfmtError::SupportUnavailable(format!(
                "Couldn't unmount the binfmt_misc filesystem from {}.",
                self.procdir.display()
            ))),
        }
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.entry_path(name).exists()
    }

    fn entry_interpreter(&self, name: &str) -> Option<String> {
        let contents = fs::read_to_string(self.entry_path(name)).ok()?;
        contents
            .lines()
            .find_map(|line| line.strip_prefix("interpreter "))
            .map(|interpreter| interpreter.trim().to_string())
    }

    fn register(&self, registration: &Registration) -> BinfmtResult<()> {
        let path = self.register_path();
        debug!(line = %registration, "Registering binary format");
        write_control(&path, registration.to_line().as_bytes())
            .map_err(|source| BinfmtError::KernelWrite { path, source })
    }

    fn unregister(&self, name: &str) -> BinfmtResult<()> {
        let path = self.entry_path(name);
        write_control(&path, b"-1")
            .map_err(|source| BinfmtError::KernelWrite { path: path.clone(), source })?;

        if path.exists() {
            return Err(BinfmtError::RemovalIgnored { path });
        }
        Ok(())
    }
}
