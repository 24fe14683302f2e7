//! The kernel's binfmt_misc interface.

pub mod binfmt_misc;
pub mod command;
pub mod registration;
pub mod style;

pub use binfmt_misc::ProcBinfmtMisc;
pub use command::{CommandRunner, SystemCommandRunner, is_executable};
pub use registration::Registration;
pub use style::{InterfaceStyle, detect_style};

use crate::error::BinfmtResult;

/// Live kernel state. Nothing is cached; every call probes the system.
pub trait BinfmtKernel {
    fn style(&self) -> InterfaceStyle;

    /// Is the binfmt_misc directory there at all?
    fn is_available(&self) -> bool;

    /// Make sure the `register` control file exists, loading the module and
    /// mounting the filesystem as needed.
    fn ensure_loaded(&self) -> BinfmtResult<()>;

    /// Unmount the filesystem if this kernel uses one. The module itself is
    /// left loaded.
    fn ensure_unloaded(&self) -> BinfmtResult<()>;

    fn is_enabled(&self, name: &str) -> bool;

    /// Interpreter the kernel has on file for an enabled entry.
    fn entry_interpreter(&self, name: &str) -> Option<String>;

    fn register(&self, registration: &Registration) -> BinfmtResult<()>;

    /// Remove an entry, failing if the kernel keeps it.
    fn unregister(&self, name: &str) -> BinfmtResult<()>;
}
