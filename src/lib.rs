//! Management of the kernel's `binfmt_misc` registrations.
//!
//! Packages describe the binary formats they can run; this crate keeps an
//! administrative database of those descriptions, registers them with the
//! kernel, and resolves which interpreter should handle a given file when
//! more than one format claims it.

pub mod config;
pub mod error;
pub mod format;
pub mod kernel;
pub mod registry;
pub mod resolve;

pub use config::Config;
pub use error::{BinfmtError, BinfmtResult, Severity};
pub use format::{FormatKind, FormatRecord, FormatSpec};
pub use kernel::{BinfmtKernel, ProcBinfmtMisc, Registration};
pub use registry::{FormatStatus, RecordStore, Registry};
pub use resolve::{DetectorRunner, ProcessDetector, Resolver};
