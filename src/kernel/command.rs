//! External programs the kernel binding shells out to.

use std::path::Path;
use std::process::Command;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use nix::unistd::{AccessFlags, access};
use tracing::debug;

#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait CommandRunner {
    /// Run `program` to completion; `Ok(true)` on a zero exit status.
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<bool>;
}

/// Runs programs as child processes, inheriting stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<bool> {
        debug!(program, ?args, "Running command");
        let status = Command::new(program).args(args).status()?;
        Ok(status.success())
    }
}

/// Can the current user execute `path`?
pub fn is_executable(path: impl AsRef<Path>) -> bool {
    access(path.as_ref(), AccessFlags::X_OK).is_ok()
}
