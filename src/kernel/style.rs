use std::fmt;
use std::path::Path;

use tracing::warn;

/// Which of the two binfmt_misc interfaces the running kernel offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceStyle {
    /// Control files appear directly under /proc once the module is loaded.
    Procfs,
    /// A separate `binfmt_misc` filesystem has to be mounted.
    Filesystem,
}

impl fmt::Display for InterfaceStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceStyle::Procfs => write!(f, "procfs"),
            InterfaceStyle::Filesystem => write!(f, "filesystem"),
        }
    }
}

/// Probe the kernel's filesystem-type list. A missing list is treated as
/// the legacy interface.
pub fn detect_style(filesystems: &Path) -> InterfaceStyle {
    match std::fs::read_to_string(filesystems) {
        Ok(contents) if lists_binfmt_misc(&contents) => InterfaceStyle::Filesystem,
        Ok(_) => InterfaceStyle::Procfs,
        Err(e) => {
            warn!("unable to open {}: {}", filesystems.display(), e);
            InterfaceStyle::Procfs
        }
    }
}

/// Does any line end in whitespace followed by `binfmt_misc`?
pub fn lists_binfmt_misc(contents: &str) -> bool {
    const FS_NAME: &str = "binfmt_misc";

    contents.lines().any(|line| {
        line.strip_suffix(FS_NAME)
            .and_then(|rest| rest.chars().last())
            .is_some_and(char::is_whitespace)
    })
}
