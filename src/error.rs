use std::path::PathBuf;

use thiserror::Error;

pub type BinfmtResult<T> = Result<T, BinfmtError>;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Nothing sensible can continue; the command aborts.
    Fatal,
    /// The current operation failed; bulk callers move on to the next record.
    Failed,
}

#[derive(Error, Debug)]
pub enum BinfmtError {
    #[error("unable to open {}: {source}", path.display())]
    AdminDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to open {}: {source}", path.display())]
    Target {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sorry, update-binfmts currently only works on Linux")]
    UnsupportedOs,

    #[error("current package is {current}, but binary format already installed by {existing}")]
    OwnershipConflict { current: String, existing: String },

    #[error("{} corrupt: {reason}", path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("{name}: {reason}")]
    InvalidRecord { name: String, reason: String },

    #[error("binary format name '{0}' is reserved")]
    ReservedName(String),

    #[error("{0} not in database of installed binary formats")]
    NotInstalled(String),

    #[error("couldn't find information about '{0}' to import")]
    NothingToImport(String),

    #[error("{}: required 'package' line missing", path.display())]
    MissingPackage { path: PathBuf },

    #[error("unable to write {}: {source}", path.display())]
    KernelWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("removal of {} ignored by kernel", path.display())]
    RemovalIgnored { path: PathBuf },

    #[error("{0}")]
    SupportUnavailable(String),

    #[error("unable to disable binary format {0}")]
    DisableFailed(String),

    #[error("unable to enable binary format {0}")]
    EnableFailed(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{failed} of {total} binary formats failed")]
    Incomplete { failed: usize, total: usize },
}

impl BinfmtError {
    pub fn severity(&self) -> Severity {
        match self {
            BinfmtError::AdminDir { .. } | BinfmtError::Target { .. } | BinfmtError::UnsupportedOs => {
                Severity::Fatal
            }
            _ => Severity::Failed,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BinfmtError::Io { context: context.into(), source }
    }
}
