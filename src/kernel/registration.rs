use std::fmt;

use crate::format::{FormatKind, FormatRecord};

/// One line of the binfmt_misc registration protocol:
/// `:name:type:offset:magic:mask:interpreter:flags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub kind: FormatKind,
    pub offset: u64,
    pub magic: String,
    pub mask: String,
    pub interpreter: String,
    pub credentials: bool,
}

impl Registration {
    /// Register `record` with `interpreter`, which is either the record's
    /// own interpreter or the detector proxy.
    pub fn new(record: &FormatRecord, interpreter: impl Into<String>) -> Self {
        Self {
            name: record.name.clone(),
            kind: record.kind,
            offset: record.offset,
            magic: record.pattern.clone(),
            mask: record.mask.clone(),
            interpreter: interpreter.into(),
            credentials: record.credentials,
        }
    }

    pub fn flags(&self) -> &'static str {
        if self.credentials { "C" } else { "" }
    }

    /// The line as written to the `register` file, newline included.
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ":{}:{}:{}:{}:{}:{}:{}",
            self.name,
            self.kind.code(),
            self.offset,
            self.magic,
            self.mask,
            self.interpreter,
            self.flags()
        )
    }
}
