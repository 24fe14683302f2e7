//! Userspace copy of the kernel's binfmt_misc matching rules.

use crate::error::{BinfmtError, BinfmtResult};
use crate::format::record::{FormatKind, FormatRecord, HEADER_BUFFER_LEN, magic_end};

/// A record's matching rule with its byte strings expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    pub kind: FormatKind,
    pub offset: usize,
    pub pattern: Vec<u8>,
    pub mask: Vec<u8>,
}

impl MatchRule {
    /// Expand a record's rule. Records whose mask does not line up with
    /// their magic, or whose magic ends past [`HEADER_BUFFER_LEN`], are rejected.
    pub fn compile(record: &FormatRecord) -> BinfmtResult<Self> {
        let pattern = record.pattern_bytes();
        let mask = match record.kind {
            FormatKind::Magic => record.mask_bytes(),
            FormatKind::Extension => Vec::new(),
        };

        if !mask.is_empty() && mask.len() != pattern.len() {
            return Err(BinfmtError::InvalidRecord {
                name: record.name.clone(),
                reason: "mask and magic have different lengths".to_string(),
            });
        }

        let out_of_range = || BinfmtError::InvalidRecord {
            name: record.name.clone(),
            reason: format!("offset {} out of range", record.offset),
        };
        if record.kind == FormatKind::Magic && magic_end(record.offset, pattern.len()).is_none()
        {
            return Err(out_of_range());
        }
        let offset = usize::try_from(record.offset).map_err(|_| out_of_range())?;

        Ok(Self { kind: record.kind, offset, pattern, mask })
    }

    /// Bytes of the file this rule needs to see; zero for extensions.
    pub fn probe_len(&self) -> usize {
        match self.kind {
            FormatKind::Magic => {
                self.offset.saturating_add(self.pattern.len()).min(HEADER_BUFFER_LEN)
            }
            FormatKind::Extension => 0,
        }
    }

    /// Does a file with this probe buffer and extension satisfy the rule?
    ///
    /// Bytes past the end of `probe` count as zero.
    pub fn matches(&self, probe: &[u8], extension: Option<&str>) -> bool {
        match self.kind {
            FormatKind::Magic => self.pattern.iter().enumerate().all(|(i, &expected)| {
                let mut byte =
                    self.offset.checked_add(i).and_then(|at| probe.get(at)).copied().unwrap_or(0);
                if let Some(&mask) = self.mask.get(i) {
                    byte &= mask;
                }
                byte == expected
            }),
            FormatKind::Extension => match extension {
                Some(ext) => !ext.is_empty() && ext.as_bytes() == self.pattern.as_slice(),
                None => false,
            },
        }
    }
}

/// Everything after the last `.` in `path`, if there is one.
pub fn filename_extension(path: &str) -> Option<&str> {
    path.rfind('.').map(|dot| &path[dot + 1..])
}
