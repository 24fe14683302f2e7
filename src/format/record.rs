//! Binary format records.
//!
//! A record is stored as one file per format in the administrative
//! directory, one field per line in a fixed order:
//!
//! ```text
//! package
//! type
//! offset
//! magic
//! mask
//! interpreter
//! detector      (optional)
//! credentials   (optional)
//! preserve      (optional)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{BinfmtError, BinfmtResult};
use crate::format::pattern::expand_hex;

/// Owner recorded for formats installed by hand rather than by a package.
pub const LOCAL_OWNER: &str = ":";

/// Names that collide with the kernel's own control files.
pub const RESERVED_NAMES: [&str; 4] = [".", "..", "register", "status"];

/// Size of the file header the kernel reads before matching
/// (`BINPRM_BUF_SIZE`). Magic past this point can never match.
pub const HEADER_BUFFER_LEN: usize = 256;

const FIELD_NAMES: [&str; 9] = [
    "package",
    "type",
    "offset",
    "magic",
    "mask",
    "interpreter",
    "detector",
    "credentials",
    "preserve",
];
const MANDATORY_FIELDS: usize = 6;

/// Matching strategy of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Magic,
    Extension,
}

impl FormatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Magic => "magic",
            FormatKind::Extension => "extension",
        }
    }

    /// One-character tag used in kernel registration lines.
    pub fn code(&self) -> char {
        match self {
            FormatKind::Magic => 'M',
            FormatKind::Extension => 'E',
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "magic" => Ok(FormatKind::Magic),
            "extension" => Ok(FormatKind::Extension),
            _ => Err(format!("unknown format type '{}'", s)),
        }
    }
}

/// One registered binary format handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRecord {
    pub name: String,
    pub owner: String,
    pub kind: FormatKind,
    pub offset: u64,
    /// Magic bytes (possibly `\xNN`-escaped) or, for extensions, the suffix.
    pub pattern: String,
    pub mask: String,
    pub interpreter: String,
    pub detector: String,
    pub credentials: bool,
    pub preserve: String,
}

impl FormatRecord {
    pub fn is_local(&self) -> bool {
        self.owner == LOCAL_OWNER
    }

    pub fn owner_label(&self) -> &str {
        owner_label(&self.owner)
    }

    pub fn has_detector(&self) -> bool {
        !self.detector.is_empty()
    }

    pub fn pattern_bytes(&self) -> Vec<u8> {
        match self.kind {
            FormatKind::Magic => expand_hex(self.pattern.as_bytes()),
            FormatKind::Extension => self.pattern.as_bytes().to_vec(),
        }
    }

    pub fn mask_bytes(&self) -> Vec<u8> {
        expand_hex(self.mask.as_bytes())
    }

    /// Two records share a rule when the kernel could not tell them apart.
    ///
    /// Owner, interpreter and detector do not take part.
    pub fn same_rule(&self, other: &FormatRecord) -> bool {
        self.kind == other.kind
            && self.offset == other.offset
            && self.pattern_bytes() == other.pattern_bytes()
            && self.mask_bytes() == other.mask_bytes()
    }

    /// Structural checks shared by freshly built and loaded records.
    pub fn validate(&self) -> BinfmtResult<()> {
        validate_name(&self.name)?;

        let invalid = |reason: &str| BinfmtError::InvalidRecord {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.kind == FormatKind::Extension {
            if !self.mask.is_empty() {
                return Err(invalid("can't use a mask with an extension"));
            }
            if self.offset != 0 {
                return Err(invalid("can't use an offset with an extension"));
            }
        }

        let pattern_len = self.pattern_bytes().len();
        let mask_len = self.mask_bytes().len();
        if mask_len != 0 && mask_len != pattern_len {
            return Err(invalid("mask and magic have different lengths"));
        }

        if self.kind == FormatKind::Magic && magic_end(self.offset, pattern_len).is_none() {
            return Err(invalid("offset and magic extend past the kernel's header buffer"));
        }

        let fields = [
            &self.owner,
            &self.pattern,
            &self.mask,
            &self.interpreter,
            &self.detector,
            &self.preserve,
        ];
        if fields.iter().any(|field| field.contains('\n')) {
            return Err(invalid("newlines prohibited in binfmt files"));
        }

        Ok(())
    }

    /// Parse the contents of a record file.
    pub fn parse(name: &str, path: &Path, contents: &str) -> BinfmtResult<Self> {
        let mut lines = contents.lines().map(str::trim_end);
        let mut fields: Vec<&str> = Vec::with_capacity(FIELD_NAMES.len());

        for (index, field) in FIELD_NAMES.iter().enumerate() {
            match lines.next() {
                Some(line) => fields.push(line),
                None if index < MANDATORY_FIELDS => {
                    return Err(BinfmtError::CorruptRecord {
                        path: path.to_path_buf(),
                        reason: format!("out of binfmt data reading {}", field),
                    });
                }
                None => fields.push(""),
            }
        }

        let corrupt = |reason: String| BinfmtError::CorruptRecord { path: path.to_path_buf(), reason };

        let kind = fields[1].parse::<FormatKind>().map_err(corrupt)?;
        let offset = parse_offset(fields[2]).map_err(corrupt)?;

        Ok(Self {
            name: name.to_string(),
            owner: fields[0].to_string(),
            kind,
            offset,
            pattern: fields[3].to_string(),
            mask: fields[4].to_string(),
            interpreter: fields[5].to_string(),
            detector: fields[6].to_string(),
            credentials: fields[7] == "yes",
            preserve: fields[8].to_string(),
        })
    }

    /// Read and parse a record file.
    pub fn load(name: &str, path: &Path) -> BinfmtResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BinfmtError::io(format!("unable to open {}", path.display()), e))?;
        Self::parse(name, path, &contents)
    }

    /// Field values in record file order.
    fn fields(&self) -> [String; 9] {
        [
            self.owner.clone(),
            self.kind.to_string(),
            self.offset.to_string(),
            self.pattern.clone(),
            self.mask.clone(),
            self.interpreter.clone(),
            self.detector.clone(),
            if self.credentials { "yes" } else { "no" }.to_string(),
            self.preserve.clone(),
        ]
    }

    /// Serialize into the record file format.
    pub fn to_file_contents(&self) -> String {
        self.fields().iter().map(|value| format!("{}\n", value)).collect()
    }

    /// Field listing used by dry-run installs.
    pub fn describe(&self) -> String {
        FIELD_NAMES
            .iter()
            .zip(self.fields())
            .map(|(field, value)| format!("{:>12} = {}\n", field, value))
            .collect()
    }
}

/// End of the header bytes a magic rule inspects, if it fits in the
/// kernel's buffer.
pub(crate) fn magic_end(offset: u64, pattern_len: usize) -> Option<usize> {
    usize::try_from(offset)
        .ok()
        .and_then(|offset| offset.checked_add(pattern_len))
        .filter(|end| *end <= HEADER_BUFFER_LEN)
}

pub fn owner_label(owner: &str) -> &str {
    if owner == LOCAL_OWNER { "<local>" } else { owner }
}

pub fn validate_name(name: &str) -> BinfmtResult<()> {
    if name.is_empty() || RESERVED_NAMES.contains(&name) || name.contains('/') {
        return Err(BinfmtError::ReservedName(name.to_string()));
    }
    Ok(())
}

fn parse_offset(raw: &str) -> Result<u64, String> {
    if raw.is_empty() {
        return Ok(0);
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("offset must be a whole number, not '{}'", raw));
    }
    raw.parse().map_err(|_| format!("offset '{}' out of range", raw))
}

/// A format description as given on the command line or in an import file,
/// before it has been checked and turned into a [`FormatRecord`].
#[derive(Debug, Clone, Default)]
pub struct FormatSpec {
    pub package: Option<String>,
    pub kind: Option<String>,
    pub offset: Option<String>,
    pub magic: Option<String>,
    pub mask: Option<String>,
    pub extension: Option<String>,
    pub interpreter: Option<String>,
    pub detector: Option<String>,
    pub credentials: Option<String>,
    pub preserve: Option<String>,
}

impl FormatSpec {
    /// Build a spec from lowercased import-file keys.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let get = |key: &str| fields.get(key).cloned();
        Self {
            package: get("package"),
            kind: get("type"),
            offset: get("offset"),
            magic: get("magic"),
            mask: get("mask"),
            extension: get("extension"),
            interpreter: get("interpreter"),
            detector: get("detector"),
            credentials: get("credentials"),
            preserve: get("preserve"),
        }
    }

    pub fn build(self, name: &str) -> BinfmtResult<FormatRecord> {
        let invalid = |reason: String| BinfmtError::InvalidRecord { name: name.to_string(), reason };

        let kind = match self.kind.as_deref() {
            Some(kind) => kind.parse::<FormatKind>().map_err(invalid)?,
            None => match (&self.magic, &self.extension) {
                (Some(_), Some(_)) => {
                    return Err(invalid("can't use both --magic and --extension".to_string()));
                }
                (Some(_), None) => FormatKind::Magic,
                (None, Some(_)) => FormatKind::Extension,
                (None, None) => {
                    return Err(invalid("either --magic or --extension is required".to_string()));
                }
            },
        };

        let pattern = match kind {
            FormatKind::Magic => self.magic,
            FormatKind::Extension => {
                if self.mask.is_some() {
                    return Err(invalid("can't use --mask with --extension".to_string()));
                }
                if self.offset.is_some() {
                    return Err(invalid("can't use --offset with --extension".to_string()));
                }
                self.extension
            }
        }
        .ok_or_else(|| invalid(format!("no {} given", kind)))?;

        let offset = parse_offset(self.offset.as_deref().unwrap_or("")).map_err(invalid)?;

        let record = FormatRecord {
            name: name.to_string(),
            owner: self.package.unwrap_or_else(|| LOCAL_OWNER.to_string()),
            kind,
            offset,
            pattern,
            mask: self.mask.unwrap_or_default(),
            interpreter: self.interpreter.unwrap_or_default(),
            detector: self.detector.unwrap_or_default(),
            credentials: self.credentials.as_deref() == Some("yes"),
            preserve: self.preserve.unwrap_or_default(),
        };
        record.validate()?;
        Ok(record)
    }
}
