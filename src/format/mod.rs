pub mod matcher;
pub mod pattern;
pub mod record;

pub use matcher::{MatchRule, filename_extension};
pub use pattern::expand_hex;
pub use record::{
    FormatKind, FormatRecord, FormatSpec, HEADER_BUFFER_LEN, LOCAL_OWNER, RESERVED_NAMES,
    owner_label, validate_name,
};
