//! The administrative database and the operations that keep it in step
//! with the kernel.

pub mod import;
pub mod manager;
pub mod store;

pub use import::{parse_import, read_import};
pub use manager::{FormatStatus, Registry};
pub use store::RecordStore;
