//! ROM image handling.

pub mod rom;

// Re-export common types
pub use rom::{ByteOrder, PreparedRom, RomImage, Z64_MAGIC};
