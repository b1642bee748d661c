//! EverDrive USB command protocol.

pub mod frame;

// Re-export common types
pub use frame::{Command, CommandFrame, FRAME_LEN, ROM_TARGET_ADDRESS, pad_length};
