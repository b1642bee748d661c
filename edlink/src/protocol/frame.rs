//! EverDrive USB command frames.
//!
//! Every command sent to the cart uses the same fixed 16-byte frame:
//!
//! ```text
//! +----------+----------+----------+----------+
//! |   Tag    | Address  |   Size   |   Arg    |
//! +----------+----------+----------+----------+
//! | 4 bytes  | 4 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+
//! |  ASCII   |  i32 BE  |  i32 BE  |  i32 BE  |
//! +----------+----------+----------+----------+
//! ```
//!
//! The tag is four ASCII characters (`cmdt`, `cmdW`, ...); the three
//! numeric fields are big-endian two's complement. A write-ROM frame is
//! followed, outside the frame itself, by exactly `size` payload bytes.

use crate::error::{Error, Result};
use byteorder::{BigEndian, WriteBytesExt};

/// Total length of a command frame in bytes.
pub const FRAME_LEN: usize = 16;

/// Cart-side address the ROM payload is written to.
pub const ROM_TARGET_ADDRESS: i32 = 0x1000_0000;

/// Known command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Test probe (host -> cart).
    Test,
    /// Test response (cart -> host only).
    TestReply,
    /// Write ROM data to cart memory.
    WriteRom,
    /// Boot the uploaded ROM through the PIF.
    PifBoot,
}

impl Command {
    /// The 4-byte ASCII tag for this command.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Test => "cmdt",
            Self::TestReply => "cmdr",
            Self::WriteRom => "cmdW",
            Self::PifBoot => "cmds",
        }
    }
}

/// Command frame builder.
///
/// Construction validates the tag; `build` is a pure function over the
/// validated fields and always yields exactly [`FRAME_LEN`] bytes.
#[derive(Debug, Clone)]
pub struct CommandFrame {
    tag: [u8; 4],
    address: i32,
    size: i32,
    arg: i32,
}

impl CommandFrame {
    /// Create a frame from a raw tag string.
    ///
    /// The tag must be exactly 4 bytes of ASCII; no printability check
    /// is applied. Anything else is rejected before a single byte is
    /// produced.
    pub fn new(tag: &str, address: i32, size: i32, arg: i32) -> Result<Self> {
        let bytes = tag.as_bytes();
        if bytes.len() != 4 {
            return Err(Error::InvalidTag(tag.to_string()));
        }

        let mut tag_bytes = [0u8; 4];
        tag_bytes.copy_from_slice(bytes);

        Ok(Self {
            tag: tag_bytes,
            address,
            size,
            arg,
        })
    }

    /// Create a frame for a known command.
    #[allow(clippy::unwrap_used)] // Known tags are 4 ASCII bytes by construction
    pub fn command(cmd: Command, address: i32, size: i32, arg: i32) -> Self {
        Self::new(cmd.tag(), address, size, arg).unwrap()
    }

    /// Create a test-probe frame (all numeric fields zero).
    pub fn test() -> Self {
        Self::command(Command::Test, 0, 0, 0)
    }

    /// Create a write-ROM frame announcing `declared_size` payload bytes.
    pub fn write_rom(declared_size: i32) -> Self {
        Self::command(Command::WriteRom, ROM_TARGET_ADDRESS, declared_size, 0)
    }

    /// Create a PIF-boot frame (all numeric fields zero).
    pub fn pif_boot() -> Self {
        Self::command(Command::PifBoot, 0, 0, 0)
    }

    /// Build the complete 16-byte frame.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_LEN);

        buf.extend_from_slice(&self.tag);
        buf.write_i32::<BigEndian>(self.address).unwrap();
        buf.write_i32::<BigEndian>(self.size).unwrap();
        buf.write_i32::<BigEndian>(self.arg).unwrap();

        debug_assert_eq!(buf.len(), FRAME_LEN);
        buf
    }

    /// The frame's tag as ASCII text.
    pub fn tag(&self) -> &str {
        // Validated as ASCII-length-4 at construction.
        std::str::from_utf8(&self.tag).unwrap_or("????")
    }
}

/// Round `size` up to the next power of two.
///
/// Matches the cart-side reference implementation bit for bit: the
/// returned value becomes the declared transfer length announced to the
/// device, so the two sides must agree exactly. Caller guarantees
/// `size >= 1`.
pub fn pad_length(size: u32) -> u32 {
    debug_assert!(size >= 1, "pad_length requires size >= 1");

    let mut size = size.wrapping_sub(1);
    size |= size >> 1;
    size |= size >> 2;
    size |= size >> 4;
    size |= size >> 8;
    size |= size >> 16;
    size.wrapping_add(1)
}
