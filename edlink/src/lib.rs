//! # edlink
//!
//! A library for uploading ROM images to EverDrive-64 flash carts over
//! a USB-serial link.
//!
//! This crate provides the core functionality for talking to the cart's
//! USB interface, including:
//!
//! - The fixed 16-byte EverDrive command protocol
//! - ROM byte-order detection, correction, and power-of-two padding
//! - Chunked payload streaming with progress reporting
//! - Pre- and post-transfer liveness probing
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//!
//! ## Example
//!
//! ```rust,no_run
//! use edlink::{NativePort, RomImage, SerialConfig, Uploader};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rom = RomImage::from_file("game.z64")?.prepare()?;
//!
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 9600))?;
//!     let mut uploader = Uploader::open(port)?;
//!
//!     let outcome = uploader.run(&rom, true, |done, total| {
//!         println!("{done}/{total}");
//!     })?;
//!     println!("booted after {} retries", outcome.liveness.retries);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod image;
pub mod link;
pub mod port;
pub mod protocol;
pub mod uploader;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). The
/// post-transfer liveness loop has no internal attempt bound, so this is
/// its only exit besides a cart response.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER.get().is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

/// Serializes tests that read or toggle the global interrupt flag.
#[cfg(test)]
pub(crate) static TEST_INTERRUPT_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceKind, TransportKind},
    error::{Error, Result},
    image::{ByteOrder, PreparedRom, RomImage, Z64_MAGIC},
    link::{Link, RxQueue},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Command, CommandFrame, FRAME_LEN, ROM_TARGET_ADDRESS, pad_length},
    uploader::{BOOT_SETTLE_DELAY, CHUNK_SIZE, LivenessReport, UploadOutcome, Uploader},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        let _guard = TEST_INTERRUPT_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        test_set_interrupted(false);
        assert!(!is_interrupt_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        let _guard = TEST_INTERRUPT_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        test_set_interrupted(true);
        assert!(is_interrupt_requested());

        test_set_interrupted(false);
        assert!(!is_interrupt_requested());
    }
}
