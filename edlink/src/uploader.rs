//! EverDrive ROM upload engine.
//!
//! Drives the full cart conversation over a [`Link`]:
//!
//! 1. probe — send the test command once and require a response;
//! 2. upload — announce the declared (padded) length with a write-ROM
//!    frame, then stream the payload in fixed-size chunks;
//! 3. wait for liveness — re-probe until the cart answers again;
//! 4. boot — fire the one-shot PIF boot command.
//!
//! Commands and responses are paired only by temporal ordering (send,
//! wait, poll); the uploader never has more than one command in flight.

use crate::error::{Error, Result};
use crate::image::PreparedRom;
use crate::link::Link;
use crate::port::Port;
use crate::protocol::CommandFrame;
use log::{debug, info, trace, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Payload bytes per write; equals the cart's receive buffer size.
pub const CHUNK_SIZE: usize = 32768;

/// Delay between sending a command and polling for its response.
const COMMAND_DELAY: Duration = Duration::from_millis(100);

/// Delay between liveness retries.
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Settle time between the liveness confirmation and the boot command.
pub const BOOT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Diagnostics from the post-transfer liveness loop.
#[derive(Debug, Clone)]
pub struct LivenessReport {
    /// The cart's response, decoded as ASCII text.
    pub response: String,
    /// Number of unanswered probes before the response arrived.
    pub retries: u32,
    /// Wall-clock time spent waiting.
    pub elapsed: Duration,
}

/// Summary of a completed upload sequence.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Response to the pre-transfer probe.
    pub probe_response: String,
    /// Post-transfer liveness diagnostics.
    pub liveness: LivenessReport,
    /// Total payload bytes written (excludes command frames).
    pub payload_bytes: usize,
}

/// ROM uploader over a duplex link.
///
/// Generic over the port type `P`, which must implement the `Port`
/// trait, so the engine runs unchanged against mock ports in tests.
pub struct Uploader<P: Port> {
    link: Link<P>,
    payload_bytes: usize,
}

impl<P: Port> Uploader<P> {
    /// Create an uploader over an existing link.
    pub fn new(link: Link<P>) -> Self {
        Self {
            link,
            payload_bytes: 0,
        }
    }

    /// Open a link over `port` and wrap it.
    pub fn open(port: P) -> Result<Self> {
        Ok(Self::new(Link::open(port)?))
    }

    /// Total payload bytes written so far (command frames excluded).
    pub fn payload_bytes(&self) -> usize {
        self.payload_bytes
    }

    /// Consume the uploader and return the underlying link.
    pub fn into_link(self) -> Link<P> {
        self.link
    }

    fn send_frame(&mut self, frame: &CommandFrame) -> Result<()> {
        debug!("Sending command {}", frame.tag());
        self.link.write(&frame.build())
    }

    /// Pre-transfer handshake: one test command, one fixed wait, one poll.
    ///
    /// Returns the cart's response decoded as ASCII. A single missed
    /// poll means the cart is not there; that is the distinct
    /// `NoResponse` early exit, not a retry path.
    pub fn probe(&mut self) -> Result<String> {
        self.send_frame(&CommandFrame::test())?;
        thread::sleep(COMMAND_DELAY);

        match self.link.poll() {
            Some(data) => {
                let response = String::from_utf8_lossy(&data).to_string();
                info!("Cart responded: {response}");
                Ok(response)
            }
            None => {
                warn!("No response to test command");
                Err(Error::NoResponse)
            }
        }
    }

    /// Stream a prepared ROM to the cart.
    ///
    /// Sends the write-ROM frame announcing the declared length, then
    /// the payload in chunks of at most [`CHUNK_SIZE`] bytes. The chunk
    /// sizes sum to exactly the declared length; a write failure aborts
    /// the upload with no retry and no partial resume.
    ///
    /// `progress` receives cumulative `(bytes_done, declared)` after
    /// every chunk.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn upload<F>(&mut self, rom: &PreparedRom, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let declared = rom.declared_len() as usize;
        info!("Sending write command, declared length {declared}");
        self.send_frame(&CommandFrame::write_rom(rom.declared_len() as i32))?;

        let mut bytes_done = 0usize;
        let mut bytes_left = declared;

        loop {
            let chunk = CHUNK_SIZE.min(bytes_left);
            if chunk == 0 {
                break;
            }

            self.link.write(&rom.data()[bytes_done..bytes_done + chunk])?;
            self.payload_bytes += chunk;

            bytes_done += chunk;
            bytes_left -= chunk;
            debug_assert_eq!(bytes_done + bytes_left, declared);

            let percent = 100.0 * bytes_done as f64 / declared as f64;
            debug!("sent {bytes_done} of {declared} = {percent:.2}%, {bytes_left} remain");
            progress(bytes_done, declared);
        }

        info!("Upload complete: {bytes_done} bytes");
        Ok(())
    }

    /// Post-transfer liveness loop: re-probe until the cart answers.
    ///
    /// The cart is busy moving the image into place, and how long that
    /// takes is unbounded, so this loop has no internal attempt limit.
    /// It terminates on a response or on external cancellation through
    /// the crate's interrupt checker (see [`crate::set_interrupt_checker`]).
    pub fn wait_alive(&mut self) -> Result<LivenessReport> {
        let start = Instant::now();
        let mut retries = 0u32;

        loop {
            self.send_frame(&CommandFrame::test())?;
            thread::sleep(COMMAND_DELAY);

            if let Some(data) = self.link.poll() {
                let response = String::from_utf8_lossy(&data).to_string();
                let elapsed = start.elapsed();
                info!(
                    "Cart alive after {:.2}s ({retries} retries): {response}",
                    elapsed.as_secs_f64()
                );
                return Ok(LivenessReport {
                    response,
                    retries,
                    elapsed,
                });
            }

            if crate::is_interrupt_requested() {
                warn!("Liveness wait interrupted after {retries} retries");
                return Err(Error::Interrupted);
            }

            retries += 1;
            trace!("no response yet (retry {retries})");
            thread::sleep(RETRY_DELAY);
        }
    }

    /// Send the one-shot PIF boot command. No response is awaited.
    pub fn boot(&mut self) -> Result<()> {
        info!("Sending boot command");
        self.send_frame(&CommandFrame::pif_boot())
    }

    /// Run the full sequence: probe, upload, wait for liveness, boot.
    ///
    /// Aborts at the first fatal condition; the error identifies the
    /// failing phase. `boot` can be disabled to leave the cart in the
    /// menu after upload.
    pub fn run<F>(&mut self, rom: &PreparedRom, boot: bool, progress: F) -> Result<UploadOutcome>
    where
        F: FnMut(usize, usize),
    {
        let probe_response = self.probe()?;
        self.upload(rom, progress)?;
        let liveness = self.wait_alive()?;

        if boot {
            thread::sleep(BOOT_SETTLE_DELAY);
            self.boot()?;
        }

        Ok(UploadOutcome {
            probe_response,
            liveness,
            payload_bytes: self.payload_bytes,
        })
    }
}
