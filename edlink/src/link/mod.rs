//! Duplex link over a serial port.
//!
//! A [`Link`] owns the write half of a port and runs one background
//! reader thread over a cloned handle. Every batch the reader receives
//! is appended to an [`RxQueue`]; the foreground side polls that queue.
//!
//! The EverDrive protocol carries no sequence or correlation
//! identifier, so commands and responses are paired purely by temporal
//! ordering: send, wait, poll. Callers must not pipeline commands and
//! expect to attribute responses.

pub mod queue;

pub use queue::RxQueue;

use crate::error::Result;
use crate::port::Port;
use log::{debug, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Read timeout for the background reader; bounds how long shutdown
/// waits on a quiet wire.
const READER_TIMEOUT: Duration = Duration::from_millis(50);

/// Duplex link: foreground writes, background receive queue.
pub struct Link<P: Port> {
    port: P,
    queue: RxQueue,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl<P: Port> Link<P> {
    /// Open a link over an already-opened port.
    ///
    /// Spawns the reader thread; received bytes start accumulating in
    /// the queue immediately.
    pub fn open(port: P) -> Result<Self> {
        let queue = RxQueue::new();
        let stop = Arc::new(AtomicBool::new(false));

        let mut reader_port = port.try_clone_reader()?;
        reader_port.set_timeout(READER_TIMEOUT)?;

        let reader_queue = queue.clone();
        let reader_stop = Arc::clone(&stop);
        let reader = thread::spawn(move || {
            read_loop(reader_port.as_mut(), &reader_queue, &reader_stop);
        });

        Ok(Self {
            port,
            queue,
            stop,
            reader: Some(reader),
        })
    }

    /// Write the full buffer to the port.
    ///
    /// A failure here is fatal to the operation in progress; the link
    /// performs no retries.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("link write: {} bytes", bytes.len());
        self.port.write_all_bytes(bytes)
    }

    /// Take everything received so far, or `None` if nothing arrived.
    pub fn poll(&self) -> Option<Vec<u8>> {
        self.queue.drain()
    }

    /// Poll repeatedly until data arrives or `timeout` elapses.
    ///
    /// `interval` is the delay between polls; both bounds are supplied
    /// by the caller.
    pub fn poll_within(&self, timeout: Duration, interval: Duration) -> Option<Vec<u8>> {
        let start = Instant::now();
        loop {
            if let Some(data) = self.poll() {
                return Some(data);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            thread::sleep(interval);
        }
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        self.port.name()
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                debug!("link reader thread panicked");
            }
        }
    }
}

impl<P: Port> Drop for Link<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reader loop: append every received batch to the queue.
///
/// Appending is the only queue operation this side performs.
fn read_loop(port: &mut dyn Port, queue: &RxQueue, stop: &AtomicBool) {
    let mut buf = [0u8; 512];

    while !stop.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                trace!("link reader: {n} bytes");
                queue.push(&buf[..n]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!("link reader stopping: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! In-memory port for exercising the link and uploader without
    //! hardware. Reads and writes are independent, and cloned reader
    //! handles share the same state, mirroring a real serial port.

    use super::*;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct MockState {
        /// Bytes the "device" has produced and the host may read.
        pub rx: VecDeque<u8>,
        /// Bytes the host has written.
        pub tx: Vec<u8>,
        /// When true, writes fail as if the port had gone away.
        pub fail_writes: bool,
    }

    #[derive(Clone)]
    pub struct MockPort {
        pub state: Arc<Mutex<MockState>>,
        timeout: Duration,
        baud_rate: u32,
    }

    impl MockPort {
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(MockState::default())),
                timeout: Duration::from_millis(50),
                baud_rate: 9600,
            }
        }

        /// Queue bytes for the host to receive.
        pub fn device_sends(&self, bytes: &[u8]) {
            self.state.lock().unwrap().rx.extend(bytes.iter().copied());
        }

        /// Everything the host has written so far.
        pub fn written(&self) -> Vec<u8> {
            self.state.lock().unwrap().tx.clone()
        }

        pub fn set_fail_writes(&self, fail: bool) {
            self.state.lock().unwrap().fail_writes = fail;
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            {
                let mut state = self.state.lock().unwrap();
                if !state.rx.is_empty() {
                    let n = buf.len().min(state.rx.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = state.rx.pop_front().unwrap();
                    }
                    return Ok(n);
                }
            }
            // Block like a real port read would before timing out.
            thread::sleep(self.timeout.min(Duration::from_millis(5)));
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"))
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "port closed",
                ));
            }
            state.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
            self.baud_rate = baud_rate;
            Ok(())
        }

        fn baud_rate(&self) -> u32 {
            self.baud_rate
        }

        fn clear_buffers(&mut self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.rx.clear();
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn try_clone_reader(&self) -> Result<Box<dyn Port>> {
            Ok(Box::new(self.clone()))
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::MockPort;
    use super::*;

    #[test]
    fn test_write_reaches_port() {
        let port = MockPort::new();
        let handle = port.clone();
        let mut link = Link::open(port).unwrap();

        link.write(b"cmdt").unwrap();
        assert_eq!(handle.written(), b"cmdt");
    }

    #[test]
    fn test_poll_none_when_quiet() {
        let port = MockPort::new();
        let link = Link::open(port).unwrap();
        assert!(link.poll().is_none());
    }

    #[test]
    fn test_reader_feeds_queue() {
        let port = MockPort::new();
        let handle = port.clone();
        let link = Link::open(port).unwrap();

        handle.device_sends(b"cmdr");
        let data = link
            .poll_within(Duration::from_secs(2), Duration::from_millis(5))
            .expect("reader should deliver bytes");
        assert_eq!(data, b"cmdr");
    }

    #[test]
    fn test_poll_within_times_out() {
        let port = MockPort::new();
        let link = Link::open(port).unwrap();

        let start = Instant::now();
        let result = link.poll_within(Duration::from_millis(50), Duration::from_millis(5));
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_write_failure_is_fatal() {
        let port = MockPort::new();
        let handle = port.clone();
        let mut link = Link::open(port).unwrap();

        handle.set_fail_writes(true);
        assert!(link.write(b"cmdt").is_err());
    }

    #[test]
    fn test_drop_stops_reader() {
        let port = MockPort::new();
        let link = Link::open(port).unwrap();
        // Dropping must join the reader without hanging.
        drop(link);
    }
}
