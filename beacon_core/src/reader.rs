//! Serial reader: owns the port and feeds raw chunks into a bounded queue.
//!
//! The loop never blocks on the queue. When the processor falls behind the
//! newest chunk is dropped and counted. Port errors close the port and retry
//! after a fixed backoff until the stop flag is raised.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uwb_protocol::RawChunk;

use crate::stats::StatsCounters;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A finite source has nothing more to give.
    #[error("end of stream")]
    EndOfStream,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Anything the reader can pull bytes from.
pub trait ByteSource: Send {
    /// Open (or reopen) the underlying device.
    fn open(&mut self) -> Result<(), ReaderError>;

    /// Read whatever is available. `Ok(0)` means nothing arrived within the
    /// source's timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReaderError>;

    fn close(&mut self);

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialPortConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Blocking read timeout (ms)
    pub timeout_ms: u64,
}

impl Default for SerialPortConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 921_600,
            timeout_ms: 50,
        }
    }
}

/// A real serial port.
pub struct SerialSource {
    config: SerialPortConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialSource {
    pub fn new(config: SerialPortConfig) -> Self {
        Self { config, port: None }
    }
}

impl ByteSource for SerialSource {
    fn open(&mut self) -> Result<(), ReaderError> {
        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .open()?;
        self.port = Some(port);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReaderError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port not open"))?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.config.port, self.config.baud_rate)
    }
}

/// Replays pre-recorded chunks, then reports end of stream.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    chunks: VecDeque<Vec<u8>>,
}

impl MemorySource {
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().collect(),
        }
    }
}

impl ByteSource for MemorySource {
    fn open(&mut self) -> Result<(), ReaderError> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReaderError> {
        let Some(mut chunk) = self.chunks.pop_front() else {
            return Err(ReaderError::EndOfStream);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.chunks.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn close(&mut self) {}

    fn describe(&self) -> String {
        format!("memory ({} chunks left)", self.chunks.len())
    }
}

// ---------------------------------------------------------------------------
// Reader loop
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Capacity of the chunk queue between reader and processor
    pub queue_capacity: usize,
    pub read_buffer_size: usize,
    /// Wait before reopening a failed port (s)
    pub retry_backoff_sec: f64,
    /// Granularity of stop-flag checks while waiting (ms)
    pub poll_interval_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            read_buffer_size: 4096,
            retry_backoff_sec: 1.0,
            poll_interval_ms: 50,
        }
    }
}

impl ReaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Sleep for `total`, waking early if `stop` is raised.
fn sleep_unless_stopped(total: Duration, step: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(step.min(deadline - now));
    }
}

/// Read until `stop` is raised, the source ends, or the receiving side of
/// `tx` goes away.
pub fn run_reader(
    mut source: Box<dyn ByteSource>,
    tx: Sender<RawChunk>,
    stop: Arc<AtomicBool>,
    config: ReaderConfig,
    counters: Arc<StatsCounters>,
) {
    let name = source.describe();
    let backoff = Duration::from_secs_f64(config.retry_backoff_sec.max(0.0));
    let step = config.poll_interval();
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];
    let mut is_open = false;

    while !stop.load(Ordering::Acquire) {
        if !is_open {
            match source.open() {
                Ok(()) => {
                    tracing::info!(source = %name, "byte source opened");
                    is_open = true;
                }
                Err(err) => {
                    tracing::warn!(source = %name, %err, "open failed, retrying");
                    sleep_unless_stopped(backoff, step, &stop);
                    continue;
                }
            }
        }

        match source.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => match tx.try_send(RawChunk::now(buf[..n].to_vec())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    counters.record_chunk_dropped();
                    tracing::warn!(
                        dropped = counters.chunks_dropped(),
                        "chunk queue full, newest chunk dropped"
                    );
                }
                Err(TrySendError::Disconnected(_)) => break,
            },
            Err(ReaderError::EndOfStream) => {
                tracing::info!(source = %name, "byte source exhausted");
                break;
            }
            Err(err) => {
                tracing::warn!(source = %name, %err, "read failed, reopening");
                source.close();
                is_open = false;
                sleep_unless_stopped(backoff, step, &stop);
            }
        }
    }

    source.close();
    tracing::debug!(source = %name, "reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    /// Fails to open `failures` times, then serves one chunk per read.
    struct FlakySource {
        failures: usize,
        opens: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl ByteSource for FlakySource {
        fn open(&mut self) -> Result<(), ReaderError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.failures > 0 {
                self.failures -= 1;
                return Err(io::Error::new(io::ErrorKind::NotFound, "no device").into());
            }
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReaderError> {
            buf[0] = 0x55;
            thread::sleep(Duration::from_millis(1));
            Ok(1)
        }

        fn close(&mut self) {}

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    /// Opens cleanly, fails its first read, then serves `[7]` per read.
    struct DroppingSource {
        read_failures: usize,
        opens: Arc<std::sync::atomic::AtomicUsize>,
        closes: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl ByteSource for DroppingSource {
        fn open(&mut self) -> Result<(), ReaderError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReaderError> {
            thread::sleep(Duration::from_millis(1));
            if self.read_failures > 0 {
                self.read_failures -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged").into());
            }
            buf[0] = 7;
            Ok(1)
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn describe(&self) -> String {
            "dropping".into()
        }
    }

    fn fast_config(capacity: usize) -> ReaderConfig {
        ReaderConfig {
            queue_capacity: capacity,
            read_buffer_size: 8,
            retry_backoff_sec: 0.01,
            poll_interval_ms: 1,
        }
    }

    #[test]
    fn memory_source_splits_large_chunks() {
        let mut src = MemorySource::new(vec![vec![1, 2, 3, 4, 5]]);
        let mut buf = [0u8; 3];
        assert_eq!(src.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(src.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert!(matches!(src.read(&mut buf), Err(ReaderError::EndOfStream)));
    }

    #[test]
    fn delivers_chunks_then_stops_at_end_of_stream() {
        let (tx, rx) = bounded(10);
        let counters = Arc::new(StatsCounters::new());
        let source = Box::new(MemorySource::new(vec![b"abc".to_vec(), b"de".to_vec()]));
        run_reader(source, tx, Arc::new(AtomicBool::new(false)), fast_config(10), counters);

        let got: Vec<Vec<u8>> = rx.try_iter().map(|c| c.bytes).collect();
        assert_eq!(got, vec![b"abc".to_vec(), b"de".to_vec()]);
    }

    #[test]
    fn full_queue_drops_newest() {
        let (tx, rx) = bounded(2);
        let counters = Arc::new(StatsCounters::new());
        let chunks = (0u8..5).map(|i| vec![i]);
        run_reader(
            Box::new(MemorySource::new(chunks)),
            tx,
            Arc::new(AtomicBool::new(false)),
            fast_config(2),
            Arc::clone(&counters),
        );

        let got: Vec<u8> = rx.try_iter().map(|c| c.bytes[0]).collect();
        assert_eq!(got, vec![0, 1]);
        assert_eq!(counters.chunks_dropped(), 3);
    }

    #[test]
    fn retries_open_until_it_succeeds() {
        let (tx, rx) = bounded(4);
        let stop = Arc::new(AtomicBool::new(false));
        let opens = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let source = Box::new(FlakySource {
            failures: 2,
            opens: Arc::clone(&opens),
        });

        let stop_reader = Arc::clone(&stop);
        let counters = Arc::new(StatsCounters::new());
        let handle = thread::spawn(move || {
            run_reader(source, tx, stop_reader, fast_config(4), counters)
        });

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.bytes, vec![0x55]);
        stop.store(true, Ordering::Release);
        handle.join().unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn read_error_closes_and_reopens() {
        let (tx, rx) = bounded(4);
        let stop = Arc::new(AtomicBool::new(false));
        let opens = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let source = Box::new(DroppingSource {
            read_failures: 1,
            opens: Arc::clone(&opens),
            closes: Arc::clone(&closes),
        });

        let stop_reader = Arc::clone(&stop);
        let counters = Arc::new(StatsCounters::new());
        let handle = thread::spawn(move || {
            run_reader(source, tx, stop_reader, fast_config(4), counters)
        });

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.bytes, vec![7]);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        stop.store(true, Ordering::Release);
        handle.join().unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }
}
