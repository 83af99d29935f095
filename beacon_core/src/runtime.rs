//! Threaded service: a reader thread and a processing thread around a
//! [`Pipeline`].
//!
//! ```text
//! ByteSource ──read──▶ [reader] ──RawChunk (bounded)──▶ [processor] ──▶ SnapshotStore
//!                                                            │
//!                                                            └──▶ results (bounded, lossy)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uwb_protocol::{unix_time_secs, RawChunk};

use crate::history::Snapshot;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::publish::PipelineHandle;
use crate::reader::{run_reader, ByteSource, ReaderConfig};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("threads still running after join timeout: {0:?}")]
    JoinTimeout(Vec<&'static str>),

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub pipeline: PipelineConfig,
    pub reader: ReaderConfig,
}

const RESULTS_CAPACITY: usize = 256;

/// Running reader + processor pair.
pub struct PipelineService {
    handle: PipelineHandle,
    results: Receiver<Snapshot>,
    stop: Arc<AtomicBool>,
    threads: Vec<(&'static str, JoinHandle<()>)>,
}

impl PipelineService {
    /// Start both threads. The source is opened by the reader thread.
    pub fn spawn(source: Box<dyn ByteSource>, config: ServiceConfig) -> Result<Self, RuntimeError> {
        let pipeline = Pipeline::new(config.pipeline);
        let handle = pipeline.handle();
        let counters = pipeline.shared_counters();
        let stop = Arc::new(AtomicBool::new(false));
        let (chunk_tx, chunk_rx) = bounded::<RawChunk>(config.reader.queue_capacity.max(1));
        let (result_tx, results) = bounded::<Snapshot>(RESULTS_CAPACITY);
        let poll = config.reader.poll_interval();

        let mut threads = Vec::with_capacity(2);

        let reader_stop = Arc::clone(&stop);
        let reader_config = config.reader;
        let reader = thread::Builder::new()
            .name("uwb-reader".into())
            .spawn(move || run_reader(source, chunk_tx, reader_stop, reader_config, counters))
            .map_err(|source| RuntimeError::Spawn {
                name: "reader",
                source,
            })?;
        threads.push(("reader", reader));

        let processor_stop = Arc::clone(&stop);
        let processor = thread::Builder::new()
            .name("uwb-processor".into())
            .spawn(move || run_processor(pipeline, chunk_rx, result_tx, processor_stop, poll));
        let processor = match processor {
            Ok(p) => p,
            Err(source) => {
                stop.store(true, Ordering::Release);
                return Err(RuntimeError::Spawn {
                    name: "processor",
                    source,
                });
            }
        };
        threads.push(("processor", processor));

        tracing::info!("pipeline service started");
        Ok(Self {
            handle,
            results,
            stop,
            threads,
        })
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stream of published snapshots. Snapshots are dropped when nobody
    /// drains it; the polled API is unaffected.
    pub fn results(&self) -> &Receiver<Snapshot> {
        &self.results
    }

    /// True once both threads have exited on their own.
    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(|(_, t)| t.is_finished())
    }

    /// Raise the stop flag and join every thread within `join_timeout`.
    pub fn stop(mut self, join_timeout: Duration) -> Result<(), RuntimeError> {
        self.stop.store(true, Ordering::Release);
        let deadline = Instant::now() + join_timeout;

        let mut unfinished = Vec::new();
        let mut panicked = None;
        for (name, thread) in self.threads.drain(..) {
            while !thread.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if !thread.is_finished() {
                tracing::warn!(thread = name, "thread did not stop in time");
                unfinished.push(name);
                continue;
            }
            if thread.join().is_err() {
                panicked = Some(name);
            }
        }

        if !unfinished.is_empty() {
            return Err(RuntimeError::JoinTimeout(unfinished));
        }
        if let Some(name) = panicked {
            return Err(RuntimeError::Panicked(name));
        }
        tracing::info!("pipeline service stopped");
        Ok(())
    }
}

impl Drop for PipelineService {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Drain chunks into the pipeline. The receive timeout keeps the eviction
/// sweep running while the link is quiet.
fn run_processor(
    mut pipeline: Pipeline,
    rx: Receiver<RawChunk>,
    results: Sender<Snapshot>,
    stop: Arc<AtomicBool>,
    poll: Duration,
) {
    while !stop.load(Ordering::Acquire) {
        match rx.recv_timeout(poll) {
            Ok(chunk) => {
                let out = pipeline.submit_chunk(chunk);
                for snapshot in out.results {
                    // Nobody listening or queue full: drop.
                    let _ = results.try_send(snapshot);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                pipeline.maintain(unix_time_secs());
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!(stats = ?pipeline.stats(), "processor stopped");
}
