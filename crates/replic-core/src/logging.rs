//! Run log: terminal output plus a per-day log file that is attached to the
//! report email.
//!
//! Log lines reach the file through a bounded channel drained by one writer
//! thread. Producers only block when the channel is full. [`LogHandle::flush`]
//! is a barrier: it returns once every line enqueued before it is on disk.
//! [`LogSink::shutdown`] flushes, stops the writer and joins it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::JoinHandle;

use chrono::{Local, NaiveDate};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{ReplicError, Result};

const LOG_ENV: &str = "REPLIC_LOG";
const QUEUE_CAPACITY: usize = 1024;

enum Entry {
    Line(Vec<u8>),
    Flush(SyncSender<()>),
    Close,
}

/// `log/<project><YYYY-MM-DD>.log`
pub fn log_file_name(project: &str, date: NaiveDate) -> String {
    format!("{project}{}.log", date.format("%Y-%m-%d"))
}

// ---------------------------------------------------------------------------
// LogHandle / SinkWriter
// ---------------------------------------------------------------------------

/// Cheap handle to a running sink: where the file is and how to flush it.
#[derive(Clone)]
pub struct LogHandle {
    path: PathBuf,
    tx: SyncSender<Entry>,
}

impl LogHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until every line enqueued so far has been written.
    /// Returns immediately if the writer has already stopped.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if self.tx.send(Entry::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    pub fn writer(&self) -> SinkWriter {
        SinkWriter {
            tx: self.tx.clone(),
        }
    }
}

/// `io::Write` end of the channel; one `write` call is one queued entry.
#[derive(Clone)]
pub struct SinkWriter {
    tx: SyncSender<Entry>,
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx
            .send(Entry::Line(buf.to_vec()))
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "log writer stopped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ---------------------------------------------------------------------------
// LogSink
// ---------------------------------------------------------------------------

/// Owner of the writer thread.
pub struct LogSink {
    handle: LogHandle,
    worker: Option<JoinHandle<()>>,
}

impl LogSink {
    /// Start a writer appending to `dir/file_name`.
    pub fn create(dir: &Path, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(dir)
            .map_err(|e| ReplicError::Io(std::io::Error::other(e.to_string())))?;

        let (tx, rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        let worker = std::thread::Builder::new()
            .name("replic-log".to_string())
            .spawn(move || drain(rx, file))?;

        Ok(Self {
            handle: LogHandle {
                path: dir.join(file_name),
                tx,
            },
            worker: Some(worker),
        })
    }

    /// Start the sink for `project` under `dir` and install it, together
    /// with a terminal layer, as the global tracing subscriber.
    ///
    /// Filter: `REPLIC_LOG`, then `RUST_LOG`, then `info`. Fails when a
    /// global subscriber is already installed.
    pub fn init(dir: &Path, project: &str) -> Result<Self> {
        if project.trim().is_empty() {
            return Err(ReplicError::Precondition(
                "the project name has to be set in arguments".to_string(),
            ));
        }
        let sink = Self::create(dir, &log_file_name(project.trim(), Local::now().date_naive()))?;

        let filter = match std::env::var(LOG_ENV) {
            Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info")),
            Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };

        let terminal = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        let file = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(sink.handle.writer());

        // Without the subscriber nothing reaches the file attached to the
        // report, so a second install is an error.
        tracing_subscriber::registry()
            .with(filter)
            .with(terminal)
            .with(file)
            .try_init()
            .map_err(|e| ReplicError::Logging(format!("cannot install the log subscriber: {e}")))?;

        tracing::info!(log_file = %sink.handle.path.display(), "logging initialised");
        Ok(sink)
    }

    pub fn handle(&self) -> LogHandle {
        self.handle.clone()
    }

    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    /// Drain every pending line, stop the writer and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.handle.flush();
            let _ = self.handle.tx.send(Entry::Close);
            let _ = worker.join();
        }
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain(rx: Receiver<Entry>, mut file: impl Write) {
    for entry in rx {
        match entry {
            Entry::Line(bytes) => {
                if let Err(e) = file.write_all(&bytes) {
                    eprintln!("failed to write log line: {e}");
                }
            }
            Entry::Flush(ack) => {
                let _ = file.flush();
                let _ = ack.send(());
            }
            Entry::Close => break,
        }
    }
    let _ = file.flush();
}
