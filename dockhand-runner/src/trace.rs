//! Job trace
//!
//! The trace is the user-visible output of a job: an append-only byte
//! sink. `BuildLogger` writes coloured status lines to it and mirrors each
//! line into `tracing`.

use std::io::Write;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tracing::{debug, error, info, warn};

pub const ANSI_RESET: &str = "\x1b[0;m";
pub const ANSI_BOLD_GREEN: &str = "\x1b[32;1m";
pub const ANSI_YELLOW: &str = "\x1b[0;33m";
pub const ANSI_BOLD_RED: &str = "\x1b[31;1m";

/// Append-only sink for job output
pub trait JobTrace: Send + Sync {
    fn write(&self, data: &[u8]);
}

/// Trace kept in memory
#[derive(Default)]
pub struct BufferTrace {
    buffer: Mutex<Vec<u8>>,
}

impl BufferTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl JobTrace for BufferTrace {
    fn write(&self, data: &[u8]) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.extend_from_slice(data);
    }
}

/// Trace forwarded to the process's standard output
#[derive(Default)]
pub struct StdoutTrace;

impl JobTrace for StdoutTrace {
    fn write(&self, data: &[u8]) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(data);
        let _ = stdout.flush();
    }
}

/// `AsyncWrite` adapter over a trace
#[derive(Clone)]
pub struct TraceWriter {
    trace: Arc<dyn JobTrace>,
}

impl TraceWriter {
    pub fn new(trace: Arc<dyn JobTrace>) -> Self {
        Self { trace }
    }
}

impl AsyncWrite for TraceWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.trace.write(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Writes formatted status lines to the job trace
#[derive(Clone)]
pub struct BuildLogger {
    trace: Arc<dyn JobTrace>,
    debug: bool,
}

impl BuildLogger {
    pub fn new(trace: Arc<dyn JobTrace>) -> Self {
        Self { trace, debug: false }
    }

    /// Enables `debugln` output in the trace
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn trace(&self) -> Arc<dyn JobTrace> {
        self.trace.clone()
    }

    /// Raw writer for streamed container output
    pub fn writer(&self) -> TraceWriter {
        TraceWriter::new(self.trace.clone())
    }

    pub fn write_raw(&self, data: &[u8]) {
        self.trace.write(data);
    }

    fn line(&self, prefix: &str, message: &str) {
        self.trace
            .write(format!("{}{}{}\n", prefix, message, ANSI_RESET).as_bytes());
    }

    pub fn println(&self, message: &str) {
        debug!("{}", message);
        self.line("", message);
    }

    pub fn infoln(&self, message: &str) {
        info!("{}", message);
        self.line(ANSI_BOLD_GREEN, message);
    }

    pub fn warningln(&self, message: &str) {
        warn!("{}", message);
        self.line(ANSI_YELLOW, &format!("WARNING: {}", message));
    }

    pub fn errorln(&self, message: &str) {
        error!("{}", message);
        self.line(ANSI_BOLD_RED, &format!("ERROR: {}", message));
    }

    /// Only reaches the trace when job debug tracing is on
    pub fn debugln(&self, message: &str) {
        debug!("{}", message);
        if self.debug {
            self.line("", message);
        }
    }
}
