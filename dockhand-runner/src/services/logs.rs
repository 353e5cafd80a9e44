//! Service container output
//!
//! - `read_container_logs` collects a bounded snapshot of a container's logs
//! - `stream_service_logs` follows a service's output into the job trace,
//!   each line prefixed with the service's aliases

use dockhand_client::types::LogsOptions;
use dockhand_client::{ContainerEngine, stdcopy};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::trace::BuildLogger;

/// Bytes of container logs kept for a warning block
pub const SERVICE_LOG_LIMIT: usize = 64 * 1024;

/// Shared buffer that drops everything past its limit
#[derive(Clone)]
struct LimitedBuffer {
    buffer: Arc<Mutex<Vec<u8>>>,
    limit: usize,
}

impl LimitedBuffer {
    fn new(limit: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            limit,
        }
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }
}

impl AsyncWrite for LimitedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut buffer = self.buffer.lock().unwrap();
        let room = self.limit.saturating_sub(buffer.len());
        buffer.extend_from_slice(&buf[..room.min(buf.len())]);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Reads at most `limit` bytes of a container's stdout and stderr
///
/// An error reading the logs is returned in place of the logs.
pub async fn read_container_logs(engine: &dyn ContainerEngine, id: &str, limit: usize) -> String {
    let options = LogsOptions {
        stdout: true,
        stderr: true,
        timestamps: true,
        ..Default::default()
    };

    let mut source = match engine.container_logs(id, &options).await {
        Ok(source) => source,
        Err(e) => return e.to_string().trim().to_string(),
    };

    let buffer = LimitedBuffer::new(limit);
    let mut stdout = buffer.clone();
    let mut stderr = buffer.clone();
    if let Err(e) = stdcopy::demux_copy(&mut source, &mut stdout, &mut stderr).await {
        debug!("Reading logs of container {} failed: {}", id, e);
    }

    buffer.contents().trim().to_string()
}

/// Writes complete lines to the trace behind a service prefix
pub struct ServiceLogWriter {
    logger: BuildLogger,
    prefix: String,
    pending: Vec<u8>,
}

impl ServiceLogWriter {
    /// # Arguments
    /// * `name` - Shown as `[service:<name>]`, usually the joined aliases
    pub fn new(logger: BuildLogger, name: &str) -> Self {
        Self {
            logger,
            prefix: format!("[service:{}] ", name),
            pending: Vec::new(),
        }
    }

    fn emit(&self, line: &[u8]) {
        let mut out = Vec::with_capacity(self.prefix.len() + line.len() + 1);
        out.extend_from_slice(self.prefix.as_bytes());
        out.extend_from_slice(line);
        if !line.ends_with(b"\n") {
            out.push(b'\n');
        }
        self.logger.write_raw(&out);
    }

    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line);
        }
    }
}

impl AsyncWrite for ServiceLogWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        this.pending.extend_from_slice(buf);
        while let Some(pos) = this.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = this.pending.drain(..=pos).collect();
            this.emit(&line);
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.get_mut().flush_pending();
        Poll::Ready(Ok(()))
    }
}

/// Follows a service's logs into the trace until it stops or the job is cancelled
///
/// # Arguments
/// * `name` - Container name, for diagnostics
/// * `aliases` - Aliases shown in the line prefix
pub fn stream_service_logs(
    engine: Arc<dyn ContainerEngine>,
    logger: BuildLogger,
    cancel: CancellationToken,
    id: String,
    name: String,
    aliases: Vec<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            timestamps: true,
            follow: true,
            tail: None,
        };

        let mut source = match engine.container_logs(&id, &options).await {
            Ok(source) => source,
            Err(e) => {
                logger.warningln(&format!(
                    "failed to open log stream for container {}: {}",
                    name, e
                ));
                return;
            }
        };

        logger.debugln(&format!("streaming logs for container {}", name));
        let prefix = aliases.join("-");
        let mut stdout = ServiceLogWriter::new(logger.clone(), &prefix);
        let mut stderr = ServiceLogWriter::new(logger.clone(), &prefix);

        tokio::select! {
            _ = cancel.cancelled() => {}
            result = stdcopy::demux_copy(&mut source, &mut stdout, &mut stderr) => {
                if let Err(e) = result {
                    logger.warningln(&format!(
                        "error streaming logs for container {}: {}",
                        name, e
                    ));
                }
            }
        }

        let _ = stdout.shutdown().await;
        let _ = stderr.shutdown().await;
        logger.debugln(&format!("stopped streaming logs for container {}", name));
    })
}
