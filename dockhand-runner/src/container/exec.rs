//! Running a script in an attached container
//!
//! The script is streamed to the container's stdin while its multiplexed
//! output is copied into the job trace. The first of cancellation, a stdin
//! failure or the end of the output stream ends the exec; the container is
//! then killed (a no-op for a container that already exited) and its exit
//! code decides the result.

use async_trait::async_trait;
use dockhand_client::types::AttachOptions;
use dockhand_client::{AttachedStreams, ByteStream, ContainerEngine, stdcopy};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cancel::with_cancel;
use crate::error::{ExecutorError, Result};
use crate::wait::KillWaiter;

/// Standard streams of one exec
pub struct ExecStreams {
    pub stdin: ByteStream,
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
}

/// Runs a script in a created container
#[async_trait]
pub trait Exec: Send + Sync {
    /// Attaches, starts the container and streams until it exits
    ///
    /// # Returns
    /// `Ok` for exit code 0, `ExecutorError::Build` for other exit codes,
    /// `ExecutorError::Cancelled` when the token fired
    async fn exec(&self, cancel: &CancellationToken, id: &str, streams: ExecStreams) -> Result<()>;
}

enum Outcome {
    Cancelled,
    InputFailed(std::io::Error),
    OutputDone(std::io::Result<u64>),
}

/// Exec over the engine's attach endpoint
pub struct DefaultExec {
    engine: Arc<dyn ContainerEngine>,
    waiter: Arc<dyn KillWaiter>,
}

impl DefaultExec {
    pub fn new(engine: Arc<dyn ContainerEngine>, waiter: Arc<dyn KillWaiter>) -> Self {
        Self { engine, waiter }
    }
}

#[async_trait]
impl Exec for DefaultExec {
    async fn exec(&self, cancel: &CancellationToken, id: &str, streams: ExecStreams) -> Result<()> {
        debug!("Attaching to container {}", id);
        let options = AttachOptions {
            stdin: true,
            stdout: true,
            stderr: true,
            stream: true,
        };
        let AttachedStreams { mut output, mut input } =
            with_cancel(cancel, self.engine.container_attach(id, options)).await?;

        debug!("Starting container {}", id);
        with_cancel(cancel, self.engine.container_start(id)).await?;

        let ExecStreams {
            mut stdin,
            mut stdout,
            mut stderr,
        } = streams;

        let mut output_task = tokio::spawn(async move {
            stdcopy::demux_copy(&mut output, &mut stdout, &mut stderr).await
        });
        let mut input_task = tokio::spawn(async move {
            let copied = tokio::io::copy(&mut stdin, &mut input).await;
            let _ = input.shutdown().await;
            copied
        });

        let mut input_done = false;
        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Outcome::Cancelled,
                joined = &mut output_task => {
                    break Outcome::OutputDone(joined.unwrap_or_else(|e| Err(std::io::Error::other(e))));
                }
                joined = &mut input_task, if !input_done => {
                    input_done = true;
                    match joined {
                        Ok(Ok(bytes)) => debug!("Sent {} bytes of script to container {}", bytes, id),
                        Ok(Err(e)) => break Outcome::InputFailed(e),
                        Err(e) => break Outcome::InputFailed(std::io::Error::other(e)),
                    }
                }
            }
        };

        // The job token may be cancelled already; stopping the container
        // must still complete.
        let stopped = self.waiter.kill_wait(&CancellationToken::new(), id).await;
        if !input_done {
            input_task.abort();
        }

        match outcome {
            Outcome::Cancelled => {
                output_task.abort();
                if let Err(e) = stopped {
                    debug!("Container {} stopped after cancellation: {}", id, e);
                }
                Err(ExecutorError::Cancelled)
            }
            Outcome::InputFailed(e) => {
                output_task.abort();
                Err(ExecutorError::SystemFailure(format!(
                    "writing script to container {}: {}",
                    id, e
                )))
            }
            Outcome::OutputDone(copied) => {
                stopped?;
                match copied {
                    Ok(bytes) => {
                        debug!("Container {} produced {} bytes of output", id, bytes);
                        Ok(())
                    }
                    Err(e) => {
                        warn!("Reading output of container {}: {}", id, e);
                        Err(ExecutorError::SystemFailure(format!(
                            "reading output of container {}: {}",
                            id, e
                        )))
                    }
                }
            }
        }
    }
}
