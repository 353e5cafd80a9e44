//! Multiplexed stream framing
//!
//! Attach and log streams of containers without a TTY interleave stdout
//! and stderr. Each frame is an 8 byte header followed by the payload:
//!
//! ```text
//! [stream id, 0, 0, 0, size (u32 big endian)] payload...
//! ```
//!
//! Stream ids are 0 (stdin), 1 (stdout), 2 (stderr) and 3 (system error,
//! reported by the engine when the stream itself failed).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const HEADER_LEN: usize = 8;
const READ_BUFFER_LEN: usize = 32 * 1024;

/// Stream a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
    SystemErr,
}

impl StreamKind {
    fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            3 => Some(StreamKind::SystemErr),
            _ => None,
        }
    }

    fn id(&self) -> u8 {
        match self {
            StreamKind::Stdin => 0,
            StreamKind::Stdout => 1,
            StreamKind::Stderr => 2,
            StreamKind::SystemErr => 3,
        }
    }
}

#[derive(Debug)]
enum State {
    /// Collecting header bytes
    Header { header: [u8; HEADER_LEN], have: usize },
    /// Forwarding payload bytes
    Payload { stream: StreamKind, remaining: usize },
}

/// Incremental frame decoder
///
/// Input may be split anywhere, including inside a header. Payload bytes
/// are released as soon as they arrive.
#[derive(Debug)]
pub struct Demuxer {
    state: State,
    system_error: Vec<u8>,
}

impl Default for Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer {
    pub fn new() -> Self {
        Self {
            state: State::Header {
                header: [0; HEADER_LEN],
                have: 0,
            },
            system_error: Vec::new(),
        }
    }

    /// Decodes a chunk of input
    ///
    /// # Returns
    /// Payload slices in arrival order, adjacent slices of the same stream
    /// merged
    pub fn feed(&mut self, mut input: &[u8]) -> std::io::Result<Vec<(StreamKind, Vec<u8>)>> {
        let mut out: Vec<(StreamKind, Vec<u8>)> = Vec::new();

        while !input.is_empty() {
            match &mut self.state {
                State::Header { header, have } => {
                    let take = (HEADER_LEN - *have).min(input.len());
                    header[*have..*have + take].copy_from_slice(&input[..take]);
                    *have += take;
                    input = &input[take..];

                    if *have == HEADER_LEN {
                        let stream = StreamKind::from_id(header[0]).ok_or_else(|| {
                            invalid_data(format!("unrecognized stream id: {}", header[0]))
                        })?;
                        let size =
                            u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
                        self.state = if size == 0 {
                            State::Header {
                                header: [0; HEADER_LEN],
                                have: 0,
                            }
                        } else {
                            State::Payload {
                                stream,
                                remaining: size,
                            }
                        };
                    }
                }
                State::Payload { stream, remaining } => {
                    let stream = *stream;
                    let take = (*remaining).min(input.len());
                    let chunk = &input[..take];
                    *remaining -= take;
                    input = &input[take..];

                    if stream == StreamKind::SystemErr {
                        self.system_error.extend_from_slice(chunk);
                    } else {
                        match out.last_mut() {
                            Some((last, data)) if *last == stream => data.extend_from_slice(chunk),
                            _ => out.push((stream, chunk.to_vec())),
                        }
                    }

                    if *remaining == 0 {
                        self.state = State::Header {
                            header: [0; HEADER_LEN],
                            have: 0,
                        };
                        if stream == StreamKind::SystemErr {
                            let message = String::from_utf8_lossy(&self.system_error).into_owned();
                            return Err(std::io::Error::other(format!(
                                "error from daemon in stream: {}",
                                message
                            )));
                        }
                    }
                }
            }
        }

        Ok(out)
    }

    /// Checks that the input ended on a frame boundary
    pub fn finish(&self) -> std::io::Result<()> {
        match &self.state {
            State::Header { have: 0, .. } => Ok(()),
            State::Header { have, .. } => Err(unexpected_eof(format!(
                "stream ended inside a frame header ({} of {} bytes)",
                have, HEADER_LEN
            ))),
            State::Payload { remaining, .. } => Err(unexpected_eof(format!(
                "stream ended with {} payload bytes missing",
                remaining
            ))),
        }
    }
}

fn invalid_data(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

fn unexpected_eof(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, message)
}

/// Encodes one frame
pub fn encode_frame(stream: StreamKind, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(stream.id());
    frame.extend_from_slice(&[0, 0, 0]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Copies a multiplexed stream into separate stdout and stderr writers
///
/// Runs until the reader reaches EOF. Stdin frames are ignored.
///
/// # Returns
/// Number of payload bytes written
pub async fn demux_copy<R, O, E>(reader: &mut R, stdout: &mut O, stderr: &mut E) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    let mut demuxer = Demuxer::new();
    let mut buf = vec![0u8; READ_BUFFER_LEN];
    let mut written = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        for (stream, data) in demuxer.feed(&buf[..n])? {
            match stream {
                StreamKind::Stdout => stdout.write_all(&data).await?,
                StreamKind::Stderr => stderr.write_all(&data).await?,
                _ => continue,
            }
            written += data.len() as u64;
        }
    }

    stdout.flush().await?;
    stderr.flush().await?;
    demuxer.finish()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut input = encode_frame(StreamKind::Stdout, b"hello ");
        input.extend(encode_frame(StreamKind::Stderr, b"oops\n"));
        input.extend(encode_frame(StreamKind::Stdout, b"world\n"));
        input
    }

    #[test]
    fn test_frame_header_layout() {
        let frame = encode_frame(StreamKind::Stderr, b"abc");
        assert_eq!(&frame[..8], &[2, 0, 0, 0, 0, 0, 0, 3]);
        assert_eq!(&frame[8..], b"abc");
    }

    #[test]
    fn test_split_at_every_byte() {
        let input = sample();
        let mut demuxer = Demuxer::new();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        for byte in &input {
            for (stream, data) in demuxer.feed(std::slice::from_ref(byte)).unwrap() {
                match stream {
                    StreamKind::Stdout => stdout.extend(data),
                    StreamKind::Stderr => stderr.extend(data),
                    _ => {}
                }
            }
        }

        assert!(demuxer.finish().is_ok());
        assert_eq!(stdout, b"hello world\n");
        assert_eq!(stderr, b"oops\n");
    }

    #[test]
    fn test_unknown_stream_id() {
        let mut demuxer = Demuxer::new();
        let err = demuxer.feed(&[7, 0, 0, 0, 0, 0, 0, 1, b'x']).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_system_error_frame() {
        let mut demuxer = Demuxer::new();
        let err = demuxer
            .feed(&encode_frame(StreamKind::SystemErr, b"container gone"))
            .unwrap_err();
        assert!(err.to_string().contains("container gone"));
    }

    #[test]
    fn test_truncated_stream() {
        let mut demuxer = Demuxer::new();
        let frame = encode_frame(StreamKind::Stdout, b"partial");
        demuxer.feed(&frame[..10]).unwrap();
        assert_eq!(
            demuxer.finish().unwrap_err().kind(),
            std::io::ErrorKind::UnexpectedEof
        );
    }

    #[tokio::test]
    async fn test_demux_copy() {
        let input = sample();
        let mut reader = &input[..];
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let written = demux_copy(&mut reader, &mut stdout, &mut stderr).await.unwrap();

        assert_eq!(written, 17);
        assert_eq!(stdout, b"hello world\n");
        assert_eq!(stderr, b"oops\n");
    }
}
