//! Per-connection framing engine.
//!
//! A [`Connection`] owns one accepted stream for its whole life and runs the
//! frame loop:
//!
//! ```text
//! AwaitingHeader ──8 bytes──► ReadingBody ──length bytes──► Dispatching
//!       ▲                                                        │
//!       └──────────────────── processor returned ────────────────┘
//! ```
//!
//! Any state can fall through to `Closed`, which always shuts the stream down.
//! Every blocking read or write gets a fresh deadline of `now + idle_timeout`
//! and also races the shutdown token, so cancellation is observed at the
//! current I/O boundary rather than after the idle budget.

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use common::{protocol, Frame, FrameError, FrameHeader, Signature, HEADER_LEN};
use futures::FutureExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};

use super::processor::Processor;

/// Bound on the best-effort stream shutdown once the loop has exited.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Any bidirectional byte stream a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

// ---------------------------------------------------------------------------
// Termination taxonomy
// ---------------------------------------------------------------------------

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// EOF at a frame boundary.
    Graceful,
    /// No read or write completed within the idle budget.
    IdleTimeout,
    /// EOF while a frame body was being read.
    PrematureClose,
    /// I/O or TLS failure other than a clean EOF.
    Transport,
    /// Oversized length, truncated header or short write.
    Protocol,
    /// The server is shutting down.
    Shutdown,
    /// Anything else, including processor failures.
    Unknown,
}

/// A failure that terminates one connection and nothing else.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no activity for {0:?}")]
    IdleTimeout(Duration),

    #[error("peer closed mid-frame after {received} of {expected} payload bytes")]
    PrematureClose { expected: usize, received: usize },

    #[error("{0}")]
    Transport(#[source] io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("short write: {signature} frame of {length} bytes was not fully sent")]
    ShortWrite { signature: Signature, length: usize },

    #[error("server shutting down")]
    Shutdown,

    #[error("processor failed: {0:#}")]
    Processor(#[from] anyhow::Error),

    #[error("processor panicked: {0}")]
    Panic(String),
}

impl ConnectionError {
    /// Map onto the termination-cause taxonomy used for logging.
    pub fn reason(&self) -> CloseReason {
        match self {
            ConnectionError::IdleTimeout(_) => CloseReason::IdleTimeout,
            ConnectionError::PrematureClose { .. } => CloseReason::PrematureClose,
            ConnectionError::Transport(_) => CloseReason::Transport,
            ConnectionError::Frame(_) | ConnectionError::ShortWrite { .. } => {
                CloseReason::Protocol
            }
            ConnectionError::Shutdown => CloseReason::Shutdown,
            ConnectionError::Processor(_) | ConnectionError::Panic(_) => CloseReason::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One accepted connection and its framing state.
///
/// Processors receive `&mut Connection` and may reply with [`Connection::send`].
pub struct Connection {
    stream: Box<dyn Transport>,
    peer: String,
    idle_timeout: Duration,
    deadline: Instant,
    /// Set while a frame body is being read or processed. An EOF with this
    /// set is a premature close; without it, EOF before any header byte is
    /// a graceful close.
    in_progress: bool,
    shutdown: CancellationToken,
}

impl Connection {
    pub fn new(
        stream: impl Transport + 'static,
        peer: impl Into<String>,
        idle_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stream: Box::new(stream),
            peer: peer.into(),
            idle_timeout,
            deadline: Instant::now() + idle_timeout,
            in_progress: false,
            shutdown,
        }
    }

    /// `ip:port` of the remote end, or `"unknown"`.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Run the frame loop until the connection ends, then close the stream.
    ///
    /// The termination cause is logged, reported to the processor and returned.
    /// A panicking processor ends the connection as [`CloseReason::Unknown`].
    pub async fn run<P: Processor>(mut self, processor: Arc<P>) -> CloseReason {
        let result = match AssertUnwindSafe(self.serve(processor.as_ref()))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(ConnectionError::Panic(panic_message(panic.as_ref()))),
        };
        let reason = self.log_close(&result);
        self.close().await;
        processor.connection_closed(&self.peer, reason);
        reason
    }

    async fn serve<P: Processor>(&mut self, processor: &P) -> Result<(), ConnectionError> {
        loop {
            if self.shutdown.is_cancelled() {
                return Err(ConnectionError::Shutdown);
            }

            let Some(frame) = self.read_frame().await? else {
                return Ok(());
            };

            if tracing::enabled!(Level::DEBUG) {
                debug!(
                    peer = %self.peer,
                    signature = %frame.signature,
                    length = frame.payload.len(),
                    "frame received"
                );
            }

            processor
                .process(frame.signature, frame.payload, self)
                .await?;
            self.in_progress = false;
        }
    }

    /// Read the next frame, or `None` on a clean EOF at a frame boundary.
    async fn read_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        let mut raw = [0u8; HEADER_LEN];
        let received = self.read_full(&mut raw).await?;
        if received == 0 && !self.in_progress {
            return Ok(None);
        }
        if received < HEADER_LEN {
            return Err(self.eof_error(received, HEADER_LEN));
        }

        // Rejects oversized lengths before any body byte is read.
        let header = FrameHeader::decode(&raw)?;

        self.in_progress = true;
        let mut payload = BytesMut::zeroed(header.length);
        let received = self.read_full(&mut payload).await?;
        if received < header.length {
            return Err(self.eof_error(received, header.length));
        }

        Ok(Some(Frame {
            signature: header.signature,
            payload: payload.freeze(),
        }))
    }

    /// Fill `buf` unless the peer hits EOF first; returns the bytes read.
    ///
    /// The idle deadline is re-armed before each read, so a peer that keeps
    /// trickling bytes does not time out.
    async fn read_full(&mut self, buf: &mut [u8]) -> Result<usize, ConnectionError> {
        let mut filled = 0;
        while filled < buf.len() {
            let deadline = self.arm_deadline();
            let read = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(ConnectionError::Shutdown),
                read = time::timeout_at(deadline, self.stream.read(&mut buf[filled..])) => read,
            };
            let n = match read {
                Err(_) => return Err(ConnectionError::IdleTimeout(self.idle_timeout)),
                Ok(Ok(n)) => n,
                // rustls reports a TCP close without close_notify this way.
                Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => 0,
                Ok(Err(e)) => return Err(ConnectionError::Transport(e)),
            };
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Send one frame to the peer.
    ///
    /// The whole frame is written under a single fresh deadline. A write that
    /// cannot transfer every byte is a protocol error; a partial frame is
    /// never left for the peer to misparse.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`]; the caller should let it propagate so the
    /// connection is torn down with the matching cause.
    pub async fn send(
        &mut self,
        signature: Signature,
        payload: &[u8],
    ) -> Result<(), ConnectionError> {
        let buf: Bytes = protocol::encode(signature, payload)?;
        let deadline = self.arm_deadline();
        let stream = &mut self.stream;
        let write = async {
            stream.write_all(&buf).await?;
            stream.flush().await
        };
        let written = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(ConnectionError::Shutdown),
            written = time::timeout_at(deadline, write) => written,
        };
        match written {
            Err(_) => Err(ConnectionError::IdleTimeout(self.idle_timeout)),
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.kind() == io::ErrorKind::WriteZero => {
                Err(ConnectionError::ShortWrite {
                    signature,
                    length: payload.len(),
                })
            }
            Ok(Err(e)) => Err(ConnectionError::Transport(e)),
        }
    }

    /// Classify an EOF that left `received` of `expected` bytes.
    fn eof_error(&self, received: usize, expected: usize) -> ConnectionError {
        if self.in_progress {
            ConnectionError::PrematureClose { expected, received }
        } else {
            FrameError::TruncatedHeader { received, expected }.into()
        }
    }

    fn arm_deadline(&mut self) -> Instant {
        self.deadline = Instant::now() + self.idle_timeout;
        self.deadline
    }

    fn log_close(&self, result: &Result<(), ConnectionError>) -> CloseReason {
        let peer = self.peer.as_str();
        let e = match result {
            Ok(()) => {
                info!(peer, "connection closed");
                return CloseReason::Graceful;
            }
            Err(e) => e,
        };

        let reason = e.reason();
        match reason {
            CloseReason::IdleTimeout => warn!(peer, "connection timed out"),
            CloseReason::PrematureClose => warn!(peer, error = %e, "premature close"),
            CloseReason::Transport => warn!(peer, error = %e, "SSL/transport error"),
            CloseReason::Protocol => warn!(peer, error = %e, "protocol error"),
            CloseReason::Shutdown => {
                warn!(peer, in_progress = self.in_progress, "closing due to shutdown");
            }
            CloseReason::Unknown => {
                warn!(peer, error = %e, details = ?e, "unknown error, closing connection");
            }
            CloseReason::Graceful => {}
        }
        reason
    }

    /// Best-effort shutdown; errors here must not mask the close reason.
    async fn close(&mut self) {
        let _ = time::timeout(CLOSE_TIMEOUT, self.stream.shutdown()).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("idle_timeout", &self.idle_timeout)
            .field("in_progress", &self.in_progress)
            .finish_non_exhaustive()
    }
}
