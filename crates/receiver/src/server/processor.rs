//! The seam between the transport and whatever consumes decoded frames.

use std::future::Future;

use bytes::Bytes;
use common::Signature;
use tracing::debug;

use super::connection::{CloseReason, Connection, ConnectionError};

pub const PING: Signature = Signature::new(*b"PING");
pub const PONG: Signature = Signature::new(*b"PONG");

/// Consumes frames decoded by a [`Connection`].
///
/// `process` is awaited before the next header is read, so frames from one
/// connection are handled strictly in arrival order. Connections run
/// concurrently, so implementations must be safe to call from many tasks.
pub trait Processor: Send + Sync + 'static {
    /// Handle one frame. Replies go through `connection.send`.
    ///
    /// An error tears down this connection only. Errors from
    /// [`Connection::send`] keep their own cause; anything else wrapped in
    /// [`ConnectionError::Processor`] is logged as unknown.
    fn process(
        &self,
        signature: Signature,
        payload: Bytes,
        connection: &mut Connection,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Called once after the connection has been closed.
    fn connection_closed(&self, _peer: &str, _reason: CloseReason) {}
}

/// Processor used by the binary: logs frames and answers `PING` with `PONG`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProcessor;

impl Processor for LoggingProcessor {
    async fn process(
        &self,
        signature: Signature,
        payload: Bytes,
        connection: &mut Connection,
    ) -> Result<(), ConnectionError> {
        if signature == PING {
            return connection.send(PONG, &[]).await;
        }
        debug!(
            peer = connection.peer(),
            %signature,
            length = payload.len(),
            "frame discarded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{protocol, FrameHeader, HEADER_LEN};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn logging_processor_answers_ping() {
        let (mut client, server) = tokio::io::duplex(1024);
        let conn = Connection::new(
            server,
            "127.0.0.1:1",
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        let task = tokio::spawn(conn.run(Arc::new(LoggingProcessor)));

        client
            .write_all(&protocol::encode(Signature::new(*b"JDAT"), b"{}").unwrap())
            .await
            .unwrap();
        client
            .write_all(&protocol::encode(PING, b"").unwrap())
            .await
            .unwrap();

        let mut raw = [0u8; HEADER_LEN];
        client.read_exact(&mut raw).await.unwrap();
        let header = FrameHeader::decode(&raw).unwrap();
        assert_eq!(header.signature, PONG);
        assert_eq!(header.length, 0);

        drop(client);
        assert_eq!(task.await.unwrap(), CloseReason::Graceful);
    }
}
