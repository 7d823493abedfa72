//! Transport abstraction for direct mode.
//!
//! A transport is a non-blocking byte pipe to one peer. Framing is left to
//! the message encoding itself: the receiver appends whatever arrived to its
//! buffer and lets the router split complete messages off the front.

use bytes::{Bytes, BytesMut};

use crate::error::Result;

/// Non-blocking byte pipe to a single peer.
pub trait Transport: Send {
    /// Queue bytes for the peer.
    fn send(&mut self, bytes: Bytes) -> Result<()>;

    /// Append everything that has arrived to `buf`. Returns the number of
    /// bytes appended, zero when nothing is waiting.
    fn recv_into(&mut self, buf: &mut BytesMut) -> Result<usize>;

    /// Whether both directions are still usable.
    fn is_open(&self) -> bool;

    /// Close the local side. The peer sees the pipe close on its next receive.
    fn close(&mut self);
}

/// In-memory transport for tests and demos.
///
/// Uses unbounded tokio channels, polled with `try_recv`, so it works both
/// inside and outside a runtime.
pub mod memory {
    use super::*;
    use tokio::sync::mpsc::{self, error::TryRecvError};
    use tracing::trace;

    use crate::error::DirectError;

    /// Connected pair of transports.
    pub fn duplex() -> (MemoryTransport, MemoryTransport) {
        duplex_chunked(usize::MAX)
    }

    /// Connected pair that delivers every send in pieces of at most `chunk`
    /// bytes, to exercise partial-message handling.
    pub fn duplex_chunked(chunk: usize) -> (MemoryTransport, MemoryTransport) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MemoryTransport::new(a_tx, a_rx, chunk),
            MemoryTransport::new(b_tx, b_rx, chunk),
        )
    }

    /// One end of an in-memory duplex.
    #[derive(Debug)]
    pub struct MemoryTransport {
        tx: Option<mpsc::UnboundedSender<Bytes>>,
        rx: mpsc::UnboundedReceiver<Bytes>,
        chunk: usize,
        peer_closed: bool,
    }

    impl MemoryTransport {
        fn new(
            tx: mpsc::UnboundedSender<Bytes>,
            rx: mpsc::UnboundedReceiver<Bytes>,
            chunk: usize,
        ) -> Self {
            Self {
                tx: Some(tx),
                rx,
                chunk: chunk.max(1),
                peer_closed: false,
            }
        }
    }

    impl Transport for MemoryTransport {
        fn send(&mut self, mut bytes: Bytes) -> Result<()> {
            let tx = self.tx.as_ref().ok_or(DirectError::Closed)?;
            while !bytes.is_empty() {
                let piece = bytes.split_to(self.chunk.min(bytes.len()));
                tx.send(piece).map_err(|_| DirectError::Closed)?;
            }
            Ok(())
        }

        fn recv_into(&mut self, buf: &mut BytesMut) -> Result<usize> {
            let mut received = 0;
            loop {
                match self.rx.try_recv() {
                    Ok(piece) => {
                        received += piece.len();
                        buf.extend_from_slice(&piece);
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.peer_closed = true;
                        break;
                    }
                }
            }
            if received > 0 {
                trace!(received, "bytes received");
            }
            Ok(received)
        }

        fn is_open(&self) -> bool {
            self.tx.as_ref().is_some_and(|tx| !tx.is_closed()) && !self.peer_closed
        }

        fn close(&mut self) {
            self.tx = None;
            self.rx.close();
        }
    }
}
