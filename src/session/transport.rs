//! The data-channel transport boundary.
//!
//! WebRTC data-channel internals are out of scope; callers provide any
//! implementation of [`DataChannel`] (a real WebRTC binding in production,
//! an in-memory duplex in tests). The trait is written by hand with boxed
//! futures, rather than the `async_trait` crate, so that `Box<dyn
//! DataChannel>` stays usable for heterogeneous per-peer transports.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataChannelError {
    #[error("data channel is closed")]
    Closed,
    #[error("send failed: {0}")]
    SendFailed(String),
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A bidirectional, opaque, byte-oriented transport standing in for a
/// WebRTC data channel.
pub trait DataChannel: Send + Sync {
    /// Send one frame (a complete JSON message, already serialized).
    fn send(&self, frame: Vec<u8>) -> BoxFuture<'_, Result<(), DataChannelError>>;

    /// Receive the next frame, or `None` if the channel has closed.
    fn recv(&self) -> BoxFuture<'_, Option<Vec<u8>>>;

    /// Whether the channel is still usable for sends.
    fn is_open(&self) -> bool;
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::{BoxFuture, DataChannel, DataChannelError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    /// An in-memory duplex pair of [`DataChannel`]s, used in place of a real
    /// WebRTC data channel in tests.
    pub struct InMemoryChannel {
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        open: AtomicBool,
    }

    impl InMemoryChannel {
        #[must_use]
        pub fn pair() -> (Self, Self) {
            let (tx_a, rx_b) = mpsc::unbounded_channel();
            let (tx_b, rx_a) = mpsc::unbounded_channel();
            (
                Self {
                    tx: tx_a,
                    rx: tokio::sync::Mutex::new(rx_a),
                    open: AtomicBool::new(true),
                },
                Self {
                    tx: tx_b,
                    rx: tokio::sync::Mutex::new(rx_b),
                    open: AtomicBool::new(true),
                },
            )
        }

        pub fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    impl DataChannel for InMemoryChannel {
        fn send(&self, frame: Vec<u8>) -> BoxFuture<'_, Result<(), DataChannelError>> {
            Box::pin(async move {
                if !self.open.load(Ordering::SeqCst) {
                    return Err(DataChannelError::Closed);
                }
                self.tx
                    .send(frame)
                    .map_err(|e| DataChannelError::SendFailed(e.to_string()))
            })
        }

        fn recv(&self) -> BoxFuture<'_, Option<Vec<u8>>> {
            Box::pin(async move { self.rx.lock().await.recv().await })
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }
}
