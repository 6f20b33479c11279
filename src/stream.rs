//! In-memory resource response stream.
//!
//! Single-producer, single-consumer channel between a plugin transport and
//! the response flusher. The channel holds one frame: after the first send,
//! the producer suspends until the consumer drains the previous frame,
//! which is the backpressure contract for resource streaming.

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::CallResourceResponse;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("cannot send to a closed stream")]
    SendOnClosed,

    #[error("cannot close a closed stream")]
    AlreadyClosed,

    #[error("stream cancelled")]
    Cancelled,

    #[error("end of stream")]
    Eof,
}

/// Stream of resource response frames with explicit close.
pub struct ResourceStream {
    cancel: CancellationToken,
    sender: Mutex<Option<mpsc::Sender<CallResourceResponse>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<CallResourceResponse>>,
}

impl ResourceStream {
    /// Create a stream tied to a per-call cancellation token.
    pub fn new(cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            cancel,
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
        }
    }

    /// Send one frame, suspending until the consumer takes it.
    ///
    /// Unblocks with `Cancelled` when the call's token fires, and errors
    /// with `SendOnClosed` after `close`.
    pub async fn send(&self, frame: CallResourceResponse) -> Result<(), StreamError> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(StreamError::SendOnClosed)?;

        tokio::select! {
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            sent = sender.send(frame) => sent.map_err(|_| StreamError::SendOnClosed),
        }
    }

    /// Receive the next frame.
    ///
    /// Returns `Eof` once the stream is closed and drained, or `Cancelled`
    /// when the call's token fires.
    pub async fn recv(&self) -> Result<CallResourceResponse, StreamError> {
        let mut receiver = self.receiver.lock().await;

        tokio::select! {
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            frame = receiver.recv() => frame.ok_or(StreamError::Eof),
        }
    }

    /// Close the stream, signalling EOF to the consumer.
    ///
    /// Closing twice is a programming error and returns `AlreadyClosed`.
    pub fn close(&self) -> Result<(), StreamError> {
        self.sender
            .lock()
            .take()
            .map(drop)
            .ok_or(StreamError::AlreadyClosed)
    }
}
