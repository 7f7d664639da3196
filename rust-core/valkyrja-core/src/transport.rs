//! # Transport
//!
//! Where a finished response goes. The network server hands it to hyper
//! through a oneshot channel; tests collect it in a buffer.

use crate::error::{Error, Result};
use crate::response::Response;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

/// Emits a response to the client
pub trait Transport: Send + Sync {
    /// Send the response
    ///
    /// # Errors
    ///
    /// Returns an error when the response cannot be delivered.
    fn send(&self, response: Response) -> Result<()>;
}

/// Collects sent responses in memory
#[derive(Debug, Default)]
pub struct BufferTransport {
    sent: Mutex<Vec<Response>>,
}

impl BufferTransport {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<Response> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Transport for BufferTransport {
    fn send(&self, response: Response) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(response);
        Ok(())
    }
}

/// Delivers exactly one response over a oneshot channel
#[derive(Debug)]
pub struct ChannelTransport {
    sender: Mutex<Option<oneshot::Sender<Response>>>,
}

impl ChannelTransport {
    /// Create the transport and the receiving end
    #[must_use]
    pub fn new() -> (Self, oneshot::Receiver<Response>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(sender)),
            },
            receiver,
        )
    }
}

impl Transport for ChannelTransport {
    fn send(&self, response: Response) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::invalid_argument("response already sent"))?;
        sender.send(response).map_err(|_| Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_collects() {
        let transport = BufferTransport::new();
        transport.send(Response::text("a")).unwrap();
        transport.send(Response::text("b")).unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].body, "b");
    }

    #[tokio::test]
    async fn test_channel_sends_once() {
        let (transport, receiver) = ChannelTransport::new();
        transport.send(Response::text("once")).unwrap();
        assert!(transport.send(Response::text("twice")).is_err());
        assert_eq!(receiver.await.unwrap().body, "once");
    }

    #[test]
    fn test_channel_receiver_dropped() {
        let (transport, receiver) = ChannelTransport::new();
        drop(receiver);
        assert!(matches!(transport.send(Response::text("x")), Err(Error::Cancelled)));
    }
}
