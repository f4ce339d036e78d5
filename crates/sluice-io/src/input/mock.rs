//! Test double for the producer side of an edge. The test plays the
//! upstream: it feeds messages in and reads acknowledgements back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use sluice_core::fabric::EDGE_CAPACITY;
use sluice_core::{FabricError, Message, Producer, Response, Shutdown};

pub struct MockInput {
    shutdown: Arc<Shutdown>,
    message_rx: Option<mpsc::Receiver<Message>>,
    handoff: Option<oneshot::Sender<mpsc::Receiver<Response>>>,
}

/// Test-side endpoints of a [`MockInput`] edge.
pub struct MockInputHandle {
    /// Sender for messages; drop it to signal orderly end of stream.
    pub feed: mpsc::Sender<Message>,
    /// Resolves to the bound response channel once the mock is started.
    pub responses: oneshot::Receiver<mpsc::Receiver<Response>>,
}

impl MockInput {
    pub fn new() -> (Self, MockInputHandle) {
        let (feed_tx, feed_rx) = mpsc::channel(EDGE_CAPACITY);
        let (handoff_tx, handoff_rx) = oneshot::channel();
        (
            Self {
                shutdown: Arc::new(Shutdown::new()),
                message_rx: Some(feed_rx),
                handoff: Some(handoff_tx),
            },
            MockInputHandle {
                feed: feed_tx,
                responses: handoff_rx,
            },
        )
    }
}

#[async_trait]
impl Producer for MockInput {
    fn start(&mut self, responses: mpsc::Receiver<Response>) -> Result<(), FabricError> {
        let handoff = self.handoff.take().ok_or(FabricError::AlreadyStarted)?;
        let _ = handoff.send(responses);
        Ok(())
    }

    fn messages(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.message_rx.take()
    }

    fn close_async(&self) {
        self.shutdown.trigger();
        self.shutdown.mark_closed();
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), FabricError> {
        self.shutdown.wait_closed(timeout).await
    }
}
