//! Test double for the consumer side of an edge. The test plays the
//! downstream: it reads messages and injects acknowledgements by hand.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use sluice_core::fabric::EDGE_CAPACITY;
use sluice_core::{Consumer, FabricError, Message, Response, Shutdown};

pub struct MockOutput {
    shutdown: Arc<Shutdown>,
    response_rx: Option<mpsc::Receiver<Response>>,
    handoff: Option<oneshot::Sender<mpsc::Receiver<Message>>>,
}

/// Test-side endpoints of a [`MockOutput`] edge.
pub struct MockOutputHandle {
    /// Sender for acknowledgements; drop it to simulate a dead output.
    pub acks: mpsc::Sender<Response>,
    /// Resolves to the bound message channel once the mock is started.
    pub messages: oneshot::Receiver<mpsc::Receiver<Message>>,
}

impl MockOutput {
    pub fn new() -> (Self, MockOutputHandle) {
        let (ack_tx, ack_rx) = mpsc::channel(EDGE_CAPACITY);
        let (handoff_tx, handoff_rx) = oneshot::channel();
        (
            Self {
                shutdown: Arc::new(Shutdown::new()),
                response_rx: Some(ack_rx),
                handoff: Some(handoff_tx),
            },
            MockOutputHandle {
                acks: ack_tx,
                messages: handoff_rx,
            },
        )
    }
}

#[async_trait]
impl Consumer for MockOutput {
    fn start(&mut self, messages: mpsc::Receiver<Message>) -> Result<(), FabricError> {
        let handoff = self.handoff.take().ok_or(FabricError::AlreadyStarted)?;
        let _ = handoff.send(messages);
        Ok(())
    }

    fn responses(&mut self) -> Option<mpsc::Receiver<Response>> {
        self.response_rx.take()
    }

    fn close_async(&self) {
        self.shutdown.trigger();
        self.shutdown.mark_closed();
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), FabricError> {
        self.shutdown.wait_closed(timeout).await
    }
}
