//! Fan-out broker — a consumer that broadcasts every incoming message to an
//! ordered set of outputs and answers upstream with one folded response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sluice_core::fabric::EDGE_CAPACITY;
use sluice_core::{Consumer, DispatchError, FabricError, Message, Metrics, Response, Shutdown};

/// Broadcasts each message to every output, in index order, then collects
/// one response per output. Upstream sees success if any output delivered;
/// only total failure escalates, as a mapped response carrying every error.
pub struct FanOut {
    shutdown: Arc<Shutdown>,
    parts: Option<LoopParts>,
    response_rx: Option<mpsc::Receiver<Response>>,
}

/// Everything the dispatch task owns. Dropping it closes every downstream
/// message channel and the upstream response channel.
struct LoopParts {
    shutdown: Arc<Shutdown>,
    metrics: Metrics,
    response_tx: mpsc::Sender<Response>,
    output_txs: Vec<mpsc::Sender<Message>>,
    output_rxs: Vec<mpsc::Receiver<Response>>,
    /// Held so the outputs outlive the dispatch loop. They wind down on
    /// their own once their message channels close.
    _outputs: Vec<Box<dyn Consumer>>,
}

impl FanOut {
    /// Build a broker over already-constructed outputs, starting each one
    /// with a dedicated message channel.
    ///
    /// Fails on the first output whose `start` fails. Outputs started before
    /// the failure are not closed here; their message channels close when
    /// the partially-built broker is dropped.
    pub fn new(outputs: Vec<Box<dyn Consumer>>, metrics: Metrics) -> Result<Self, FabricError> {
        let (response_tx, response_rx) = mpsc::channel(EDGE_CAPACITY);
        let mut outputs = outputs;
        let mut output_txs = Vec::with_capacity(outputs.len());
        let mut output_rxs = Vec::with_capacity(outputs.len());

        for output in outputs.iter_mut() {
            let (tx, rx) = mpsc::channel(EDGE_CAPACITY);
            output.start(rx)?;
            let responses = output.responses().ok_or(FabricError::AlreadyStarted)?;
            output_txs.push(tx);
            output_rxs.push(responses);
        }

        let shutdown = Arc::new(Shutdown::new());
        Ok(Self {
            shutdown: shutdown.clone(),
            parts: Some(LoopParts {
                shutdown,
                metrics,
                response_tx,
                output_txs,
                output_rxs,
                _outputs: outputs,
            }),
            response_rx: Some(response_rx),
        })
    }
}

#[async_trait]
impl Consumer for FanOut {
    fn start(&mut self, messages: mpsc::Receiver<Message>) -> Result<(), FabricError> {
        let parts = self.parts.take().ok_or(FabricError::AlreadyStarted)?;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            dispatch_loop(parts, messages).await;
            shutdown.mark_closed();
        });
        Ok(())
    }

    fn responses(&mut self) -> Option<mpsc::Receiver<Response>> {
        self.response_rx.take()
    }

    fn close_async(&self) {
        self.shutdown.trigger();
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), FabricError> {
        self.shutdown.wait_closed(timeout).await
    }
}

async fn dispatch_loop(parts: LoopParts, mut messages: mpsc::Receiver<Message>) {
    let LoopParts {
        shutdown,
        metrics,
        response_tx,
        output_txs,
        mut output_rxs,
        _outputs,
    } = parts;
    let mut watcher = shutdown.watcher();

    while shutdown.is_running() {
        let msg = tokio::select! {
            received = messages.recv() => match received {
                Some(msg) => msg,
                // Upstream closed its message channel: orderly end of stream.
                None => return,
            },
            _ = watcher.fired() => return,
        };
        metrics.incr_received();

        // Broadcast to every output in index order. Close firing mid-send
        // aborts the dispatch; upstream resolves the partial delivery when
        // it observes the closed response channel.
        for (index, tx) in output_txs.iter().enumerate() {
            tokio::select! {
                sent = tx.send(msg.clone()) => {
                    if sent.is_err() {
                        tracing::warn!(output = index, "output dropped its message channel, closing broker");
                        return;
                    }
                }
                _ = watcher.fired() => return,
            }
        }

        // Collect one response per output, in index order.
        let mut errors: HashMap<usize, DispatchError> = HashMap::new();
        let mut delivered = 0usize;
        for (index, rx) in output_rxs.iter_mut().enumerate() {
            let response = tokio::select! {
                received = rx.recv() => match received {
                    Some(response) => response,
                    None => {
                        // A silently dead output must not starve the others.
                        tracing::warn!(output = index, "closing broker: output response channel closed");
                        return;
                    }
                },
                _ = watcher.fired() => return,
            };
            if response.is_success() {
                delivered += 1;
                metrics.incr_sent();
            } else {
                metrics.incr_output_error();
                if let Some(err) = response.error() {
                    tracing::error!(output = index, error = %err, "failed to dispatch message");
                    errors.insert(index, err.clone());
                } else {
                    tracing::error!(output = index, "failed to dispatch message");
                }
            }
        }

        let response = if delivered == 0 {
            Response::mapped(errors)
        } else {
            Response::success()
        };

        tokio::select! {
            sent = response_tx.send(response) => {
                if sent.is_err() {
                    return;
                }
            }
            _ = watcher.fired() => return,
        }
    }
}
