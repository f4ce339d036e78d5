//! The producer/consumer contracts every input, output, and broker honours.
//!
//! An edge is one producer wired to one consumer through two bounded
//! channels owned by opposite sides. The protocol on the edge is strict
//! request/response: the producer does not emit message `i + 1` until it has
//! observed the response for message `i`. That is the only backpressure
//! mechanism in the system.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::response::Response;

/// Message channels on an edge are capacity-1: the request/response protocol
/// never has more than one message in flight per edge.
pub const EDGE_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FabricError {
    /// `start` was called more than once, or a channel endpoint was taken
    /// twice. Fatal to the caller.
    #[error("component already started")]
    AlreadyStarted,
    /// A bounded wait elapsed. The caller may retry the wait or give up.
    #[error("timed out waiting for component to close")]
    Timeout,
}

/// Anything that accepts messages: outputs and brokers.
///
/// For every message read from the bound channel, exactly one [`Response`]
/// appears on the channel yielded by [`responses`](Consumer::responses), in
/// arrival order. Dropping the response sender tells the producer this
/// consumer has died.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Bind the upstream message channel and spawn the processing task.
    fn start(&mut self, messages: mpsc::Receiver<Message>) -> Result<(), FabricError>;

    /// Hand over the outbound response endpoint. Yields once; `None` after.
    fn responses(&mut self) -> Option<mpsc::Receiver<Response>>;

    /// Signal shutdown without blocking. Safe to call more than once.
    fn close_async(&self);

    /// Block until the processing task has fully released its resources.
    async fn wait_for_close(&self, timeout: Duration) -> Result<(), FabricError>;
}

/// Anything that emits messages: inputs and brokers.
///
/// The producer owns the message channel and hands its receiver out via
/// [`messages`](Producer::messages); the consumer's response channel is
/// bound at [`start`](Producer::start). Closure of the message channel is
/// the orderly end-of-stream signal; a closed response channel means the
/// consumer died and the producer must stop emitting.
#[async_trait]
pub trait Producer: Send {
    /// Bind the downstream response channel and spawn the emitting task.
    fn start(&mut self, responses: mpsc::Receiver<Response>) -> Result<(), FabricError>;

    /// Hand over the outbound message endpoint. Yields once; `None` after.
    fn messages(&mut self) -> Option<mpsc::Receiver<Message>>;

    fn close_async(&self);

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), FabricError>;
}

/// Wire a producer to a consumer, completing one edge of the bridge.
pub fn couple<P, C>(producer: &mut P, consumer: &mut C) -> Result<(), FabricError>
where
    P: Producer + ?Sized,
    C: Consumer + ?Sized,
{
    let messages = producer.messages().ok_or(FabricError::AlreadyStarted)?;
    consumer.start(messages)?;
    let responses = consumer.responses().ok_or(FabricError::AlreadyStarted)?;
    producer.start(responses)?;
    Ok(())
}
