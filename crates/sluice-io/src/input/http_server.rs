//! HTTP ingress — turns POST bodies into messages and answers each request
//! with the outcome of its dispatch.
//!
//! Handlers never touch the edge channels directly. Each accepted body is
//! handed to a single bridge task as a message plus a oneshot reply address;
//! the bridge task owns the message/response channel pair and keeps the edge
//! strictly one-in-flight no matter how many requests arrive concurrently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use sluice_core::config::HttpServerConfig;
use sluice_core::fabric::EDGE_CAPACITY;
use sluice_core::{DispatchError, FabricError, Message, Producer, Response, Shutdown};

pub struct HttpServer {
    conf: HttpServerConfig,
    shutdown: Arc<Shutdown>,
    message_rx: Option<mpsc::Receiver<Message>>,
    parts: Option<ServerParts>,
}

struct ServerParts {
    message_tx: mpsc::Sender<Message>,
    submit_tx: mpsc::Sender<Submission>,
    submit_rx: mpsc::Receiver<Submission>,
}

/// One accepted POST: the parsed message and where its handler is waiting.
struct Submission {
    message: Message,
    reply: oneshot::Sender<Response>,
}

#[derive(Clone)]
struct AppState {
    submit: mpsc::Sender<Submission>,
    timeout: Duration,
}

impl HttpServer {
    pub fn new(conf: HttpServerConfig) -> Self {
        let (message_tx, message_rx) = mpsc::channel(EDGE_CAPACITY);
        let (submit_tx, submit_rx) = mpsc::channel(EDGE_CAPACITY);
        Self {
            conf,
            shutdown: Arc::new(Shutdown::new()),
            message_rx: Some(message_rx),
            parts: Some(ServerParts {
                message_tx,
                submit_tx,
                submit_rx,
            }),
        }
    }
}

#[async_trait]
impl Producer for HttpServer {
    fn start(&mut self, responses: mpsc::Receiver<Response>) -> Result<(), FabricError> {
        let parts = self.parts.take().ok_or(FabricError::AlreadyStarted)?;
        let conf = self.conf.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(run(conf, shutdown, parts, responses));
        Ok(())
    }

    fn messages(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.message_rx.take()
    }

    fn close_async(&self) {
        self.shutdown.trigger();
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), FabricError> {
        self.shutdown.wait_closed(timeout).await
    }
}

async fn run(
    conf: HttpServerConfig,
    shutdown: Arc<Shutdown>,
    parts: ServerParts,
    responses: mpsc::Receiver<Response>,
) {
    let state = AppState {
        submit: parts.submit_tx,
        timeout: Duration::from_millis(conf.timeout_ms),
    };
    let app = Router::new()
        .route(&conf.path, post(handle_post))
        .with_state(state);

    let listener = match TcpListener::bind(&conf.address).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(address = %conf.address, error = %err, "failed to bind http input");
            shutdown.trigger();
            shutdown.mark_closed();
            return;
        }
    };
    tracing::info!(address = %conf.address, path = %conf.path, "http input listening");

    let mut server_watcher = shutdown.watcher();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_watcher.fired().await });
        if let Err(err) = serve.await {
            tracing::error!(error = %err, "http input server failed");
        }
    });

    bridge_loop(&shutdown, parts.submit_rx, parts.message_tx, responses).await;

    // The loop may exit on its own (dead consumer); make sure the server
    // winds down with it before the close completes.
    shutdown.trigger();
    let _ = server.await;
    shutdown.mark_closed();
}

/// Forwards one submission at a time over the edge: send the message, wait
/// for exactly one response, relay it to the waiting handler.
async fn bridge_loop(
    shutdown: &Shutdown,
    mut submit_rx: mpsc::Receiver<Submission>,
    message_tx: mpsc::Sender<Message>,
    mut responses: mpsc::Receiver<Response>,
) {
    let mut watcher = shutdown.watcher();

    while shutdown.is_running() {
        let submission = tokio::select! {
            received = submit_rx.recv() => match received {
                Some(submission) => submission,
                None => return,
            },
            _ = watcher.fired() => return,
        };

        tokio::select! {
            sent = message_tx.send(submission.message) => {
                if sent.is_err() {
                    let _ = submission.reply.send(Response::failure(DispatchError::OutputClosed));
                    tracing::warn!("consumer dropped its message channel, shutting down http input");
                    return;
                }
            }
            _ = watcher.fired() => {
                let _ = submission.reply.send(Response::failure(DispatchError::OutputClosed));
                return;
            }
        }

        let response = tokio::select! {
            received = responses.recv() => match received {
                Some(response) => response,
                None => {
                    // The consumer died mid-dispatch. Terminal for this
                    // producer: stop emitting and begin shutdown.
                    let _ = submission.reply.send(Response::failure(DispatchError::OutputClosed));
                    tracing::warn!("response channel closed, shutting down http input");
                    return;
                }
            },
            _ = watcher.fired() => return,
        };

        let _ = submission.reply.send(response);
    }
}

async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if body.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let message = match read_message(content_type, body).await {
        Ok(message) if !message.is_empty() => message,
        Ok(_) => return StatusCode::BAD_REQUEST,
        Err(err) => {
            tracing::debug!(error = %err, "rejecting unparseable multipart body");
            return StatusCode::BAD_REQUEST;
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let submission = Submission {
        message,
        reply: reply_tx,
    };
    if state.submit.send(submission).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    match tokio::time::timeout(state.timeout, reply_rx).await {
        Ok(Ok(response)) if response.is_success() => StatusCode::OK,
        Ok(Ok(_)) => StatusCode::BAD_GATEWAY,
        Ok(Err(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Err(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

/// A `multipart/*` body parses per RFC 2046 into ordered parts; anything
/// else is a single part.
async fn read_message(content_type: Option<&str>, body: Bytes) -> Result<Message, multer::Error> {
    let Some(ct) = content_type.filter(|ct| ct.starts_with("multipart/")) else {
        return Ok(Message::from_part(body));
    };

    let boundary = multer::parse_boundary(ct)?;
    let stream = futures::stream::once(async move { Ok::<Bytes, std::convert::Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut message = Message::new();
    while let Some(field) = multipart.next_field().await? {
        message.push_part(field.bytes().await?);
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Block until the input's listener accepts connections.
    async fn wait_ready(address: &str) {
        for _ in 0..100 {
            if tokio::net::TcpStream::connect(address).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("http input did not come up on {address}");
    }

    fn test_conf(address: &str, timeout_ms: u64) -> HttpServerConfig {
        HttpServerConfig {
            address: address.to_string(),
            path: "/testpost".to_string(),
            timeout_ms,
        }
    }

    /// Start an input and attach a consumer task that acknowledges each
    /// message with the responses it is given.
    fn attach_acking_consumer(
        input: &mut HttpServer,
        mut acks: Vec<Response>,
    ) -> tokio::task::JoinHandle<Vec<Message>> {
        let mut messages = input.messages().expect("message endpoint");
        let (ack_tx, ack_rx) = mpsc::channel(EDGE_CAPACITY);
        input.start(ack_rx).expect("start");

        tokio::spawn(async move {
            let mut seen = Vec::new();
            for ack in acks.drain(..) {
                let msg = messages.recv().await.expect("message from input");
                seen.push(msg);
                ack_tx.send(ack).await.expect("ack accepted");
            }
            seen
        })
    }

    #[tokio::test]
    async fn single_part_post_round_trips() {
        let mut input = HttpServer::new(test_conf("127.0.0.1:4710", 1_000));
        let consumer = attach_acking_consumer(&mut input, vec![Response::success()]);
        wait_ready("127.0.0.1:4710").await;

        let status = reqwest::Client::new()
            .post("http://127.0.0.1:4710/testpost")
            .header("Content-Type", "application/octet-stream")
            .body("test42")
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, StatusCode::OK);

        let seen = consumer.await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].part_count(), 1);
        assert_eq!(&seen[0].parts()[0][..], b"test42");

        input.close_async();
        input.wait_for_close(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn multipart_post_parses_ordered_parts() {
        let mut input = HttpServer::new(test_conf("127.0.0.1:4711", 1_000));
        let consumer = attach_acking_consumer(&mut input, vec![Response::success()]);
        wait_ready("127.0.0.1:4711").await;

        let body = "--foo\r\n\
                    Content-Type: application/octet-stream\r\n\r\n\
                    test0 part one\r\n\
                    --foo\r\n\
                    Content-Type: application/octet-stream\r\n\r\n\
                    test0 part two\r\n\
                    --foo--\r\n";
        let status = reqwest::Client::new()
            .post("http://127.0.0.1:4711/testpost")
            .header("Content-Type", "multipart/mixed; boundary=foo")
            .body(body)
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, StatusCode::OK);

        let seen = consumer.await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].part_count(), 2);
        assert_eq!(&seen[0].parts()[0][..], b"test0 part one");
        assert_eq!(&seen[0].parts()[1][..], b"test0 part two");

        input.close_async();
        input.wait_for_close(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn error_ack_maps_to_bad_gateway() {
        let mut input = HttpServer::new(test_conf("127.0.0.1:4712", 1_000));
        let consumer = attach_acking_consumer(
            &mut input,
            vec![Response::failure(DispatchError::Status(500))],
        );
        wait_ready("127.0.0.1:4712").await;

        let status = reqwest::Client::new()
            .post("http://127.0.0.1:4712/testpost")
            .body("doomed")
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        consumer.await.unwrap();

        input.close_async();
        input.wait_for_close(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn slow_ack_maps_to_gateway_timeout() {
        let mut input = HttpServer::new(test_conf("127.0.0.1:4713", 100));
        let mut messages = input.messages().unwrap();
        let (ack_tx, ack_rx) = mpsc::channel(EDGE_CAPACITY);
        input.start(ack_rx).unwrap();
        wait_ready("127.0.0.1:4713").await;

        // A consumer that sits on the message well past the request timeout.
        let consumer = tokio::spawn(async move {
            let _msg = messages.recv().await.expect("message");
            tokio::time::sleep(Duration::from_millis(400)).await;
            let _ = ack_tx.send(Response::success()).await;
        });

        let status = reqwest::Client::new()
            .post("http://127.0.0.1:4713/testpost")
            .body("late")
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        consumer.await.unwrap();

        input.close_async();
        input.wait_for_close(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn empty_and_malformed_bodies_are_rejected() {
        let mut input = HttpServer::new(test_conf("127.0.0.1:4714", 1_000));
        let _messages = input.messages().unwrap();
        let (_ack_tx, ack_rx) = mpsc::channel(EDGE_CAPACITY);
        input.start(ack_rx).unwrap();
        wait_ready("127.0.0.1:4714").await;

        let client = reqwest::Client::new();

        let empty = client
            .post("http://127.0.0.1:4714/testpost")
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(empty, StatusCode::BAD_REQUEST);

        // Multipart content type without a boundary parameter.
        let malformed = client
            .post("http://127.0.0.1:4714/testpost")
            .header("Content-Type", "multipart/mixed")
            .body("--foo--\r\n")
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(malformed, StatusCode::BAD_REQUEST);

        input.close_async();
        input.wait_for_close(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn dead_consumer_turns_posts_away() {
        let mut input = HttpServer::new(test_conf("127.0.0.1:4715", 1_000));
        let mut messages = input.messages().unwrap();
        let (ack_tx, ack_rx) = mpsc::channel(EDGE_CAPACITY);
        input.start(ack_rx).unwrap();
        wait_ready("127.0.0.1:4715").await;

        // Consumer takes the message then dies without acknowledging.
        let consumer = tokio::spawn(async move {
            let _msg = messages.recv().await.expect("message");
            drop(ack_tx);
        });

        let status = reqwest::Client::new()
            .post("http://127.0.0.1:4715/testpost")
            .body("lost")
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        consumer.await.unwrap();

        // A dead consumer is terminal: the producer closes itself down.
        input.wait_for_close(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut input = HttpServer::new(test_conf("127.0.0.1:4716", 1_000));

        let (_tx_a, rx_a) = mpsc::channel(EDGE_CAPACITY);
        input.start(rx_a).unwrap();
        let (_tx_b, rx_b) = mpsc::channel(EDGE_CAPACITY);
        assert_eq!(input.start(rx_b), Err(FabricError::AlreadyStarted));

        input.close_async();
        input.wait_for_close(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn single_part_read_ignores_other_content_types() {
        let msg = read_message(Some("application/json"), Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(msg.part_count(), 1);
        assert_eq!(&msg.parts()[0][..], b"{}");
    }
}
