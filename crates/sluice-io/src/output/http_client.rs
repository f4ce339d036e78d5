//! HTTP egress — POSTs each message to a configured URL, retrying until the
//! endpoint accepts it or the close signal interrupts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header;
use tokio::sync::mpsc;

use sluice_core::config::HttpClientConfig;
use sluice_core::fabric::EDGE_CAPACITY;
use sluice_core::{Consumer, DispatchError, FabricError, Message, Response, Shutdown};

pub struct HttpClient {
    shutdown: Arc<Shutdown>,
    response_rx: Option<mpsc::Receiver<Response>>,
    parts: Option<ClientParts>,
}

struct ClientParts {
    conf: HttpClientConfig,
    client: reqwest::Client,
    response_tx: mpsc::Sender<Response>,
}

impl HttpClient {
    pub fn new(conf: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(conf.timeout_ms))
            .build()
            .context("failed to build http client")?;
        let (response_tx, response_rx) = mpsc::channel(EDGE_CAPACITY);
        Ok(Self {
            shutdown: Arc::new(Shutdown::new()),
            response_rx: Some(response_rx),
            parts: Some(ClientParts {
                conf,
                client,
                response_tx,
            }),
        })
    }
}

#[async_trait]
impl Consumer for HttpClient {
    fn start(&mut self, messages: mpsc::Receiver<Message>) -> Result<(), FabricError> {
        let parts = self.parts.take().ok_or(FabricError::AlreadyStarted)?;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            deliver_loop(&shutdown, parts, messages).await;
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

async fn deliver_loop(
    shutdown: &Shutdown,
    parts: ClientParts,
    mut messages: mpsc::Receiver<Message>,
) {
    let ClientParts {
        conf,
        client,
        response_tx,
    } = parts;
    let retry_period = Duration::from_millis(conf.retry_period_ms);
    let mut watcher = shutdown.watcher();

    'next: while shutdown.is_running() {
        let msg = tokio::select! {
            received = messages.recv() => match received {
                Some(msg) => msg,
                // Upstream closed the message channel: end of stream.
                None => return,
            },
            _ = watcher.fired() => return,
        };

        // Retry until the endpoint accepts the message or close interrupts.
        let response = loop {
            match post_message(&client, &conf.url, &msg).await {
                Ok(()) => break Response::success(),
                Err(err) => {
                    tracing::error!(url = %conf.url, error = %err, "post failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(retry_period) => {}
                        _ = watcher.fired() => {
                            // Interrupted mid-retry: the message never made
                            // it out. Best effort, upstream may be gone too.
                            let _ = response_tx
                                .try_send(Response::failure(DispatchError::OutputClosed));
                            break 'next;
                        }
                    }
                }
            }
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

async fn post_message(
    client: &reqwest::Client,
    url: &str,
    msg: &Message,
) -> Result<(), DispatchError> {
    let request = if msg.part_count() == 1 {
        client
            .post(url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(msg.parts()[0].clone())
    } else {
        let boundary = random_boundary();
        client
            .post(url)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/mixed; boundary={boundary}"),
            )
            .body(encode_multipart(msg, &boundary))
    };

    let response = request
        .send()
        .await
        .map_err(|err| DispatchError::Transport(err.to_string()))?;
    if !response.status().is_success() {
        return Err(DispatchError::Status(response.status().as_u16()));
    }
    Ok(())
}

/// RFC 2046 framing with every part typed as an opaque octet stream.
fn encode_multipart(msg: &Message, boundary: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for part in msg.parts() {
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(part);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

fn random_boundary() -> String {
    format!(
        "{:016x}{:016x}",
        rand::random::<u64>(),
        rand::random::<u64>()
    )
}
