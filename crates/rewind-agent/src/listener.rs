//! Event Listener: a long-lived GET against the server's
//! event stream, folded through `common::sse` and forwarded onto a bounded
//! channel for the Monitor Manager to consume.
//!
//! Cancellation is cooperative: `CancellationToken::cancel()` must unblock
//! the read loop within a bounded time even mid-chunk, so the Connection
//! Supervisor can restart the listener without waiting out a dead socket.

use async_trait::async_trait;
use common::error::AgentError;
use common::sse::{decode_event, EventFramer, NotificationEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One chunk of the event stream body, abstracted so the read loop is
/// unit-testable without a real socket.
#[async_trait]
trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<String>, AgentError>;
}

struct HttpChunkSource {
    response: reqwest::Response,
}

#[async_trait]
impl ChunkSource for HttpChunkSource {
    async fn next_chunk(&mut self) -> Result<Option<String>, AgentError> {
        match self.response.chunk().await {
            Ok(Some(bytes)) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Ok(None) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// HTTP-backed event listener: opens `/:/eventsource/notifications` and
/// streams it until cancelled or disconnected.
pub struct HttpEventListener {
    client: reqwest::Client,
    server_url: String,
    auth_token: String,
    client_identifier: String,
}

impl HttpEventListener {
    pub fn new(server_url: String, auth_token: String, client_identifier: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            server_url,
            auth_token,
            client_identifier,
        })
    }

    /// Runs until the stream disconnects, a transport error occurs, or
    /// `cancel` fires. A clean `Ok(())` only happens on cancellation or the
    /// receiver going away; anything else is a condition the Connection
    /// Supervisor should treat as reconnect-worthy.
    pub async fn run(&self, tx: mpsc::Sender<NotificationEvent>, cancel: CancellationToken) -> Result<(), AgentError> {
        let url = format!(
            "{}/:/eventsource/notifications?filters=playing",
            self.server_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(url)
            .header("X-Plex-Token", &self.auth_token)
            .header("X-Plex-Client-Identifier", &self.client_identifier)
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AgentError::from_status(
                response.status().as_u16(),
                "eventsource/notifications",
            ));
        }

        drain(HttpChunkSource { response }, tx, cancel).await
    }
}

async fn drain(
    mut source: impl ChunkSource,
    tx: mpsc::Sender<NotificationEvent>,
    cancel: CancellationToken,
) -> Result<(), AgentError> {
    let mut framer = EventFramer::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("event listener cancelled");
                return Ok(());
            }
            chunk = source.next_chunk() => {
                match chunk? {
                    Some(text) => {
                        for raw in framer.push_chunk(&text) {
                            let event = decode_event(&raw);
                            if tx.send(event).await.is_err() {
                                debug!("event listener's receiver dropped, stopping");
                                return Ok(());
                            }
                        }
                    }
                    None => {
                        warn!("event stream ended unexpectedly");
                        return Err(AgentError::Disconnected(
                            "event stream closed unexpectedly".to_string(),
                        ));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedSource {
        chunks: Mutex<VecDeque<Result<Option<String>, String>>>,
    }

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn next_chunk(&mut self) -> Result<Option<String>, AgentError> {
            match self.chunks.lock().unwrap().pop_front() {
                Some(Ok(chunk)) => Ok(chunk),
                Some(Err(msg)) => Err(AgentError::Transport(msg)),
                None => {
                    // no more scripted chunks: block forever, like a live
                    // connection with nothing more to send.
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    #[tokio::test]
    async fn forwards_decoded_events_then_reports_disconnection() {
        let source = ScriptedSource {
            chunks: Mutex::new(VecDeque::from([
                Ok(Some("event:ping\ndata:{}\n\n".to_string())),
                Ok(None),
            ])),
        };
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let result = drain(source, tx, cancel).await;
        assert_eq!(result, Err(AgentError::Disconnected("event stream closed unexpectedly".to_string())));
        assert_eq!(rx.recv().await, Some(NotificationEvent::Ping));
    }

    #[tokio::test]
    async fn transport_error_is_propagated() {
        let source = ScriptedSource {
            chunks: Mutex::new(VecDeque::from([Err("connection reset".to_string())])),
        };
        let (tx, _rx) = mpsc::channel(8);
        let result = drain(source, tx, CancellationToken::new()).await;
        assert_eq!(result, Err(AgentError::Transport("connection reset".to_string())));
    }

    #[tokio::test]
    async fn cancellation_unblocks_even_mid_read() {
        let source = ScriptedSource::default();
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(async move { drain(source, tx, cancel_clone).await });
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("drain did not unblock on cancellation")
            .unwrap();
        assert_eq!(result, Ok(()));
    }
}
