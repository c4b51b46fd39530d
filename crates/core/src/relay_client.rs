//! Client side of the relay socket.
//!
//! Decodes the relay's text frames into generation-tagged `ConversationEvent`s
//! and hands every other frame to the caller untouched.

use crate::{
    error::ClientError,
    event::{ConversationEvent, Generation, Tagged},
};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use std::time::Duration;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

const OUTBOUND_CAPACITY: usize = 64;
const PAYLOAD_CAPACITY: usize = 256;

/// Builds relay connection URLs and opens relay links.
#[derive(Clone, Debug)]
pub struct RelayClient {
    relay_url: Url,
}

impl RelayClient {
    pub fn new(relay_url: &str) -> Result<Self, ClientError> {
        let relay_url =
            Url::parse(relay_url).map_err(|e| ClientError::InvalidRelayUrl(e.to_string()))?;
        if !matches!(relay_url.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidRelayUrl(format!(
                "unsupported scheme '{}'",
                relay_url.scheme()
            )));
        }
        Ok(Self { relay_url })
    }

    /// The relay URL with the signed URL attached as an encoded query parameter.
    pub fn connection_url(&self, signed_url: &str) -> Url {
        let mut url = self.relay_url.clone();
        url.query_pairs_mut().append_pair("signed_url", signed_url);
        url
    }

    /// Opens a relay socket for `generation`. Events are stamped with that
    /// generation and pushed into `events`; when the socket ends a final
    /// `disconnected` is pushed as well.
    pub async fn connect(
        &self,
        generation: Generation,
        signed_url: &str,
        events: mpsc::Sender<Tagged<ConversationEvent>>,
    ) -> Result<RelayLink, ClientError> {
        let url = self.connection_url(signed_url);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = ws_stream.split();
        info!(generation, "Connected to relay.");

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
        let (payload_tx, payload_rx) = mpsc::channel::<Message>(PAYLOAD_CAPACITY);

        let task = tokio::spawn(async move {
            let mut payloads = PayloadSink {
                tx: payload_tx,
                dropped: 0,
            };
            let mut reason = None;
            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => match outgoing {
                        Some(msg) => {
                            if let Err(e) = sink.send(msg).await {
                                reason = Some(e.to_string());
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    incoming = stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match ConversationEvent::from_frame(text.as_str()) {
                                Some(event) => {
                                    if events.send(Tagged::new(generation, event)).await.is_err() {
                                        return;
                                    }
                                }
                                None => payloads.forward(Message::Text(text)),
                            }
                        }
                        Some(Ok(msg @ Message::Binary(_))) => payloads.forward(msg),
                        Some(Ok(Message::Close(frame))) => {
                            reason = frame
                                .map(|f| f.reason.as_str().to_string())
                                .filter(|r| !r.is_empty());
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            reason = Some(e.to_string());
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!(generation, ?reason, dropped = payloads.dropped, "Relay link finished.");
            let _ = events
                .send(Tagged::new(generation, ConversationEvent::disconnected(reason)))
                .await;
        });

        Ok(RelayLink {
            outbound: Some(outbound_tx),
            payloads: Some(payload_rx),
            task,
        })
    }
}

/// Warn on the first dropped payload and then once per this many.
const DROP_WARN_EVERY: u64 = 500;

/// Hands opaque provider frames to whoever took the payload receiver.
struct PayloadSink {
    tx: mpsc::Sender<Message>,
    dropped: u64,
}

impl PayloadSink {
    fn forward(&mut self, msg: Message) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            // The receiver was dropped: nobody consumes provider frames here.
            Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped == 1 || self.dropped % DROP_WARN_EVERY == 0 {
                    warn!(dropped = self.dropped, "Payload queue full, dropping relay frames.");
                }
            }
        }
    }
}

/// An open relay socket. Dropping the link aborts its I/O task, which closes
/// the socket.
#[derive(Debug)]
pub struct RelayLink {
    outbound: Option<mpsc::Sender<Message>>,
    payloads: Option<mpsc::Receiver<Message>>,
    task: JoinHandle<()>,
}

impl RelayLink {
    /// Queues a frame for the relay.
    pub async fn send(&self, msg: Message) -> Result<(), ClientError> {
        let outbound = self.outbound.as_ref().ok_or(ClientError::RelayClosed)?;
        outbound.send(msg).await.map_err(|_| ClientError::RelayClosed)
    }

    /// Takes the receiver of opaque provider frames. Returns `None` after the
    /// first call. Dropping the receiver discards further frames silently.
    pub fn take_payloads(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.payloads.take()
    }

    /// Sends a close frame and waits up to `grace` for the socket to finish.
    pub async fn close(mut self, grace: Duration) {
        self.outbound.take();
        if timeout(grace, &mut self.task).await.is_err() {
            warn!("Relay link did not close in time, aborting.");
            self.task.abort();
        }
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}
