//! The `/relay` endpoint: a transparent bridge between the browser socket and
//! the provider socket named by a signed URL.

use super::{
    frame::{Frame, Inbound},
    lifecycle::{CloseCause, Lifecycle, RelayState, Side},
    protocol::{
        EXPECTED_WEBSOCKET, MISSING_SIGNED_URL, RelayParams, envelope, validate_upstream,
    },
    queue::{OutboundQueue, Pushed, QueueClosed},
};
use crate::{config::RelaySettings, state::AppState};
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{Sink, StreamExt};
use std::{fmt::Display, sync::Arc};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as UpstreamMessage};
use tracing::{debug, info, instrument, trace, warn};
use voice_relay_core::ConversationEvent;

/// Axum handler for `GET /relay?signed_url=...`.
///
/// Every rejection happens before the upgrade, so no upstream connection is
/// attempted for a bad request.
pub async fn relay_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(params): Query<RelayParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Ok(upgrade) = upgrade else {
        return (StatusCode::BAD_REQUEST, EXPECTED_WEBSOCKET).into_response();
    };
    let Some(signed_url) = params.signed_url() else {
        return (StatusCode::BAD_REQUEST, MISSING_SIGNED_URL).into_response();
    };
    if let Err(message) =
        validate_upstream(signed_url, state.config.relay_upstream_prefix.as_deref())
    {
        warn!("Refusing relay to an unexpected upstream");
        return (StatusCode::BAD_REQUEST, message).into_response();
    }

    let signed_url = signed_url.to_string();
    let settings = state.config.relay;
    upgrade
        .on_failed_upgrade(|e| warn!(error = %e, "Relay upgrade failed"))
        .on_upgrade(move |socket| run_relay(socket, signed_url, settings))
}

/// Drives one relay connection from upgrade to teardown.
#[instrument(name = "relay", skip_all, fields(relay_id))]
pub async fn run_relay(client: WebSocket, signed_url: String, settings: RelaySettings) {
    let relay_id: u32 = rand::random();
    tracing::Span::current().record("relay_id", relay_id);
    info!("Client connected. Opening upstream...");

    let (client_sink, mut client_rx) = client.split();
    let mut relay = RelayConnection::new(client_sink, settings);
    relay.lifecycle.upstream_connecting();

    let connect = timeout(settings.connect_timeout, connect_async(signed_url.as_str()));
    tokio::pin!(connect);

    // The client may leave while the upstream handshake is still running.
    let upstream = loop {
        tokio::select! {
            result = &mut connect => break result,
            read = client_rx.next() => match Inbound::from_client(read) {
                Inbound::Frame(frame) => {
                    debug!(bytes = frame.len(), "Dropping client frame sent before upstream opened");
                }
                Inbound::Control => {}
                Inbound::Closed(reason) => {
                    relay.close(Side::Client, CloseCause::Closed { reason }).await;
                    return;
                }
                Inbound::Failed(error) => {
                    relay.close(Side::Client, CloseCause::Failed { error }).await;
                    return;
                }
            },
        }
    };

    let upstream = match upstream {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            warn!(error = %e, "Upstream connection failed");
            let cause = CloseCause::Failed { error: e.to_string() };
            relay.close(Side::Upstream, cause).await;
            return;
        }
        Err(_) => {
            warn!(timeout = ?settings.connect_timeout, "Upstream connection timed out");
            let cause = CloseCause::Failed {
                error: "upstream connection timed out".to_string(),
            };
            relay.close(Side::Upstream, cause).await;
            return;
        }
    };

    let (upstream_sink, mut upstream_rx) = upstream.split();
    relay.attach_upstream(upstream_sink);
    if let Err(cause) = relay.bridge().await {
        relay.close(Side::Client, cause).await;
        return;
    }
    info!("Upstream open. Relaying.");

    let (side, cause) = loop {
        tokio::select! {
            read = client_rx.next() => match Inbound::from_client(read) {
                Inbound::Frame(frame) => {
                    if let Err(cause) = relay.forward_to_upstream(frame) {
                        break (Side::Upstream, cause);
                    }
                }
                Inbound::Control => {}
                Inbound::Closed(reason) => break (Side::Client, CloseCause::Closed { reason }),
                Inbound::Failed(error) => break (Side::Client, CloseCause::Failed { error }),
            },
            read = upstream_rx.next() => match Inbound::from_upstream(read) {
                Inbound::Frame(frame) => {
                    if let Err(cause) = relay.forward_to_client(frame) {
                        break (Side::Client, cause);
                    }
                }
                Inbound::Control => {}
                Inbound::Closed(reason) => break (Side::Upstream, CloseCause::Closed { reason }),
                Inbound::Failed(error) => break (Side::Upstream, CloseCause::Failed { error }),
            },
        }
    };

    relay.close(side, cause).await;
}

/// Both write halves of a relay plus its lifecycle.
///
/// Reads stay with `run_relay`; this type owns everything that has to be
/// torn down.
pub struct RelayConnection {
    lifecycle: Lifecycle,
    settings: RelaySettings,
    to_client: Option<OutboundQueue<Message>>,
    to_upstream: Option<OutboundQueue<UpstreamMessage>>,
}

impl RelayConnection {
    pub fn new<S>(client_sink: S, settings: RelaySettings) -> Self
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        Self {
            lifecycle: Lifecycle::new(),
            settings,
            to_client: Some(OutboundQueue::spawn(
                client_sink,
                settings.queue_capacity,
                "to_client",
            )),
            to_upstream: None,
        }
    }

    pub fn state(&self) -> RelayState {
        self.lifecycle.state()
    }

    pub fn attach_upstream<S>(&mut self, upstream_sink: S)
    where
        S: Sink<UpstreamMessage> + Unpin + Send + 'static,
        S::Error: Display,
    {
        self.to_upstream = Some(OutboundQueue::spawn(
            upstream_sink,
            self.settings.queue_capacity,
            "to_upstream",
        ));
    }

    /// Marks the relay bridged and queues the `connected` envelope ahead of
    /// any forwarded frame.
    pub async fn bridge(&mut self) -> Result<(), CloseCause> {
        if !self.lifecycle.bridged() {
            return Ok(());
        }
        let (Some(queue), Some(message)) = (
            self.to_client.as_mut(),
            envelope(&ConversationEvent::connected()),
        ) else {
            return Ok(());
        };
        queue
            .push_within(message, self.settings.teardown_timeout)
            .await
            .map_err(|e| CloseCause::Failed {
                error: e.to_string(),
            })
    }

    pub fn forward_to_upstream(&mut self, frame: Frame) -> Result<(), CloseCause> {
        if !self.lifecycle.is_forwarding() {
            return Ok(());
        }
        let Some(queue) = self.to_upstream.as_mut() else {
            return Ok(());
        };
        let bytes = frame.len();
        let pushed = queue.push(frame.into_upstream());
        Self::account(pushed, queue.rejected(), bytes, "to_upstream")
    }

    pub fn forward_to_client(&mut self, frame: Frame) -> Result<(), CloseCause> {
        if !self.lifecycle.is_forwarding() {
            return Ok(());
        }
        let Some(queue) = self.to_client.as_mut() else {
            return Ok(());
        };
        let bytes = frame.len();
        let pushed = queue.push(frame.into_client());
        Self::account(pushed, queue.rejected(), bytes, "to_client")
    }

    fn account(
        pushed: Result<Pushed, QueueClosed>,
        rejected: u64,
        bytes: usize,
        direction: &'static str,
    ) -> Result<(), CloseCause> {
        match pushed {
            Ok(Pushed::Queued) => {
                trace!(direction, bytes, "Frame queued");
                Ok(())
            }
            Ok(Pushed::Rejected) => {
                warn!(direction, bytes, rejected, "Outbound queue full, dropping frame");
                Ok(())
            }
            Err(e) => Err(CloseCause::Failed {
                error: e.to_string(),
            }),
        }
    }

    /// Tears the relay down. Only the first call does anything.
    ///
    /// Owed envelopes are queued for the client, then both writers flush and
    /// close their sockets. The whole routine is bounded by the teardown
    /// timeout; writers still running after it are aborted.
    pub async fn close(&mut self, side: Side, cause: CloseCause) {
        if !self.lifecycle.begin_closing(side, cause.clone()) {
            return;
        }
        info!(closed_by = %side, ?cause, "Closing relay");

        let limit = self.settings.teardown_timeout;
        let notices = self.lifecycle.client_notices();
        let mut to_client = self.to_client.take();
        let to_upstream = self.to_upstream.take();

        let teardown = async move {
            if let Some(queue) = to_client.as_mut() {
                for message in notices.iter().filter_map(envelope) {
                    if queue.push_within(message, limit).await.is_err() {
                        break;
                    }
                }
            }
            tokio::join!(
                async {
                    if let Some(queue) = to_client {
                        queue.finish().await;
                    }
                },
                async {
                    if let Some(queue) = to_upstream {
                        queue.finish().await;
                    }
                },
            );
        };
        if timeout(limit, teardown).await.is_err() {
            warn!(?limit, "Teardown window elapsed; aborting writers");
        }

        self.lifecycle.closed();
        info!("Relay closed");
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if self.lifecycle.state() != RelayState::Closed {
            debug!(
                state = ?self.lifecycle.state(),
                closed_by = ?self.lifecycle.closed_by(),
                "Relay dropped before teardown finished"
            );
        }
    }
}
