//! Bounded outbound queue in front of one WebSocket sink.
//!
//! A dedicated writer task drains the queue so a slow peer never blocks the
//! read loop. When the queue is full the newest frame is rejected and
//! counted.

use futures_util::{Sink, SinkExt};
use std::{fmt::Display, time::Duration};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{Instrument, debug};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0} writer has stopped")]
pub struct QueueClosed(pub &'static str);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    Queued,
    /// Queue full; the frame was dropped.
    Rejected,
}

pub struct OutboundQueue<M> {
    direction: &'static str,
    tx: Option<mpsc::Sender<M>>,
    writer: JoinHandle<()>,
    rejected: u64,
}

impl<M: Send + 'static> OutboundQueue<M> {
    /// Spawns the writer task for `sink`.
    ///
    /// Once every sender is gone the writer flushes what is left and closes
    /// the sink, which sends the close frame to the peer.
    pub fn spawn<S>(mut sink: S, capacity: usize, direction: &'static str) -> Self
    where
        S: Sink<M> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let (tx, mut rx) = mpsc::channel::<M>(capacity.max(1));
        let writer = tokio::spawn(
            async move {
                while let Some(message) = rx.recv().await {
                    if let Err(e) = sink.send(message).await {
                        debug!(direction, error = %e, "Writer stopped");
                        return;
                    }
                }
                if let Err(e) = sink.close().await {
                    debug!(direction, error = %e, "Sink close failed");
                }
            }
            .in_current_span(),
        );
        Self {
            direction,
            tx: Some(tx),
            writer,
            rejected: 0,
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Enqueues without waiting.
    pub fn push(&mut self, message: M) -> Result<Pushed, QueueClosed> {
        let tx = self.tx.as_ref().ok_or(QueueClosed(self.direction))?;
        match tx.try_send(message) {
            Ok(()) => Ok(Pushed::Queued),
            Err(TrySendError::Full(_)) => {
                self.rejected += 1;
                Ok(Pushed::Rejected)
            }
            Err(TrySendError::Closed(_)) => Err(QueueClosed(self.direction)),
        }
    }

    /// Enqueues, waiting up to `limit` for room. Used for the relay's own
    /// envelopes, which must not be dropped.
    pub async fn push_within(&mut self, message: M, limit: Duration) -> Result<(), QueueClosed> {
        let tx = self.tx.as_ref().ok_or(QueueClosed(self.direction))?;
        match tx.send_timeout(message, limit).await {
            Ok(()) => Ok(()),
            Err(_) => Err(QueueClosed(self.direction)),
        }
    }

    /// Stops accepting frames and waits for the writer to flush and close
    /// the sink. Dropping the returned future aborts the writer.
    pub async fn finish(mut self) {
        self.tx = None;
        if let Err(e) = (&mut self.writer).await {
            if !e.is_cancelled() {
                debug!(direction = self.direction, error = %e, "Writer task failed");
            }
        }
    }
}

impl<M> Drop for OutboundQueue<M> {
    fn drop(&mut self) {
        self.writer.abort();
    }
}
