//! Session Driver
//!
//! A single task that owns the `SessionCoordinator`, the current relay link and
//! the in-flight issuance work. UI code talks to it through a `DriverHandle`:
//! commands go in over an mpsc channel, snapshots come out over a `watch`.

use crate::{
    audio::AudioLevelSettings,
    conversation::{Conversation, DEFAULT_VOLUME, MUTED_VOLUME},
    coordinator::{CoordinatorSnapshot, SessionCoordinator},
    event::{ConversationEvent, Generation, LinkStatus, Tagged},
    issuer_client::SessionIssuance,
    relay_client::{RelayClient, RelayLink},
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_tungstenite::tungstenite::Message;

const FRAME_CAPACITY: usize = 64;
const PAYLOAD_CAPACITY: usize = 256;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Requests the UI can make.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Start,
    End,
    Reset,
    SetMuted(bool),
}

#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    /// How often the conversation SDK is polled and the audio level re-sampled.
    pub poll_interval: Duration,
    /// Grace period for closing the relay link on end.
    pub close_grace: Duration,
    pub audio: AudioLevelSettings,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            close_grace: Duration::from_secs(2),
            audio: AudioLevelSettings::default(),
        }
    }
}

/// Internal results of spawned session work.
#[derive(Debug)]
enum Progress {
    Issued(String),
    Linked(RelayLink),
    Started(String),
    Failed(String),
    Relay(ConversationEvent),
}

/// Handle held by the UI.
#[derive(Clone)]
pub struct DriverHandle {
    commands: mpsc::Sender<Command>,
    frames: mpsc::Sender<Message>,
    snapshots: watch::Receiver<CoordinatorSnapshot>,
    payloads: broadcast::Sender<Message>,
}

impl DriverHandle {
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Queues a frame for the current relay link. Frames sent while no link
    /// is open are discarded.
    pub async fn send_frame(&self, frame: Message) -> bool {
        self.frames.send(frame).await.is_ok()
    }

    /// Opaque provider frames from the current relay link. A subscriber that
    /// falls behind skips frames rather than holding the link up.
    pub fn payloads(&self) -> broadcast::Receiver<Message> {
        self.payloads.subscribe()
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorSnapshot> {
        self.snapshots.clone()
    }
}

pub struct SessionDriver<C: ?Sized, I: ?Sized> {
    coordinator: SessionCoordinator,
    conversation: Arc<C>,
    issuer: Arc<I>,
    relay: RelayClient,
    settings: DriverSettings,
    link: Option<RelayLink>,
    progress_tx: mpsc::Sender<Tagged<Progress>>,
    progress_rx: mpsc::Receiver<Tagged<Progress>>,
    relay_tx: mpsc::Sender<Tagged<ConversationEvent>>,
    relay_rx: mpsc::Receiver<Tagged<ConversationEvent>>,
    payloads: broadcast::Sender<Message>,
    snapshots: watch::Sender<CoordinatorSnapshot>,
}

impl<C, I> SessionDriver<C, I>
where
    C: Conversation + ?Sized + 'static,
    I: SessionIssuance + ?Sized + 'static,
{
    /// Spawns the driver task and returns the handle plus its join handle.
    pub fn spawn(
        conversation: Arc<C>,
        issuer: Arc<I>,
        relay: RelayClient,
        settings: DriverSettings,
    ) -> (DriverHandle, JoinHandle<()>) {
        let coordinator = SessionCoordinator::new(settings.audio);
        let (snapshots, snapshot_rx) =
            watch::channel(coordinator.snapshot(std::time::Instant::now()));
        let (command_tx, command_rx) = mpsc::channel(16);
        let (progress_tx, progress_rx) = mpsc::channel(16);
        let (relay_tx, relay_rx) = mpsc::channel(256);
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CAPACITY);
        let (payloads, _) = broadcast::channel(PAYLOAD_CAPACITY);

        let driver = Self {
            coordinator,
            conversation,
            issuer,
            relay,
            settings,
            link: None,
            progress_tx,
            progress_rx,
            relay_tx,
            relay_rx,
            payloads: payloads.clone(),
            snapshots,
        };
        let handle = tokio::spawn(
            driver
                .run(command_rx, frame_rx)
                .instrument(info_span!("session_driver")),
        );

        (
            DriverHandle {
                commands: command_tx,
                frames: frame_tx,
                snapshots: snapshot_rx,
                payloads,
            },
            handle,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut frames: mpsc::Receiver<Message>,
    ) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.settings.poll_interval,
            self.settings.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(frame) = frames.recv() => self.forward_frame(frame).await,
                Some(progress) = self.progress_rx.recv() => self.handle_progress(progress).await,
                Some(event) = self.relay_rx.recv() => {
                    let generation = event.generation;
                    self.handle_progress(Tagged::new(generation, Progress::Relay(event.event))).await;
                },
                _ = ticker.tick() => {
                    self.coordinator.observe_conversation(
                        self.conversation.status(),
                        self.conversation.is_speaking(),
                    );
                    self.publish();
                },
            }
        }

        self.end().await;
        info!("Session driver stopped.");
    }

    async fn handle_command(&mut self, command: Command) {
        debug!(?command, "Handling command");
        match command {
            Command::Start => self.start(),
            Command::End => self.end().await,
            Command::Reset => {
                self.end().await;
                self.coordinator.reset();
            }
            Command::SetMuted(muted) => {
                let volume = if muted { MUTED_VOLUME } else { DEFAULT_VOLUME };
                if let Err(e) = self.conversation.set_volume(volume).await {
                    warn!(error = ?e, "Failed to set volume");
                }
            }
        }
        self.publish();
    }

    /// Allocates a new generation and kicks off the signed URL request.
    fn start(&mut self) {
        // Dropping the old link aborts its socket task before the new attempt begins.
        self.link.take();
        let generation = self.coordinator.begin_session();
        info!(generation, "Starting voice session");

        let issuer = self.issuer.clone();
        let progress = self.progress_tx.clone();
        tokio::spawn(async move {
            let outcome = match issuer.request_signed_url().await {
                Ok(signed) => Progress::Issued(signed.signed_url),
                Err(e) => Progress::Failed(e.to_string()),
            };
            let _ = progress.send(Tagged::new(generation, outcome)).await;
        });
    }

    async fn end(&mut self) {
        let conversation_id = self
            .coordinator
            .session()
            .and_then(|s| s.conversation_id.clone());
        let Some(generation) = self.coordinator.end_session() else {
            return;
        };
        info!(generation, "Ending voice session");

        if let Some(link) = self.link.take() {
            link.close(self.settings.close_grace).await;
        }
        // The session counts as ended locally whatever the SDK or provider say.
        self.end_conversation(conversation_id).await;
    }

    async fn handle_progress(&mut self, progress: Tagged<Progress>) {
        let Tagged { generation, event } = progress;
        if generation != self.coordinator.generation() {
            debug!(generation, "Discarding progress from superseded session");
            return;
        }

        match event {
            Progress::Issued(signed_url) => {
                if !self.coordinator.is_live() {
                    debug!(generation, "Session over before issuance finished; not connecting");
                } else if self
                    .coordinator
                    .attach_signed_url(generation, signed_url.clone())
                    .is_ok()
                {
                    self.open_link(generation, signed_url);
                }
            }
            Progress::Linked(mut link) => {
                if self.coordinator.is_live() {
                    self.forward_payloads(&mut link);
                    self.link = Some(link);
                } else {
                    debug!(generation, "Session over before relay opened; closing link");
                    link.close(self.settings.close_grace).await;
                }
            }
            Progress::Started(conversation_id) => {
                let live = self.coordinator.is_live();
                let _ = self
                    .coordinator
                    .attach_conversation_id(generation, conversation_id.clone());
                if !live {
                    debug!(generation, "Session over before conversation started; ending it");
                    self.end_conversation(Some(conversation_id)).await;
                }
            }
            Progress::Failed(message) => {
                error!(generation, %message, "Voice session failed");
                self.apply(generation, ConversationEvent::error(message));
            }
            Progress::Relay(event) => {
                let relay_closed = matches!(
                    event,
                    ConversationEvent::ConnectionStatus {
                        status: LinkStatus::Disconnected,
                        ..
                    }
                );
                self.apply(generation, event);
                // A user end already released everything.
                if relay_closed && !self.coordinator.is_user_closed() {
                    info!(generation, "Relay terminated; releasing session");
                    self.link.take();
                    self.end_conversation(None).await;
                }
            }
        }
        self.publish();
    }

    /// Ends the SDK session and, given an id, the provider conversation. Best effort.
    async fn end_conversation(&self, conversation_id: Option<String>) {
        if let Err(e) = self.conversation.end_session().await {
            warn!(error = ?e, "Conversation SDK failed to end session");
        }
        if let Some(conversation_id) = conversation_id {
            let issuer = self.issuer.clone();
            tokio::spawn(async move {
                if let Err(e) = issuer.end_session(&conversation_id).await {
                    warn!(%conversation_id, error = %e, "Upstream session termination failed");
                }
            });
        }
    }

    /// Republishes the link's provider frames to `DriverHandle::payloads`
    /// subscribers until the link goes away.
    fn forward_payloads(&self, link: &mut RelayLink) {
        let Some(mut frames) = link.take_payloads() else {
            return;
        };
        let payloads = self.payloads.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                // No subscribers is fine: the frame is simply dropped.
                let _ = payloads.send(frame);
            }
        });
    }

    async fn forward_frame(&self, frame: Message) {
        match &self.link {
            Some(link) => {
                if let Err(e) = link.send(frame).await {
                    debug!(error = %e, "Relay link rejected frame");
                }
            }
            None => debug!("No relay link; dropping frame"),
        }
    }

    fn open_link(&self, generation: Generation, signed_url: String) {
        let relay = self.relay.clone();
        let conversation = self.conversation.clone();
        let progress = self.progress_tx.clone();
        let relay_events = self.relay_tx.clone();
        tokio::spawn(async move {
            let link = match relay.connect(generation, &signed_url, relay_events).await {
                Ok(link) => link,
                Err(e) => {
                    let _ = progress
                        .send(Tagged::new(generation, Progress::Failed(e.to_string())))
                        .await;
                    return;
                }
            };
            if progress
                .send(Tagged::new(generation, Progress::Linked(link)))
                .await
                .is_err()
            {
                return;
            }
            let outcome = match conversation.start_session(&signed_url).await {
                Ok(conversation_id) => Progress::Started(conversation_id),
                Err(e) => Progress::Failed(format!("Conversation failed to start: {e}")),
            };
            let _ = progress.send(Tagged::new(generation, outcome)).await;
        });
    }

    fn apply(&mut self, generation: Generation, event: ConversationEvent) {
        let _ = self
            .coordinator
            .apply(Tagged::new(generation, event), std::time::Instant::now());
    }

    fn publish(&self) {
        let snapshot = self.coordinator.snapshot(std::time::Instant::now());
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
