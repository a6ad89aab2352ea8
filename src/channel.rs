//! Push-update channel: one supervised broker connection per [`PushChannel`].
//!
//! State machine:
//!
//! ```text
//! Idle -> Connecting -> Connected -> (Disconnected | Errored) -> Reconnecting -> Connecting ...
//! ```
//!
//! Reconnection is automatic and bounded by [`ChannelConfig::max_reconnect_attempts`].
//! Once the bound is hit the channel rests in `Disconnected` until `connect` is
//! called again. `disconnect` moves to `Stopped` from any state.

mod stomp;
mod transport;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ChannelConfig;
use crate::error::{CIPulseError, Result};
use crate::models::PushEnvelope;

pub use stomp::{Command, Frame};
pub use transport::{Connector, Link, WsConnector};

#[cfg(test)]
pub(crate) use transport::testing;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub type MessageHandler = Arc<dyn Fn(PushEnvelope) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&CIPulseError) + Send + Sync>;
pub type ConnectedHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Errored,
    Reconnecting { attempt: u32 },
    Stopped,
}

enum ChannelCommand {
    Subscribe(String),
}

struct RunHandle {
    stop: watch::Sender<bool>,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    _task: JoinHandle<()>,
}

struct Shared {
    state: ChannelState,
    // Bumped on every connect/disconnect; stale supervisors stop writing state.
    generation: u64,
    active: bool,
    run: Option<RunHandle>,
    on_connected: Option<ConnectedHandler>,
}

pub struct PushChannel {
    connector: Arc<dyn Connector>,
    config: Arc<ChannelConfig>,
    shared: Arc<Mutex<Shared>>,
}

impl PushChannel {
    pub fn new(connector: Arc<dyn Connector>, config: ChannelConfig) -> Self {
        Self {
            connector,
            config: Arc::new(config),
            shared: Arc::new(Mutex::new(Shared {
                state: ChannelState::Idle,
                generation: 0,
                active: false,
                run: None,
                on_connected: None,
            })),
        }
    }

    /// Starts the connection in the background and returns immediately.
    ///
    /// Does nothing while a connection is live or being (re)established.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, on_message: MessageHandler, on_error: Option<ErrorHandler>) {
        let mut shared = lock(&self.shared);
        if shared.active {
            debug!("Push channel already active ({:?}), ignoring connect", shared.state);
            return;
        }

        shared.generation += 1;
        shared.active = true;
        shared.state = ChannelState::Connecting;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor {
            connector: Arc::clone(&self.connector),
            config: Arc::clone(&self.config),
            shared: Arc::clone(&self.shared),
            generation: shared.generation,
            on_message,
            on_error,
            stop: stop_rx,
            commands: commands_rx,
            pipeline_topics: Vec::new(),
        };

        info!("Opening push channel to {}", self.config.endpoint);
        let task = tokio::spawn(supervisor.run());
        shared.run = Some(RunHandle {
            stop: stop_tx,
            commands: commands_tx,
            _task: task,
        });
    }

    /// Stops the connection and any pending reconnection. Idempotent.
    pub fn disconnect(&self) {
        let mut shared = lock(&self.shared);
        if shared.state == ChannelState::Stopped && shared.run.is_none() {
            return;
        }

        shared.generation += 1;
        shared.active = false;
        shared.state = ChannelState::Stopped;
        if let Some(run) = shared.run.take() {
            let _ = run.stop.send(true);
        }
        info!("Push channel stopped");
    }

    /// Called every time a session reaches `Connected`, reconnections included.
    pub fn set_connected_handler(&self, handler: ConnectedHandler) {
        lock(&self.shared).on_connected = Some(handler);
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared).state == ChannelState::Connected
    }

    pub fn state(&self) -> ChannelState {
        lock(&self.shared).state
    }

    /// Adds a per-pipeline subscription. Ignored unless currently connected.
    ///
    /// Accepted subscriptions are renewed on every automatic reconnection.
    pub fn subscribe_to_pipeline(&self, pipeline_id: u64) -> bool {
        let shared = lock(&self.shared);
        if shared.state != ChannelState::Connected {
            debug!("Not connected, ignoring subscription to pipeline {pipeline_id}");
            return false;
        }

        let topic = self.config.pipeline_topic(pipeline_id);
        shared
            .run
            .as_ref()
            .is_some_and(|run| run.commands.send(ChannelCommand::Subscribe(topic)).is_ok())
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

enum SessionEnd {
    Stopped,
    Closed,
    Failed(CIPulseError),
}

enum Event {
    Stop,
    Command(Option<ChannelCommand>),
    Inbound(Option<Result<String>>),
}

struct Supervisor {
    connector: Arc<dyn Connector>,
    config: Arc<ChannelConfig>,
    shared: Arc<Mutex<Shared>>,
    generation: u64,
    on_message: MessageHandler,
    on_error: Option<ErrorHandler>,
    stop: watch::Receiver<bool>,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    // Requested pipeline topics, in request order; outlive each session.
    pipeline_topics: Vec<String>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut attempts: u32 = 0;

        loop {
            self.transition(ChannelState::Connecting);

            let (state, err) = match self.session(&mut attempts).await {
                SessionEnd::Stopped => return,
                SessionEnd::Closed => (
                    ChannelState::Disconnected,
                    CIPulseError::Channel("connection closed by broker".to_string()),
                ),
                SessionEnd::Failed(e) => (ChannelState::Errored, e),
            };

            if !self.transition(state) {
                return;
            }
            warn!("Push channel lost: {err}");
            if let Some(on_error) = &self.on_error {
                on_error(&err);
            }

            if attempts >= self.config.max_reconnect_attempts {
                self.give_up(attempts);
                return;
            }

            attempts += 1;
            let delay = self.config.backoff_delay(attempts);
            if !self.transition(ChannelState::Reconnecting { attempt: attempts }) {
                return;
            }
            warn!(
                "Reconnecting push channel in {delay:?} (attempt {attempts}/{})",
                self.config.max_reconnect_attempts
            );

            tokio::select! {
                () = stopped(&mut self.stop) => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn session(&mut self, attempts: &mut u32) -> SessionEnd {
        let opened = tokio::select! {
            () = stopped(&mut self.stop) => return SessionEnd::Stopped,
            opened = self.connector.open(&self.config.endpoint) => opened,
        };
        let mut link = match opened {
            Ok(link) => link,
            Err(e) => return SessionEnd::Failed(e),
        };

        let handshake = tokio::select! {
            () = stopped(&mut self.stop) => {
                link.close().await;
                return SessionEnd::Stopped;
            }
            result = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&self.config, link.as_mut())) => result,
        };
        match handshake {
            Ok(Ok(())) => {}
            Ok(Err(end)) => {
                link.close().await;
                return end;
            }
            Err(_) => {
                link.close().await;
                return SessionEnd::Failed(CIPulseError::Channel(
                    "STOMP handshake timed out".to_string(),
                ));
            }
        }

        if !self.transition(ChannelState::Connected) {
            link.close().await;
            return SessionEnd::Stopped;
        }
        *attempts = 0;
        info!("Push channel connected, subscribed to {}", self.config.topic);
        self.notify_connected();

        self.serve(link.as_mut()).await
    }

    async fn serve(&mut self, link: &mut dyn Link) -> SessionEnd {
        let mut topics = HashSet::from([self.config.topic.clone()]);
        for topic in &self.pipeline_topics {
            if let Err(e) = subscribe(link, &mut topics, topic).await {
                return SessionEnd::Failed(e);
            }
        }

        loop {
            let event = tokio::select! {
                () = stopped(&mut self.stop) => Event::Stop,
                command = self.commands.recv() => Event::Command(command),
                inbound = link.next_text() => Event::Inbound(inbound),
            };

            match event {
                Event::Stop | Event::Command(None) => {
                    if let Err(e) = send_frame(link, &Frame::disconnect()).await {
                        debug!("Could not send DISCONNECT: {e}");
                    }
                    link.close().await;
                    return SessionEnd::Stopped;
                }
                Event::Command(Some(ChannelCommand::Subscribe(topic))) => {
                    if !self.pipeline_topics.contains(&topic) {
                        self.pipeline_topics.push(topic.clone());
                    }
                    if let Err(e) = subscribe(link, &mut topics, &topic).await {
                        return SessionEnd::Failed(e);
                    }
                }
                Event::Inbound(None) => return SessionEnd::Closed,
                Event::Inbound(Some(Err(e))) => return SessionEnd::Failed(e),
                Event::Inbound(Some(Ok(raw))) => {
                    if let Err(e) = self.dispatch(&raw, &topics) {
                        return SessionEnd::Failed(e);
                    }
                }
            }
        }
    }

    /// Malformed frames and envelopes are dropped here; only broker ERROR frames fail the session.
    fn dispatch(&self, raw: &str, topics: &HashSet<String>) -> Result<()> {
        let frame = match Frame::decode(raw) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("Dropping malformed STOMP frame: {e}");
                return Ok(());
            }
        };

        match frame.command {
            Command::Message => {}
            Command::Error => return Err(broker_error(&frame)),
            other => {
                debug!("Ignoring {other} frame");
                return Ok(());
            }
        }

        let destination = frame.get("destination").unwrap_or_default();
        if !topics.contains(destination) {
            debug!("Ignoring message for unsubscribed destination {destination}");
            return Ok(());
        }

        match serde_json::from_str::<PushEnvelope>(&frame.body) {
            Ok(envelope) => {
                if *self.stop.borrow() {
                    return Ok(());
                }
                debug!("Push envelope {} on {destination}", envelope.kind);
                (self.on_message)(envelope);
            }
            Err(e) => warn!("Dropping malformed push envelope on {destination}: {e}"),
        }
        Ok(())
    }

    /// Writes state unless a newer connect/disconnect has taken over.
    fn transition(&self, state: ChannelState) -> bool {
        let mut shared = lock(&self.shared);
        if shared.generation != self.generation {
            return false;
        }
        if shared.state != state {
            debug!("Push channel {:?} -> {state:?}", shared.state);
            shared.state = state;
        }
        true
    }

    fn notify_connected(&self) {
        let handler = {
            let shared = lock(&self.shared);
            if shared.generation != self.generation {
                return;
            }
            shared.on_connected.clone()
        };
        if let Some(handler) = handler {
            handler();
        }
    }

    fn give_up(&self, attempts: u32) {
        let mut shared = lock(&self.shared);
        if shared.generation != self.generation {
            return;
        }
        shared.state = ChannelState::Disconnected;
        shared.active = false;
        warn!("Push channel giving up after {attempts} reconnection attempts");
    }
}

async fn handshake(
    config: &ChannelConfig,
    link: &mut dyn Link,
) -> std::result::Result<(), SessionEnd> {
    let host = config.endpoint.host_str().unwrap_or("localhost");
    send_frame(link, &Frame::connect(host))
        .await
        .map_err(SessionEnd::Failed)?;

    loop {
        let raw = match link.next_text().await {
            None => {
                return Err(SessionEnd::Failed(CIPulseError::Channel(
                    "connection closed during STOMP handshake".to_string(),
                )))
            }
            Some(Err(e)) => return Err(SessionEnd::Failed(e)),
            Some(Ok(raw)) => raw,
        };

        match Frame::decode(&raw).map_err(SessionEnd::Failed)? {
            None => {}
            Some(frame) if frame.command == Command::Connected => break,
            Some(frame) if frame.command == Command::Error => {
                return Err(SessionEnd::Failed(broker_error(&frame)))
            }
            Some(frame) => {
                return Err(SessionEnd::Failed(CIPulseError::Channel(format!(
                    "Expected CONNECTED, broker sent {}",
                    frame.command
                ))))
            }
        }
    }

    send_frame(link, &Frame::subscribe("sub-0", &config.topic))
        .await
        .map_err(SessionEnd::Failed)?;
    send_frame(
        link,
        &Frame::send_json(&config.subscribe_destination, r#"{"action":"subscribe"}"#),
    )
    .await
    .map_err(SessionEnd::Failed)?;

    Ok(())
}

async fn subscribe(link: &mut dyn Link, topics: &mut HashSet<String>, topic: &str) -> Result<()> {
    if topics.contains(topic) {
        return Ok(());
    }
    let id = format!("sub-{}", topics.len());
    send_frame(link, &Frame::subscribe(&id, topic)).await?;
    debug!("Subscribed to {topic} as {id}");
    topics.insert(topic.to_string());
    Ok(())
}

async fn send_frame(link: &mut dyn Link, frame: &Frame) -> Result<()> {
    link.send_text(frame.encode()).await
}

fn broker_error(frame: &Frame) -> CIPulseError {
    let message = frame.get("message").unwrap_or("no message");
    CIPulseError::Channel(format!("Broker error: {message}"))
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}
