//! Sessions: one logical connection to a flight controller (or a replay of
//! one), from connect to the terminal `Disconnected` event.
//!
//! A [`Session`] owns the shared ingest path ([`SessionCore`]) and a single
//! I/O task. The live channel and the replay channel both push received
//! bytes through [`SessionCore::ingest`]: throughput meter, recorder,
//! protocol detector, request dispatcher, then subscribers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;

use crate::config::SessionConfig;
use crate::dispatcher::RequestDispatcher;
use crate::error::Result;
use crate::events::{
    spawn_callback_queue, CallbackQueue, EventBus, EventKind, SessionEvent, Subscription,
};
use crate::handshake::{handshake, DeviceInfo};
use crate::meter::ThroughputMeter;
use crate::protocol::{Detection, MavlinkEncoder, MavlinkVersion, ProtocolDetector};
use crate::replay::engine::ReplayChannel;
use crate::replay::{FlightStats, Recorder, ReplayReader, SessionMetadata};
use crate::transport::channel::LiveChannel;
use crate::transport::{connect_link, ChannelKind, Connector};
use crate::writer::OutputQueue;

type EventHandler = Box<dyn Fn(&SessionEvent) + Send + Sync + 'static>;

/// State shared between a session handle and its I/O task.
pub(crate) struct SessionCore {
    kind: ChannelKind,
    pub(crate) dispatcher: RequestDispatcher,
    pub(crate) events: EventBus<SessionEvent>,
    meter: ThroughputMeter,
    detector: Mutex<ProtocolDetector>,
    connected: AtomicBool,
    torn_down: AtomicBool,
    recorder: Option<Recorder>,
}

impl SessionCore {
    fn new(
        kind: ChannelKind,
        config: &SessionConfig,
        callbacks: CallbackQueue,
        mavlink: MavlinkEncoder,
        recorder: Option<Recorder>,
    ) -> Self {
        Self {
            kind,
            dispatcher: RequestDispatcher::with_mavlink_encoder(
                OutputQueue::new(),
                callbacks.clone(),
                config.request_timeout(),
                mavlink,
            ),
            events: EventBus::new(callbacks),
            meter: ThroughputMeter::with_window(config.meter_capacity, config.meter_window()),
            detector: Mutex::new(ProtocolDetector::new()),
            connected: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            recorder,
        }
    }

    /// Handle one chunk of received bytes.
    pub(crate) fn ingest(&self, data: &[u8]) {
        self.meter.received(data.len());
        if let Some(recorder) = &self.recorder {
            recorder.record(data);
        }

        let (detected, frames) = {
            let mut detector = self.detector.lock().unwrap_or_else(PoisonError::into_inner);
            let before = detector.detection();
            let frames = detector.feed(data);
            let after = detector.detection();
            ((before != after).then_some(after), frames)
        };

        if let Some(detection) = detected {
            tracing::info!(protocol = ?detection, "protocol detected");
            self.events.publish(SessionEvent::ProtocolDetected(detection));
        }

        for frame in frames {
            self.dispatcher.on_frame(&frame);
            self.events.publish(SessionEvent::FrameReceived(frame));
        }
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Discard partially received frames; the detected protocol is kept.
    pub(crate) fn reset_partial_frames(&self) {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset_partial();
    }

    fn detection(&self) -> Detection {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detection()
    }

    /// End the session. Only the first call has any effect.
    pub(crate) async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_connected(false);
        self.dispatcher.close();

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.finish().await {
                tracing::warn!(error = %e, "failed to finish recording");
            }
        }

        tracing::debug!(kind = ?self.kind, "session disconnected");
        self.events.publish(SessionEvent::Disconnected);
    }
}

/// Builder for configuring and opening a [`Session`].
///
/// Handlers registered with [`SessionBuilder::on`] are in place before the
/// first event is published, so they observe `Connected`.
pub struct SessionBuilder {
    config: SessionConfig,
    recording: Option<PathBuf>,
    aircraft_data: Bytes,
    mavlink: MavlinkEncoder,
    handlers: Vec<(EventKind, EventHandler)>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            recording: None,
            aircraft_data: Bytes::new(),
            mavlink: MavlinkEncoder::new(MavlinkVersion::V2),
            handlers: Vec::new(),
        }
    }

    /// Replace every tunable at once.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Reply timeout per request attempt.
    ///
    /// Default: 500 ms
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Bound on each connect attempt.
    ///
    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Force reconnecting on or off. Unset, Bluetooth reconnects and TCP does not.
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.config.reconnect = Some(enabled);
        self
    }

    /// Delay before each reconnect attempt.
    ///
    /// Default: 1 second
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Record every received chunk of a live session to `path`.
    pub fn record_to(mut self, path: impl AsRef<Path>) -> Self {
        self.recording = Some(path.as_ref().to_path_buf());
        self
    }

    /// Aircraft blob stored in the recording header.
    pub fn aircraft_data(mut self, data: impl Into<Bytes>) -> Self {
        self.aircraft_data = data.into();
        self
    }

    /// MAVLink version and ids used for outbound MAVLink messages.
    ///
    /// Default: v2, system 255, component 190
    pub fn mavlink(mut self, version: MavlinkVersion, system_id: u8, component_id: u8) -> Self {
        self.mavlink = MavlinkEncoder::with_ids(version, system_id, component_id);
        self
    }

    /// Register a handler for the session's lifetime.
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.handlers.push((kind, Box::new(handler)));
        self
    }

    /// Connect through `connector` and start the I/O task.
    ///
    /// A failed first connect is returned as an error without retrying.
    pub async fn connect<C: Connector>(self, connector: C) -> Result<Session> {
        self.connect_shared(Arc::new(connector)).await
    }

    pub async fn connect_shared(self, connector: Arc<dyn Connector>) -> Result<Session> {
        let kind = connector.kind();
        let link = connect_link(connector.as_ref(), self.config.connect_timeout()).await?;

        let recorder = match &self.recording {
            Some(path) => Some(Recorder::create(path, &self.aircraft_data).await?),
            None => None,
        };

        let policy = self.config.reconnect_policy(kind);
        let connect_timeout = self.config.connect_timeout();
        let read_buffer_size = self.config.read_buffer_size;
        let (session, close_rx, done_tx) = self.start(kind, recorder);

        tracing::info!(?kind, "connected");
        let channel = LiveChannel {
            core: session.core.clone(),
            connector,
            policy,
            connect_timeout,
            read_buffer_size,
            close_rx,
        };
        tokio::spawn(async move {
            channel.run(link).await;
            let _ = done_tx.send(true);
        });

        Ok(session)
    }

    /// Open `path` and replay it through a new session.
    pub async fn replay(self, path: impl AsRef<Path>) -> Result<(Session, SessionMetadata)> {
        let path = path.as_ref();
        let (reader, metadata) = ReplayReader::open(path).await?;
        if self.recording.is_some() {
            tracing::debug!("recording is ignored for replay sessions");
        }

        let (session, close_rx, done_tx) = self.start(ChannelKind::Replay, None);

        tracing::info!(path = %path.display(), format = ?metadata.format, "replaying");
        let channel = ReplayChannel {
            core: session.core.clone(),
            reader,
            close_rx,
        };
        tokio::spawn(async move {
            channel.run().await;
            let _ = done_tx.send(true);
        });

        Ok((session, metadata))
    }

    fn start(
        self,
        kind: ChannelKind,
        recorder: Option<Recorder>,
    ) -> (Session, watch::Receiver<bool>, watch::Sender<bool>) {
        let (callbacks, _callback_task) = spawn_callback_queue();
        let core = Arc::new(SessionCore::new(
            kind,
            &self.config,
            callbacks,
            self.mavlink,
            recorder,
        ));

        for (event_kind, handler) in self.handlers {
            core.events.subscribe(event_kind, handler).detach();
        }

        core.set_connected(true);
        core.events.publish(SessionEvent::Connected(kind));

        let (close_tx, close_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let session = Session {
            core,
            close_tx,
            done_rx,
        };
        (session, close_rx, done_tx)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running session.
///
/// Dropping the handle closes the session.
pub struct Session {
    core: Arc<SessionCore>,
    close_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Connect with default configuration.
    pub async fn connect<C: Connector>(connector: C) -> Result<Session> {
        SessionBuilder::new().connect(connector).await
    }

    /// Replay a recorded file with default configuration.
    pub async fn open_replay(path: impl AsRef<Path>) -> Result<(Session, SessionMetadata)> {
        SessionBuilder::new().replay(path).await
    }

    /// Send an MSP request; `on_complete` runs once with the outcome.
    ///
    /// The callback is not invoked when this returns an error.
    pub fn send_message<F>(
        &self,
        code: u8,
        payload: &[u8],
        retries: u32,
        on_complete: F,
    ) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.core.dispatcher.send(code, payload, retries, on_complete)
    }

    /// Send an MSP message without waiting for a reply.
    pub fn post(&self, code: u8, payload: &[u8]) -> Result<()> {
        self.core.dispatcher.post(code, payload)
    }

    /// Send an MSP request and wait for the reply payload.
    pub async fn request(&self, code: u8, payload: &[u8], retries: u32) -> Result<Bytes> {
        self.core.dispatcher.request(code, payload, retries).await
    }

    pub fn post_mavlink(&self, message_id: u32, payload: &[u8]) -> Result<()> {
        self.core.dispatcher.post_mavlink(message_id, payload)
    }

    pub async fn request_mavlink(
        &self,
        message_id: u32,
        payload: &[u8],
        reply_id: u32,
        retries: u32,
    ) -> Result<Bytes> {
        self.core
            .dispatcher
            .request_mavlink(message_id, payload, reply_id, retries)
            .await
    }

    /// Run the opening MSP exchange and describe the flight controller.
    pub async fn handshake(&self) -> Result<DeviceInfo> {
        handshake(&self.core.dispatcher).await
    }

    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.core.events.subscribe(kind, handler)
    }

    /// Bytes received over the meter window, per second.
    pub fn current_throughput(&self) -> u64 {
        self.core.meter.bytes_per_second()
    }

    pub fn protocol(&self) -> Detection {
        self.core.detection()
    }

    pub fn kind(&self) -> ChannelKind {
        self.core.kind
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// Statistics written to the recording header when the session ends.
    pub fn set_flight_stats(&self, stats: FlightStats) {
        match &self.core.recorder {
            Some(recorder) => recorder.set_stats(stats),
            None => tracing::debug!("flight stats ignored, session is not recording"),
        }
    }

    /// Close the session and wait until it is torn down.
    pub async fn close(&self) {
        let _ = self.close_tx.send(true);
        self.wait_closed().await;
    }

    /// Wait until the session ends on its own (replay end, give-up) or is closed.
    pub async fn wait_closed(&self) {
        let mut done = self.done_rx.clone();
        let _ = done.wait_for(|done| *done).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close_tx.send(true);
    }
}
