use super::{meter::VolumeMeter, playback::PlaybackScheduler};
use crate::{
    audio::{self, CAPTURE_CHUNK_SIZE, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE, RealtimeAudio},
    config::AssistantConfig,
    device::{AudioBackend, CaptureFormat, InputStream, OutputStream, PlaybackId},
    error::SessionError,
    transport::{LiveConnector, LiveSetup, LiveSink, ServerContent, TransportEvent},
};
use serde::Serialize;
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

/// What observers of the session see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub error: Option<String>,
    pub volume: f32,
}

/// Identifies one `start()`..`stop()` lifetime. Events tagged with an older
/// generation are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Generation(u64);

/// Everything that can happen to a running session.
pub enum SessionEvent {
    TransportOpened,
    /// A chunk of microphone samples at 16 kHz.
    Capture(Vec<f32>),
    Content(ServerContent),
    PlaybackEnded(PlaybackId),
    TransportClosed,
    TransportError(String),
    /// The connection did not confirm setup in time.
    OpenTimedOut,
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::TransportOpened => write!(f, "TransportOpened"),
            SessionEvent::Capture(samples) => write!(f, "Capture({} samples)", samples.len()),
            SessionEvent::Content(content) => write!(
                f,
                "Content(audio: {}, interrupted: {})",
                content.audio.as_ref().map_or(0, String::len),
                content.interrupted
            ),
            SessionEvent::PlaybackEnded(id) => write!(f, "PlaybackEnded({})", id.0),
            SessionEvent::TransportClosed => write!(f, "TransportClosed"),
            SessionEvent::TransportError(message) => write!(f, "TransportError({message})"),
            SessionEvent::OpenTimedOut => write!(f, "OpenTimedOut"),
        }
    }
}

impl From<TransportEvent> for SessionEvent {
    fn from(event: TransportEvent) -> Self {
        match event {
            TransportEvent::Opened => SessionEvent::TransportOpened,
            TransportEvent::Content(content) => SessionEvent::Content(content),
            TransportEvent::Closed => SessionEvent::TransportClosed,
            TransportEvent::Error(message) => SessionEvent::TransportError(message),
        }
    }
}

/// Settings for a live session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub live: LiveSetup,
    /// Upper bound for connecting and for the setup handshake to complete.
    pub connect_timeout: Duration,
}

impl From<&AssistantConfig> for SessionConfig {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            live: LiveSetup {
                model: config.live_model.clone(),
                voice: config.live_voice.clone(),
                persona: config.live_persona.clone(),
            },
            connect_timeout: config.connect_timeout,
        }
    }
}

/// Owns one bidirectional audio session with a remote model.
///
/// `start` acquires the speaker, the microphone and the connection, then
/// hands off to a driver task that feeds every callback (capture chunks,
/// transport events, finished playbacks) through [`LiveSessionManager::dispatch`].
pub struct LiveSessionManager {
    shared: Arc<Shared>,
    connector: Arc<dyn LiveConnector>,
    audio: Arc<dyn AudioBackend>,
    config: SessionConfig,
}

struct Shared {
    inner: Mutex<Inner>,
    snapshot: watch::Sender<SessionSnapshot>,
}

struct Inner {
    state: SessionState,
    error: Option<String>,
    generation: u64,
    live: bool,
    sink: Option<Box<dyn LiveSink>>,
    input: Option<Box<dyn InputStream>>,
    output: Option<Box<dyn OutputStream>>,
    scheduler: PlaybackScheduler,
    meter: VolumeMeter,
    driver: Option<JoinHandle<()>>,
}

impl LiveSessionManager {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        audio: Arc<dyn AudioBackend>,
        config: SessionConfig,
    ) -> Self {
        let inner = Inner {
            state: SessionState::Idle,
            error: None,
            generation: 0,
            live: false,
            sink: None,
            input: None,
            output: None,
            scheduler: PlaybackScheduler::new(),
            meter: VolumeMeter::new(),
            driver: None,
        };
        let (snapshot, _) = watch::channel(inner.snapshot());
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                snapshot,
            }),
            connector,
            audio,
            config,
        }
    }

    /// Starts a session. Does nothing unless the session is idle.
    ///
    /// Returns once devices and the connection are acquired; the session
    /// turns active when the remote side confirms setup. Failures leave the
    /// session in [`SessionState::Error`] and are also returned.
    pub async fn start(&self) -> Result<(), SessionError> {
        let generation = {
            let mut inner = self.shared.lock();
            if inner.state != SessionState::Idle {
                debug!(state = %inner.state, "Ignoring start request, session not idle.");
                return Ok(());
            }
            inner.generation += 1;
            inner.live = true;
            inner.state = SessionState::Connecting;
            inner.error = None;
            if let Some(stale) = inner.driver.take() {
                stale.abort();
            }
            self.shared.publish(&inner);
            Generation(inner.generation)
        };
        info!(generation = generation.0, model = %self.config.live.model, "Starting live audio session.");

        if let Err(e) = self.acquire(generation).await {
            let mut inner = self.shared.lock();
            if inner.is_live(generation) {
                inner.fail(e.clone());
                self.shared.publish(&inner);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn acquire(&self, generation: Generation) -> Result<(), SessionError> {
        // One deadline for connecting and for the setup confirmation.
        let open_deadline = Instant::now() + self.config.connect_timeout;
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let audio = Arc::clone(&self.audio);
        let output = tokio::task::spawn_blocking(move || {
            audio.open_output(PLAYBACK_SAMPLE_RATE, ended_tx)
        })
        .await
        .map_err(|e| SessionError::Device(format!("output open task failed: {e}")))??;
        {
            let mut inner = self.shared.lock();
            if !inner.is_live(generation) {
                drop(inner);
                close_output(output);
                return Ok(());
            }
            inner.scheduler = PlaybackScheduler::new();
            inner.output = Some(output);
        }

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let format = CaptureFormat {
            sample_rate: CAPTURE_SAMPLE_RATE,
            chunk_size: CAPTURE_CHUNK_SIZE,
        };
        let audio = Arc::clone(&self.audio);
        let input = tokio::task::spawn_blocking(move || audio.open_input(format, chunk_tx))
            .await
            .map_err(|e| SessionError::Permission(format!("microphone open task failed: {e}")))??;
        {
            let mut inner = self.shared.lock();
            if !inner.is_live(generation) {
                drop(inner);
                stop_input(input);
                return Ok(());
            }
            inner.input = Some(input);
        }

        let connection = tokio::time::timeout_at(
            open_deadline,
            self.connector.connect(&self.config.live),
        )
        .await
        .map_err(|_| SessionError::Transport("timed out opening the connection".to_string()))??;

        let mut sink = connection.sink;
        {
            let mut inner = self.shared.lock();
            if !inner.is_live(generation) {
                drop(inner);
                sink.close();
                return Ok(());
            }
            inner.sink = Some(sink);
        }

        let driver = tokio::spawn(drive(
            Arc::clone(&self.shared),
            generation,
            connection.events,
            chunk_rx,
            ended_rx,
            open_deadline,
        ));
        let mut inner = self.shared.lock();
        if inner.is_live(generation) {
            inner.driver = Some(driver);
        } else {
            driver.abort();
        }
        Ok(())
    }

    /// Tears the session down. Safe to call in any state and more than once.
    /// An error state is kept until [`LiveSessionManager::retry`].
    pub fn stop(&self) {
        let driver = {
            let mut inner = self.shared.lock();
            if inner.live {
                info!(generation = inner.generation, "Stopping live audio session.");
            }
            inner.shutdown();
            self.shared.publish(&inner);
            inner.driver.take()
        };
        if let Some(driver) = driver {
            driver.abort();
        }
    }

    /// Leaves the error state so a new session can start. Returns whether a
    /// transition happened.
    pub fn retry(&self) -> bool {
        let mut inner = self.shared.lock();
        if inner.state != SessionState::Error {
            debug!(state = %inner.state, "Ignoring retry outside the error state.");
            return false;
        }
        inner.state = SessionState::Idle;
        inner.error = None;
        self.shared.publish(&inner);
        true
    }

    /// Feeds one event into the state machine. Events from a generation that
    /// is no longer live are dropped. Returns whether the generation is still
    /// live afterwards.
    pub fn dispatch(&self, generation: Generation, event: SessionEvent) -> bool {
        self.shared.dispatch(generation, event)
    }

    /// The generation of the most recent `start`.
    pub fn generation(&self) -> Generation {
        Generation(self.shared.lock().generation)
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn error_message(&self) -> Option<String> {
        self.shared.lock().error.clone()
    }

    pub fn volume(&self) -> f32 {
        self.shared.lock().meter.level()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock().snapshot()
    }

    /// Receives a new snapshot on every state, error or volume change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Where the next inbound frame would start on the output clock.
    pub fn next_start(&self) -> f64 {
        self.shared.lock().scheduler.next_start()
    }

    /// Number of frames scheduled and not yet finished.
    pub fn queued_frames(&self) -> usize {
        self.shared.lock().scheduler.len()
    }
}

impl Drop for LiveSessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.snapshot.send_if_modified(|current| {
            let next = inner.snapshot();
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn dispatch(&self, generation: Generation, event: SessionEvent) -> bool {
        let mut inner = self.lock();
        let live = inner.apply(generation, event);
        self.publish(&inner);
        live
    }
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            error: self.error.clone(),
            volume: self.meter.level(),
        }
    }

    fn is_live(&self, generation: Generation) -> bool {
        self.live && self.generation == generation.0
    }

    fn apply(&mut self, generation: Generation, event: SessionEvent) -> bool {
        if !self.is_live(generation) {
            trace!(generation = generation.0, ?event, "Dropping event from a stale session.");
            return false;
        }
        match event {
            SessionEvent::TransportOpened => {
                if self.state == SessionState::Connecting {
                    info!(generation = generation.0, "Live session open, streaming audio.");
                    self.state = SessionState::Active;
                }
            }
            SessionEvent::Capture(samples) => self.transmit(&samples),
            SessionEvent::Content(content) => {
                if let Some(payload) = content.audio.filter(|p| !p.is_empty()) {
                    self.enqueue(&payload);
                }
                if content.interrupted {
                    self.interrupt();
                }
            }
            SessionEvent::PlaybackEnded(id) => {
                self.scheduler.complete(id);
            }
            SessionEvent::TransportClosed => {
                info!(generation = generation.0, "Live connection closed by remote.");
                self.shutdown();
            }
            SessionEvent::TransportError(message) => self.fail(SessionError::Transport(message)),
            SessionEvent::OpenTimedOut => {
                if self.state == SessionState::Connecting {
                    self.fail(SessionError::Transport(
                        "timed out waiting for the session to open".to_string(),
                    ));
                }
            }
        }
        self.live
    }

    fn transmit(&mut self, samples: &[f32]) {
        if self.state != SessionState::Active {
            trace!(len = samples.len(), "Dropping capture chunk, session not active.");
            return;
        }
        self.meter.update(samples);
        if let Some(sink) = self.sink.as_mut() {
            let chunk = RealtimeAudio::pcm16(samples, CAPTURE_SAMPLE_RATE);
            if let Err(e) = sink.send_audio(chunk) {
                warn!(error = %e, "Dropping capture chunk, send failed.");
            }
        }
    }

    fn enqueue(&mut self, payload: &str) {
        let frame = match audio::decode_pcm16(payload, 1, PLAYBACK_SAMPLE_RATE) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(error = %e, "Dropping inbound audio frame.");
                return;
            }
        };
        let Some(output) = self.output.as_mut() else {
            return;
        };
        let entry = self.scheduler.schedule(output.current_time(), frame);
        trace!(id = entry.id.0, start_at = entry.start_at, duration = entry.frame.duration(), "Scheduled playback.");
        if let Err(e) = output.schedule(entry.id, Arc::clone(&entry.frame), entry.start_at) {
            warn!(error = %e, "Output rejected frame.");
            self.scheduler.complete(entry.id);
        }
    }

    fn interrupt(&mut self) {
        let flushed = self.scheduler.flush();
        debug!(count = flushed.len(), "Interrupted, discarding queued playback.");
        if let Some(output) = self.output.as_mut() {
            for id in flushed {
                output.cancel(id);
            }
        }
    }

    /// Ends the session without touching an error state.
    fn shutdown(&mut self) {
        self.live = false;
        self.release();
        if self.state != SessionState::Error {
            self.state = SessionState::Idle;
        }
    }

    fn fail(&mut self, error: SessionError) {
        error!(error = %error, "Live audio session failed.");
        self.live = false;
        self.release();
        self.state = SessionState::Error;
        self.error = Some(error.to_string());
    }

    /// Releases every resource. Errors here are expected in teardown races.
    fn release(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }
        let flushed = self.scheduler.flush();
        if let Some(mut output) = self.output.take() {
            for id in flushed {
                output.cancel(id);
            }
            close_output(output);
        }
        if let Some(input) = self.input.take() {
            stop_input(input);
        }
        self.meter.reset();
    }
}

fn close_output(mut output: Box<dyn OutputStream>) {
    if let Err(e) = output.close() {
        debug!(error = %e, "Ignoring error while closing output.");
    }
}

fn stop_input(mut input: Box<dyn InputStream>) {
    if let Err(e) = input.stop() {
        debug!(error = %e, "Ignoring error while stopping input.");
    }
}

/// Forwards every callback source of one session into the state machine
/// until the session stops being live.
async fn drive(
    shared: Arc<Shared>,
    generation: Generation,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut chunks: mpsc::UnboundedReceiver<Vec<f32>>,
    mut ended: mpsc::UnboundedReceiver<PlaybackId>,
    open_deadline: Instant,
) {
    let open_deadline = tokio::time::sleep_until(open_deadline);
    tokio::pin!(open_deadline);
    let mut opened = false;

    loop {
        let event = tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => SessionEvent::from(event),
                None => SessionEvent::TransportClosed,
            },
            Some(id) = ended.recv() => SessionEvent::PlaybackEnded(id),
            Some(chunk) = chunks.recv() => SessionEvent::Capture(chunk),
            _ = &mut open_deadline, if !opened => SessionEvent::OpenTimedOut,
        };
        if matches!(event, SessionEvent::TransportOpened) {
            opened = true;
        }
        if !shared.dispatch(generation, event) {
            break;
        }
    }
    debug!(generation = generation.0, "Session driver finished.");
}
