//! The seam between the session manager and a remote live audio model.
//!
//! A connector opens one bidirectional connection and hands back a sink for
//! outbound audio plus a channel of inbound events. Implementations live in
//! provider crates (see `gemini-live`); tests inject fakes.

use crate::{audio::RealtimeAudio, error::SessionError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Parameters the session supplies when opening a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSetup {
    /// Model identifier, e.g. `gemini-2.5-flash-native-audio-preview-12-2025`.
    pub model: String,
    /// Prebuilt voice used for synthesized replies.
    pub voice: String,
    /// System instruction defining the assistant persona.
    pub persona: String,
}

/// Content pushed by the model during a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerContent {
    /// Base64 PCM16 at 24 kHz, mono.
    pub audio: Option<String>,
    /// The model heard the user talk over playback.
    pub interrupted: bool,
}

/// Events a live connection reports back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The remote side finished its setup handshake.
    Opened,
    Content(ServerContent),
    /// The connection closed without an error.
    Closed,
    Error(String),
}

/// Outbound half of an open connection.
pub trait LiveSink: Send {
    /// Queues one audio chunk for transmission. Must not block.
    fn send_audio(&mut self, chunk: RealtimeAudio) -> Result<(), SessionError>;

    /// Closes the connection. Calling it more than once is harmless.
    fn close(&mut self);
}

/// An open connection as handed to the session manager.
pub struct LiveConnection {
    pub sink: Box<dyn LiveSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens live connections to a remote conversational model.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: &LiveSetup) -> Result<LiveConnection, SessionError>;
}
