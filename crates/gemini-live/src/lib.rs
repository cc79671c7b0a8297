//! Gemini Live transport for the voice session.
//!
//! One WebSocket per session. After the `setup` message the connection is
//! split into a writer task, fed through an unbounded channel by
//! [`GeminiLiveSink`], and a reader task translating server messages into
//! [`TransportEvent`]s.

use aijaz_core::{
    SessionError,
    audio::RealtimeAudio,
    transport::{LiveConnection, LiveConnector, LiveSetup, LiveSink, ServerContent, TransportEvent},
};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const LOG_EXCERPT_CHARS: usize = 120;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// --- Wire types ---
mod wire {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) enum ClientMessage {
        Setup(Setup),
        RealtimeInput(RealtimeInput),
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Setup {
        pub model: String,
        pub generation_config: GenerationConfig,
        pub system_instruction: Content,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct GenerationConfig {
        pub response_modalities: Vec<ResponseModality>,
        pub speech_config: SpeechConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "UPPERCASE")]
    pub(crate) enum ResponseModality {
        Audio,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct SpeechConfig {
        pub voice_config: VoiceConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }

    #[derive(Serialize, Debug)]
    pub(crate) struct Content {
        pub parts: Vec<TextPart>,
    }

    #[derive(Serialize, Debug)]
    pub(crate) struct TextPart {
        pub text: String,
    }

    #[derive(Serialize, Debug)]
    pub(crate) struct RealtimeInput {
        pub audio: Blob,
    }

    #[derive(Serialize, Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Blob {
        #[serde(default)]
        pub mime_type: String,
        pub data: String,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct ServerMessage {
        pub setup_complete: Option<serde_json::Value>,
        pub server_content: Option<LiveServerContent>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct LiveServerContent {
        pub model_turn: Option<ModelTurn>,
        #[serde(default)]
        pub interrupted: bool,
    }

    #[derive(Deserialize, Debug)]
    pub(crate) struct ModelTurn {
        #[serde(default)]
        pub parts: Vec<ServerPart>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct ServerPart {
        pub inline_data: Option<Blob>,
    }
}

/// Builds the first message sent on a new connection.
fn setup_message(setup: &LiveSetup) -> wire::ClientMessage {
    let model = if setup.model.starts_with("models/") {
        setup.model.clone()
    } else {
        format!("models/{}", setup.model)
    };
    wire::ClientMessage::Setup(wire::Setup {
        model,
        generation_config: wire::GenerationConfig {
            response_modalities: vec![wire::ResponseModality::Audio],
            speech_config: wire::SpeechConfig {
                voice_config: wire::VoiceConfig {
                    prebuilt_voice_config: wire::PrebuiltVoiceConfig {
                        voice_name: setup.voice.clone(),
                    },
                },
            },
        },
        system_instruction: wire::Content {
            parts: vec![wire::TextPart {
                text: setup.persona.clone(),
            }],
        },
    })
}

fn audio_message(chunk: RealtimeAudio) -> wire::ClientMessage {
    wire::ClientMessage::RealtimeInput(wire::RealtimeInput {
        audio: wire::Blob {
            mime_type: chunk.mime_type,
            data: chunk.data,
        },
    })
}

/// Translates one server frame into session events. Frames that carry
/// nothing the session cares about yield no events.
fn parse_server_message(text: &str) -> Result<Vec<TransportEvent>, serde_json::Error> {
    let message: wire::ServerMessage = serde_json::from_str(text)?;
    let mut events = Vec::new();
    if message.setup_complete.is_some() {
        events.push(TransportEvent::Opened);
    }
    if let Some(content) = message.server_content {
        let audio = content.model_turn.and_then(|turn| {
            turn.parts
                .into_iter()
                .find_map(|part| part.inline_data)
                .map(|blob| blob.data)
        });
        if audio.is_some() || content.interrupted {
            events.push(TransportEvent::Content(ServerContent {
                audio,
                interrupted: content.interrupted,
            }));
        }
    }
    Ok(events)
}

/// Opens Gemini Live sessions.
#[derive(Clone)]
pub struct GeminiLiveConnector {
    api_key: String,
    endpoint: String,
}

impl GeminiLiveConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, DEFAULT_ENDPOINT)
    }

    /// Connects somewhere other than the public endpoint, e.g. a local relay.
    pub fn with_endpoint(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, setup: &LiveSetup) -> Result<LiveConnection, SessionError> {
        let (ws_stream, _) = connect_async(self.url())
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        info!(endpoint = %self.endpoint, "Connected to Gemini Live WebSocket.");
        let (mut ws_tx, ws_rx) = ws_stream.split();

        let payload = serde_json::to_string(&setup_message(setup))
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        ws_tx
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        debug!(model = %setup.model, voice = %setup.voice, "Sent live session setup.");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(ws_tx, outbound_rx));
        tokio::spawn(read_loop(ws_rx, events_tx));

        Ok(LiveConnection {
            sink: Box::new(GeminiLiveSink {
                outbound: outbound_tx,
                closed: false,
            }),
            events: events_rx,
        })
    }
}

enum Outbound {
    Audio(RealtimeAudio),
    Close,
}

/// Outbound half of a Gemini Live connection.
pub struct GeminiLiveSink {
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: bool,
}

impl LiveSink for GeminiLiveSink {
    fn send_audio(&mut self, chunk: RealtimeAudio) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Transport("connection closed".to_string()));
        }
        self.outbound
            .send(Outbound::Audio(chunk))
            .map_err(|_| SessionError::Transport("connection closed".to_string()))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.outbound.send(Outbound::Close);
        }
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        let message = match item {
            Outbound::Audio(chunk) => match serde_json::to_string(&audio_message(chunk)) {
                Ok(payload) => Message::Text(payload.into()),
                Err(e) => {
                    warn!(error = %e, "Failed to encode audio chunk.");
                    continue;
                }
            },
            Outbound::Close => break,
        };
        if let Err(e) = ws_tx.send(message).await {
            warn!(error = %e, "Failed to send to Gemini Live, stopping writer.");
            return;
        }
    }
    if let Err(e) = ws_tx.close().await {
        debug!(error = %e, "Ignoring error while closing Gemini Live socket.");
    }
    debug!("Gemini Live writer finished.");
}

/// Leading part of a frame, for logs. Audio frames carry large base64 bodies.
fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(LOG_EXCERPT_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

async fn read_loop(
    mut ws_rx: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let last = loop {
        let text = match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => text.as_str().to_string(),
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    warn!(len = data.len(), "Skipping non-UTF-8 binary frame.");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "Gemini Live connection closed by server.");
                break TransportEvent::Closed;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!(error = %e, "Error reading from Gemini Live WebSocket.");
                break TransportEvent::Error(e.to_string());
            }
            None => break TransportEvent::Closed,
        };
        match parse_server_message(&text) {
            Ok(parsed) => {
                for event in parsed {
                    match &event {
                        TransportEvent::Content(content) => trace!(
                            audio_len = content.audio.as_ref().map_or(0, String::len),
                            interrupted = content.interrupted,
                            "Gemini Live content."
                        ),
                        other => trace!(event = ?other, "Gemini Live event."),
                    }
                    if events.send(event).is_err() {
                        debug!("Session dropped its event receiver, stopping reader.");
                        return;
                    }
                }
            }
            Err(e) => warn!(
                error = %e,
                len = text.len(),
                start = %excerpt(&text),
                "Skipping unparseable Gemini Live message."
            ),
        }
    };
    let _ = events.send(last);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn live_setup() -> LiveSetup {
        LiveSetup {
            model: "gemini-2.5-flash-native-audio-preview-12-2025".into(),
            voice: "Zephyr".into(),
            persona: "You are Aijaz.".into(),
        }
    }

    #[test]
    fn setup_message_shape() {
        let value = serde_json::to_value(setup_message(&live_setup())).unwrap();
        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/gemini-2.5-flash-native-audio-preview-12-2025",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {"voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Zephyr"}}}
                    },
                    "systemInstruction": {"parts": [{"text": "You are Aijaz."}]}
                }
            })
        );
    }

    #[test]
    fn audio_message_shape() {
        let chunk = RealtimeAudio::pcm16(&[0.0, 0.5], 16_000);
        let value = serde_json::to_value(audio_message(chunk.clone())).unwrap();
        assert_eq!(value["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(value["realtimeInput"]["audio"]["data"], chunk.data);
    }

    #[test]
    fn parses_setup_complete() {
        let events = parse_server_message(r#"{"setupComplete": {}}"#).unwrap();
        assert_eq!(events, vec![TransportEvent::Opened]);
    }

    #[test]
    fn takes_first_inline_audio() {
        let events = parse_server_message(
            r#"{"serverContent": {"modelTurn": {"parts": [
                {"text": "thinking"},
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}},
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "BBBB"}}
            ]}}}"#,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![TransportEvent::Content(ServerContent {
                audio: Some("AAAA".into()),
                interrupted: false,
            })]
        );
    }

    #[test]
    fn parses_interruption_and_ignores_noise() {
        let events = parse_server_message(r#"{"serverContent": {"interrupted": true}}"#).unwrap();
        assert_eq!(
            events,
            vec![TransportEvent::Content(ServerContent {
                audio: None,
                interrupted: true,
            })]
        );
        assert!(parse_server_message(r#"{"serverContent": {"turnComplete": true}}"#)
            .unwrap()
            .is_empty());
        assert!(parse_server_message(r#"{"usageMetadata": {}}"#).unwrap().is_empty());
        assert!(parse_server_message("not json").is_err());
    }

    #[test]
    fn sink_rejects_after_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = GeminiLiveSink {
            outbound: tx,
            closed: false,
        };
        sink.send_audio(RealtimeAudio::pcm16(&[0.1], 16_000)).unwrap();
        sink.close();
        sink.close();
        assert!(sink.send_audio(RealtimeAudio::pcm16(&[0.1], 16_000)).is_err());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Audio(_))));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let frame = format!("{{\"serverContent\": \"{}\"", "Ā".repeat(10_000));
        let start = excerpt(&frame);
        assert_eq!(start.chars().count(), LOG_EXCERPT_CHARS);
        assert!(frame.starts_with(start));
        assert_eq!(excerpt("{}"), "{}");
    }

    #[tokio::test]
    async fn round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let setup: Value = match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("expected setup text, got {other:?}"),
            };
            ws.send(Message::Text(r#"{"setupComplete": {}}"#.to_string().into()))
                .await
                .unwrap();

            let audio: Value = match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("expected audio text, got {other:?}"),
            };
            ws.send(Message::Binary(
                br#"{"serverContent": {"modelTurn": {"parts": [{"inlineData": {"data": "AAAA"}}]}}}"#
                    .to_vec()
                    .into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
            (setup, audio)
        });

        let connector = GeminiLiveConnector::with_endpoint("test-key", format!("ws://{addr}/live"));
        let mut connection = connector.connect(&live_setup()).await.unwrap();

        assert_eq!(connection.events.recv().await, Some(TransportEvent::Opened));
        connection
            .sink
            .send_audio(RealtimeAudio::pcm16(&[0.25; 4], 16_000))
            .unwrap();
        assert_eq!(
            connection.events.recv().await,
            Some(TransportEvent::Content(ServerContent {
                audio: Some("AAAA".into()),
                interrupted: false,
            }))
        );
        assert_eq!(connection.events.recv().await, Some(TransportEvent::Closed));

        let (setup, audio) = server.await.unwrap();
        assert_eq!(setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"], "Zephyr");
        assert_eq!(audio["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        connection.sink.close();
    }
}
