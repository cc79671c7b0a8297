/// Failures surfaced by the live audio session.
///
/// `Permission`, `Device` and `Transport` move the session into the error
/// state and are shown to the user. `Decode` only costs the offending frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Microphone access denied or unavailable: {0}")]
    Permission(String),
    #[error("Audio output unavailable: {0}")]
    Device(String),
    #[error("Connection failed: {0}")]
    Transport(String),
    #[error("Could not decode audio payload: {0}")]
    Decode(String),
}

impl SessionError {
    /// Whether this error ends the session and is reported to the user.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Decode(_))
    }
}
