//! Live audio session with a remote conversational model.
//!
//! - `manager`: lifecycle, state machine and the event-driven transition function.
//! - `playback`: gap-free scheduling of inbound frames.
//! - `meter`: input level for visual feedback.

mod manager;
pub mod meter;
pub mod playback;

pub use manager::{
    Generation, LiveSessionManager, SessionConfig, SessionEvent, SessionSnapshot, SessionState,
};
