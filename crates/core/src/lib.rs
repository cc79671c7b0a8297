pub mod assistant;
pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod ledger;
pub mod session;
pub mod transport;

pub use error::SessionError;
pub use session::{LiveSessionManager, SessionConfig, SessionSnapshot, SessionState};
