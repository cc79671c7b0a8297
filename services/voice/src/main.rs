//! Talk to Aijaz from the terminal.
//!
//! Opens the default microphone and speaker, starts a live session with the
//! remote model and keeps it running until Ctrl+C, the remote side hanging
//! up, or an error.

mod backend;
mod capture;
mod playback;

use aijaz_core::{
    LiveSessionManager, SessionConfig, SessionSnapshot, SessionState, config::AssistantConfig,
};
use anyhow::{Context, bail};
use backend::CpalBackend;
use clap::Parser;
use gemini_live::GeminiLiveConnector;
use std::{io::Write, sync::Arc, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const METER_WIDTH: usize = 32;

#[derive(Parser, Debug)]
#[command(version, about = "Voice session with the Aijaz finance assistant")]
struct Args {
    /// Live model to talk to.
    #[arg(long)]
    model: Option<String>,

    /// Prebuilt voice for replies.
    #[arg(long)]
    voice: Option<String>,

    /// Seconds to wait for the session to open.
    #[arg(long)]
    connect_timeout_secs: Option<u64>,
}

impl Args {
    fn apply(self, config: &mut AssistantConfig) {
        if let Some(model) = self.model {
            config.live_model = model;
        }
        if let Some(voice) = self.voice {
            config.live_voice = voice;
        }
        if let Some(secs) = self.connect_timeout_secs.filter(|s| *s > 0) {
            config.connect_timeout = Duration::from_secs(secs);
        }
    }
}

/// Renders the input level as a bar on one terminal line.
fn meter_line(volume: f32) -> String {
    let filled = ((volume / 255.0).clamp(0.0, 1.0) * METER_WIDTH as f32).round() as usize;
    format!(
        "\r[{}{}]",
        "#".repeat(filled),
        " ".repeat(METER_WIDTH - filled)
    )
}

/// Where a started session stands, as seen by the CLI.
#[derive(Debug, PartialEq)]
enum Progress {
    Running,
    Ended,
    Failed(String),
}

/// Any return to idle after `start()` means the session is over, whether or
/// not it ever opened.
fn progress(snapshot: &SessionSnapshot) -> Progress {
    match snapshot.state {
        SessionState::Connecting | SessionState::Active => Progress::Running,
        SessionState::Idle => Progress::Ended,
        SessionState::Error => Progress::Failed(
            snapshot
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        ),
    }
}

fn report(snapshot: &SessionSnapshot, last_state: &mut SessionState) {
    if snapshot.state != *last_state {
        eprintln!();
        info!(from = %last_state, to = %snapshot.state, "Session state changed.");
        *last_state = snapshot.state;
    }
    if snapshot.state == SessionState::Active {
        eprint!("{}", meter_line(snapshot.volume));
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let mut config = AssistantConfig::from_env().context("Failed to load configuration")?;
    args.apply(&mut config);
    info!(
        model = %config.live_model,
        voice = %config.live_voice,
        timeout_secs = config.connect_timeout.as_secs(),
        "Configuration loaded. Starting voice session..."
    );

    let connector = Arc::new(GeminiLiveConnector::new(config.gemini_api_key.clone()));
    let manager = LiveSessionManager::new(
        connector,
        Arc::new(CpalBackend),
        SessionConfig::from(&config),
    );
    let mut updates = manager.subscribe();
    let mut last_state = SessionState::Idle;

    if let Err(e) = manager.start().await {
        bail!("Could not start the voice session: {e}");
    }
    eprintln!("Listening. Press Ctrl+C to stop.");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!();
                info!("Received Ctrl+C. Ending session...");
                manager.stop();
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("Session updates ended unexpectedly.");
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                report(&snapshot, &mut last_state);
                match progress(&snapshot) {
                    Progress::Running => {}
                    Progress::Ended => {
                        info!("The assistant ended the session.");
                        break;
                    }
                    Progress::Failed(message) => {
                        manager.stop();
                        bail!("Voice session failed: {message}");
                    }
                }
            }
        }
    }

    info!("Voice session closed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "aijaz-voice",
            "--model",
            "live-test",
            "--voice",
            "Puck",
            "--connect-timeout-secs",
            "5",
        ]);
        let mut config = AssistantConfig::new("key");
        args.apply(&mut config);
        assert_eq!(config.live_model, "live-test");
        assert_eq!(config.live_voice, "Puck");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn missing_flags_keep_defaults() {
        let args = Args::parse_from(["aijaz-voice", "--connect-timeout-secs", "0"]);
        let mut config = AssistantConfig::new("key");
        args.apply(&mut config);
        assert_eq!(config.live_voice, "Zephyr");
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
    }

    fn snapshot(state: SessionState, error: Option<&str>) -> SessionSnapshot {
        SessionSnapshot {
            state,
            error: error.map(str::to_string),
            volume: 0.0,
        }
    }

    #[test]
    fn idle_ends_the_session_even_before_it_opened() {
        assert_eq!(progress(&snapshot(SessionState::Connecting, None)), Progress::Running);
        assert_eq!(progress(&snapshot(SessionState::Active, None)), Progress::Running);
        assert_eq!(progress(&snapshot(SessionState::Idle, None)), Progress::Ended);
    }

    #[test]
    fn error_carries_its_message() {
        assert_eq!(
            progress(&snapshot(SessionState::Error, Some("Connection failed: refused"))),
            Progress::Failed("Connection failed: refused".to_string())
        );
        assert_eq!(
            progress(&snapshot(SessionState::Error, None)),
            Progress::Failed("unknown error".to_string())
        );
    }

    #[test]
    fn meter_scales_to_width() {
        assert_eq!(meter_line(0.0), format!("\r[{}]", " ".repeat(METER_WIDTH)));
        assert_eq!(meter_line(255.0), format!("\r[{}]", "#".repeat(METER_WIDTH)));
        assert_eq!(meter_line(1000.0).len(), METER_WIDTH + 3);
    }
}
