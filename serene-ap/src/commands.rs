//! Line commands accepted on stdin by the player binary

use serene_ap::PlaybackEngine;
use serene_common::human_time::format_progress;

/// One parsed stdin command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    TogglePlayPause,
    Seek(f64),
    SkipForward,
    SkipBackward,
    Volume(f32),
    ToggleMute,
    Status,
    Quit,
}

impl Command {
    /// Parse a command line. Returns None for blank or unrecognised input.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next()?;
        let arg = parts.next();

        match verb {
            "p" | "play" | "pause" => Some(Command::TogglePlayPause),
            "s" | "seek" => arg?.parse().ok().map(Command::Seek),
            "f" => Some(Command::SkipForward),
            "b" => Some(Command::SkipBackward),
            "v" | "vol" => arg?.parse().ok().map(Command::Volume),
            "m" | "mute" => Some(Command::ToggleMute),
            "?" | "status" => Some(Command::Status),
            "q" | "quit" => Some(Command::Quit),
            _ => None,
        }
    }

    /// Apply to the engine. `Quit` is handled by the caller.
    pub async fn apply(self, engine: &PlaybackEngine) {
        match self {
            Command::TogglePlayPause => engine.toggle_play_pause().await,
            Command::Seek(seconds) => engine.seek(seconds).await,
            Command::SkipForward => engine.skip_forward().await,
            Command::SkipBackward => engine.skip_backward().await,
            Command::Volume(volume) => engine.set_volume(volume).await,
            Command::ToggleMute => {
                let volume = engine.toggle_mute().await;
                println!("volume {:.2}", volume);
            }
            Command::Status => {
                let status = engine.status();
                println!(
                    "{} {} volume {:.2}",
                    status.state,
                    format_progress(engine.current_time().await, status.duration_seconds),
                    status.volume
                );
            }
            Command::Quit => {}
        }
    }
}

pub const HELP: &str = "commands: p (play/pause), s <sec> (seek), f/b (skip), v <0-1> (volume), m (mute), ? (status), q (quit)";
