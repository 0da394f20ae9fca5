//! Replays a JSON event script through a roster and prints the result.
//!
//! Usage: `huddle-replay [--data-dir DIR] <script.json>`

use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::Parser;
use huddle_core::{
    Participant, Roster, RosterEvent, RosterInput, RosterListener, RosterSettings, RosterSnapshot,
    SettingsStore,
};
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};

#[derive(Parser, Debug)]
#[command(about = "Replay a roster event script", version)]
struct Cli {
    /// Directory holding settings.json, used when the script has no settings.
    #[arg(long = "data-dir", env = "HUDDLE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// JSON event script.
    script: PathBuf,
}

#[derive(Deserialize)]
struct Script {
    #[serde(default)]
    settings: Option<RosterSettings>,
    #[serde(default)]
    can_manage: bool,
    local_peer: String,
    #[serde(default)]
    local_sharing: Option<LocalSharing>,
    #[serde(default)]
    participants: Vec<Participant>,
    #[serde(default)]
    invited: Vec<String>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Deserialize)]
struct LocalSharing {
    #[serde(default)]
    camera: String,
    #[serde(default)]
    screen: String,
}

#[derive(Deserialize)]
struct Step {
    /// Offset from the start of the replay.
    #[serde(default)]
    at_ms: u64,
    input: RosterInput,
}

#[derive(Serialize)]
struct Report {
    events: Vec<RosterEvent>,
    snapshot: RosterSnapshot,
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<RosterEvent>>,
}

impl RosterListener for EventLog {
    fn on_event(&self, event: RosterEvent) {
        tracing::info!(?event, "roster event");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle_core=info,huddle_replay=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let script: Script = serde_json::from_str(&std::fs::read_to_string(&cli.script)?)?;
    tracing::info!(
        "replaying {} steps from {}",
        script.steps.len(),
        cli.script.display()
    );

    let settings = match (script.settings, &cli.data_dir) {
        (Some(settings), _) => settings,
        (None, Some(dir)) => SettingsStore::new(dir).get(),
        (None, None) => RosterSettings::default(),
    };
    let mut roster = Roster::new(settings, Arc::new(script.can_manage));
    let log = Arc::new(EventLog::default());
    roster.add_listener(log.clone());
    if let Some(sharing) = script.local_sharing {
        roster.set_local_sharing_endpoints(sharing.camera, sharing.screen);
    }
    roster.prepare(
        &script.local_peer,
        script.participants,
        &script.invited,
        Instant::now(),
    );

    let (handle, task) = huddle_core::spawn(roster);
    let start = Instant::now();
    for step in script.steps {
        time::sleep_until(start + Duration::from_millis(step.at_ms)).await;
        handle.send(step.input).await?;
    }
    let snapshot = handle.snapshot().await?;
    handle.shutdown().await?;
    task.await?;

    let events = std::mem::take(&mut *log.events.lock().unwrap_or_else(PoisonError::into_inner));
    let report = Report { events, snapshot };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
