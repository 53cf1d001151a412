//! Terminal front end for the therapist client.
//!
//! Type a message to chat. Commands:
//!   /text, /voice   switch mode (the first visit fetches a greeting)
//!   /mic            start or stop a voice recording
//!   /play           replay or stop the last reply's audio
//!   /ok             acknowledge a crisis alert
//!   /devices        list audio devices
//!   /quit

use std::sync::Arc;

use ai_therapist::client::{self, DialogueBackend};
use ai_therapist::config::Config;
use ai_therapist::coordinator::{CoordinatorEvent, RecordingOutcome, SubmitOutcome};
use ai_therapist::turn::{Turn, UserInput};
use ai_therapist::{
    AudioCaptureController, AudioPlaybackController, CpalMicrophone, CpalSpeaker, CrisisAlert,
    CrisisGate, DialogueClient, FileStorage, Mode, OfflineBackend, SessionStore, TurnCoordinator,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Clone, Copy, ValueEnum)]
enum StartMode {
    Text,
    Voice,
}

#[derive(Parser)]
#[command(version, about = "Talk to the AI therapist from a terminal")]
struct Cli {
    /// Mode to open first
    #[arg(long, value_enum, default_value = "text")]
    mode: StartMode,

    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Cli::parse();
    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let backend: Arc<dyn DialogueBackend> = match &config.api_base_url {
        Some(base_url) => {
            tracing::info!("Using backend at {base_url}");
            let client_config = client::Config::builder().with_base_url(base_url).build();
            Arc::new(DialogueClient::new(client_config).context("Failed to build HTTP client")?)
        }
        None => {
            tracing::info!("THERAPIST_API_BASE_URL not set, using offline replies");
            Arc::new(OfflineBackend::new())
        }
    };

    let coordinator = Arc::new(TurnCoordinator::new(
        backend,
        SessionStore::open(FileStorage::new(&config.session_file)),
        CrisisGate::new(),
        AudioCaptureController::new(Arc::new(CpalMicrophone::new(config.input_device.clone()))),
        AudioPlaybackController::new(Arc::new(CpalSpeaker::new(config.output_device.clone()))),
    ));

    let mut events = coordinator.subscribe();
    let printer = coordinator.clone();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CoordinatorEvent::TurnResolved { mode, turn } | CoordinatorEvent::TurnFailed { mode, turn, .. } => {
                    if let Some(turn) = printer.turn(mode, turn) {
                        print_turn(&turn);
                    }
                }
                CoordinatorEvent::CrisisRaised(alert) => print_alert(&alert),
                CoordinatorEvent::Notice { mode, message } => println!("[{mode}] {message}"),
                CoordinatorEvent::TurnStarted { .. } | CoordinatorEvent::SessionAdopted(_) => {}
            }
        }
    });

    let mut mode = match args.mode {
        StartMode::Text => Mode::Text,
        StartMode::Voice => Mode::Voice,
    };
    println!("({mode} mode, /help for commands)");
    coordinator.activate(mode).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        match line {
            "/quit" => break,
            "/help" => println!("/text /voice /mic /play /ok /devices /quit"),
            "/text" | "/voice" => {
                mode = if line == "/text" { Mode::Text } else { Mode::Voice };
                println!("({mode} mode)");
                coordinator.activate(mode).await;
            }
            "/mic" => match coordinator.toggle_recording().await {
                Ok(RecordingOutcome::Started) => println!("Recording... /mic again to send"),
                Ok(RecordingOutcome::Rejected(rejection)) => println!("Can't record right now ({rejection:?})"),
                Ok(_) => {}
                Err(e) => tracing::debug!("recording ended without a turn: {e}"),
            },
            "/play" => {
                let last = coordinator.turns(mode).into_iter().rev().find(|turn| turn.reply().is_some());
                match last {
                    Some(turn) => {
                        if let Err(e) = coordinator.toggle_reply_audio(turn.id) {
                            println!("{e}");
                        }
                    }
                    None => println!("Nothing to play yet."),
                }
            }
            "/ok" => {
                coordinator.acknowledge_crisis();
                println!("(continuing)");
            }
            "/devices" => print_devices(),
            "" => {}
            text => {
                if mode == Mode::Voice {
                    println!("Voice mode takes recordings, use /mic or switch with /text.");
                    continue;
                }
                if let SubmitOutcome::Rejected(rejection) = coordinator.submit_text(text).await {
                    match coordinator.crisis().alert() {
                        Some(alert) => print_alert(&alert),
                        None => println!("Not sent ({rejection:?})"),
                    }
                }
            }
        }
    }

    coordinator.playback().stop();
    tracing::info!("Goodbye.");
    Ok(())
}

fn print_turn(turn: &Turn) {
    match &turn.user {
        Some(UserInput::Text(text)) => println!("you: {text}"),
        Some(UserInput::Audio(audio)) => println!("you: <{} bytes of audio>", audio.len()),
        None => {}
    }
    if let Some(reply) = turn.reply() {
        let audio = if reply.audio.is_some() { " [audio]" } else { "" };
        println!("therapist: {}{audio}", reply.text);
    }
}

fn print_alert(alert: &CrisisAlert) {
    println!("==== Crisis Alert ====");
    println!("{}", alert.message());
    if let Some(banner) = alert.banner() {
        println!("{}", banner.message());
        for (region, helpline) in banner.helplines() {
            println!("  {region}: {helpline}");
        }
    }
    println!("Type /ok to continue.");
}

fn print_devices() {
    use ai_therapist::utils::device;

    match device::get_available_inputs() {
        Ok(inputs) => println!("Input devices:\n{inputs}"),
        Err(e) => println!("Input devices unavailable: {e:#}"),
    }
    match device::get_available_outputs() {
        Ok(outputs) => println!("Output devices:\n{outputs}"),
        Err(e) => println!("Output devices unavailable: {e:#}"),
    }
}
