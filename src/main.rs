//! cosyvoice-reader: read the quoted parts of chat messages aloud.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cosyvoice_reader::api::{self, ApiState};
use cosyvoice_reader::audio::RodioOutput;
use cosyvoice_reader::config::{Config, VoiceMode};
use cosyvoice_reader::error::TtsError;
use cosyvoice_reader::notifier::Notifier;
use cosyvoice_reader::player::{PlaybackState, Player};
use cosyvoice_reader::quotes;
use cosyvoice_reader::synth::TtsClient;

#[derive(Parser, Debug)]
#[command(name = "cosyvoice-reader", about = "Quote-aware TTS playback for chat messages")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the backend base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control API until interrupted
    Serve,

    /// Speak text (or a file) once and exit
    Speak {
        /// Text to read; quoted parts are spoken
        text: Option<String>,

        /// Read the text from a file instead
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Use this preset speaker
        #[arg(long)]
        speaker: Option<String>,

        /// Clone the voice in this reference recording
        #[arg(long, requires = "prompt_text", conflicts_with = "speaker")]
        prompt_audio: Option<PathBuf>,

        /// Transcript of the reference recording
        #[arg(long, requires = "prompt_audio")]
        prompt_text: Option<String>,

        /// Speak the whole text instead of only the quotes
        #[arg(long)]
        all: bool,
    },

    /// List the backend's preset speakers
    Speakers,

    /// Check backend health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy HTTP internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info,symphonia=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn,symphonia=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::load(args.config.as_deref());
    if let Some(url) = args.base_url {
        config.backend.api_base_url = url;
    }
    let client = TtsClient::new(&config.backend.api_base_url)?;
    info!("Backend: {}", client.base_url());

    match args.command {
        Command::Serve => serve(config, client).await?,
        Command::Speak {
            text,
            file,
            speaker,
            prompt_audio,
            prompt_text,
            all,
        } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => tokio::fs::read_to_string(&path).await?,
                (None, None) => return Err("nothing to speak: pass TEXT or --file".into()),
            };
            if let Some(speaker) = speaker {
                config.voice.mode = VoiceMode::Preset;
                config.voice.selected_speaker = speaker;
            }
            if let (Some(audio), Some(prompt)) = (prompt_audio, prompt_text) {
                config.voice.mode = VoiceMode::Clone;
                config.voice.current_clone_preset = None;
                config.voice.temp_prompt_text = prompt;
                config.voice.load_prompt_audio(&audio).await?;
            }
            if all {
                config.quotes.extract_only = false;
            }
            speak(&config, client, &text).await?;
        }
        Command::Speakers => {
            for speaker in client.speakers().await? {
                println!("{}\t{}", speaker.id, speaker.name);
            }
        }
        Command::Health => {
            let health = client.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
    }

    Ok(())
}

async fn serve(config: Config, client: TtsClient) -> Result<(), Box<dyn std::error::Error>> {
    let output = RodioOutput::open()?;
    let player = Player::new(client.clone(), output, config.playback.preload_count);
    Notifier::new(config.feedback.notifications).watch(player.subscribe());

    let port = config.api.port;
    let api_enabled = config.api.enabled;
    let state = ApiState::new(player.clone(), client, Arc::new(Mutex::new(config)));
    if api_enabled {
        api::start_control_api(state, port).await?;
    } else {
        info!("Control API disabled in config");
    }

    info!("cosyvoice-reader ready, Ctrl-C to quit");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    player.stop();
    Ok(())
}

async fn speak(config: &Config, client: TtsClient, text: &str) -> Result<(), TtsError> {
    let segments = quotes::extract(text, &config.quotes.marks(), config.quotes.extract_only);
    let voice = config.voice.resolve()?;

    let output = RodioOutput::open()?;
    let player = Player::new(client, output, config.playback.preload_count);
    player.start(segments, voice)?;
    let mut status = player.subscribe();

    let finished = status.wait_for(|s| {
        !matches!(s.state, PlaybackState::Playing | PlaybackState::Paused)
    });
    let outcome = tokio::select! {
        changed = finished => changed.map(|s| s.clone()).ok(),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            None
        }
    };
    player.stop();

    match outcome.and_then(|s| s.last_error) {
        Some(message) => {
            error!("Playback failed: {message}");
            Err(TtsError::Playback(message))
        }
        None => Ok(()),
    }
}
