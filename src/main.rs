use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use leadline::audio::recorder::MemorySink;
use leadline::audio::vad::ManualClock;
use leadline::audio::wav::WavAudioSource;
use leadline::cli::{CallArgs, Cli, Commands, ConfigAction};
use leadline::config::Config;
use leadline::dialogue::CallOutcome;
use leadline::engine::{CallEngine, EngineConfig, Services, SimulatedTime};
use leadline::llm::{MinutesGenerator, Reasoner, ScriptedReasoner, TemplateMinutes};
use leadline::session::FileSessionPersister;
use leadline::stt::{MockTranscriber, Transcriber, WhisperConfig, WhisperTranscriber};
use leadline::tts::ToneSynthesizer;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    leadline::logging::init(cli.verbose, cli.quiet);
    tracing::debug!(version = %leadline::version_string(), "Starting");

    match cli.command {
        Commands::Call {
            device,
            output_device,
            model,
            call,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(device) = device {
                config.audio.device = Some(device);
            }
            if let Some(device) = output_device {
                config.audio.output_device = Some(device);
            }
            if let Some(model) = model {
                config.stt.model = model;
            }
            apply_call_args(&mut config, &call);
            config.validate()?;
            run_live_call(&config).await?;
        }
        Commands::Simulate {
            wav,
            script,
            transcripts,
            trailing_silence,
            call,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            apply_call_args(&mut config, &call);
            config.validate()?;
            run_simulation(
                &config,
                &wav,
                script.as_deref(),
                transcripts.as_deref(),
                trailing_silence,
            )
            .await?;
        }
        Commands::Devices => list_audio_devices()?,
        Commands::Config { action } => handle_config_command(action, cli.config.as_deref())?,
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "leadline",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/leadline/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

fn apply_call_args(config: &mut Config, args: &CallArgs) {
    if let Some(secs) = args.reminder_after {
        config.call.reminder_after_secs = secs;
    }
    if let Some(secs) = args.max_silence {
        config.call.max_silence_secs = secs;
    }
    if let Some(dir) = &args.output_dir {
        config.call.output_dir = dir.clone();
    }
}

fn whisper_transcriber(config: &Config) -> Result<Arc<dyn Transcriber>> {
    let whisper = WhisperTranscriber::new(WhisperConfig {
        model_path: config.model_path(),
        language: config.stt.language.clone(),
        threads: None,
    })
    .context("Speech recognition is unavailable")?;
    Ok(Arc::new(whisper))
}

#[cfg(feature = "http")]
fn live_reasoning(config: &Config) -> Result<(Arc<dyn Reasoner>, Arc<dyn MinutesGenerator>)> {
    use leadline::llm::{GeminiClient, GeminiMinutes, GeminiReasoner};

    let client = GeminiClient::from_config(&config.reasoning)?;
    Ok((
        Arc::new(GeminiReasoner::new(client.clone())),
        Arc::new(GeminiMinutes::new(client)),
    ))
}

#[cfg(not(feature = "http"))]
fn live_reasoning(_config: &Config) -> Result<(Arc<dyn Reasoner>, Arc<dyn MinutesGenerator>)> {
    anyhow::bail!("Live reasoning needs the `http` feature; pass --script for canned replies")
}

#[cfg(all(feature = "cpal-audio", feature = "http"))]
async fn run_live_call(config: &Config) -> Result<()> {
    use leadline::audio::capture::CpalAudioSource;
    use leadline::audio::playback::CpalAudioSink;
    use leadline::audio::recorder::{AudioSink, AudioSource};
    use leadline::tts::{HttpSynthesizer, Synthesizer};

    let transcriber = whisper_transcriber(config)?;
    let (reasoner, minutes) = live_reasoning(config)?;
    let synthesizer: Arc<dyn Synthesizer> = Arc::new(HttpSynthesizer::from_config(&config.tts)?);

    let source: Box<dyn AudioSource> = Box::new(CpalAudioSource::new(config.audio.device.as_deref())?);
    let sink: Arc<dyn AudioSink> = Arc::new(CpalAudioSink::open(
        config.audio.output_device.as_deref(),
        config.audio.sample_rate,
    )?);

    let services = Services {
        transcriber,
        reasoner,
        synthesizer,
        minutes,
        persister: Arc::new(FileSessionPersister::new(&config.call.output_dir)),
    };
    let engine = CallEngine::new(EngineConfig::from_config(config), services);

    let call = engine.start(source, sink).await?;
    eprintln!("Call {} in progress. Press Ctrl+C to hang up.", call.call_id());
    let hangup = call.hangup_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            hangup.hangup();
        }
    });

    let outcome = call.wait().await?;
    print_outcome(&outcome);
    Ok(())
}

#[cfg(not(all(feature = "cpal-audio", feature = "http")))]
async fn run_live_call(_config: &Config) -> Result<()> {
    anyhow::bail!("Live calls need the `cpal-audio` and `http` features")
}

async fn run_simulation(
    config: &Config,
    wav: &Path,
    script: Option<&Path>,
    transcripts: Option<&Path>,
    trailing_silence: u64,
) -> Result<()> {
    let transcriber: Arc<dyn Transcriber> = match transcripts {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read transcripts from {}", path.display()))?;
            let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            Arc::new(
                MockTranscriber::new("scripted")
                    .with_response("")
                    .with_responses(&lines),
            )
        }
        None => whisper_transcriber(config)?,
    };

    let (reasoner, minutes): (Arc<dyn Reasoner>, Arc<dyn MinutesGenerator>) = match script {
        Some(path) => {
            let script = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read script from {}", path.display()))?;
            (
                Arc::new(ScriptedReasoner::from_script(&script)?),
                Arc::new(TemplateMinutes),
            )
        }
        None => live_reasoning(config)?,
    };

    let trailing = u32::try_from(trailing_silence).context("Trailing silence is too long")?;
    let source = WavAudioSource::open(wav)?
        .with_chunk_size(config.audio.chunk_size)
        .with_trailing_silence(trailing);
    eprintln!(
        "Simulating a {:.1}s call from {}",
        source.duration_secs(),
        wav.display()
    );

    let speaker = Arc::new(MemorySink::buffered(config.audio.sample_rate));
    let time = SimulatedTime::new(ManualClock::new()).with_speaker(Arc::clone(&speaker));
    let services = Services {
        transcriber,
        reasoner,
        synthesizer: Arc::new(ToneSynthesizer::new(config.audio.sample_rate)),
        minutes,
        persister: Arc::new(FileSessionPersister::new(&config.call.output_dir)),
    };
    let engine =
        CallEngine::new(EngineConfig::from_config(config), services).with_simulated_time(time);

    let outcome = engine.run(Box::new(source), speaker).await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &CallOutcome) {
    println!("Call {} ended: {}", outcome.call_id, outcome.reason);
    println!("  Turns:      {}", outcome.turns);
    println!("  Lead score: {}", outcome.lead_score);
    println!("  Call stage: {:?}", outcome.call_stage);
    match &outcome.persisted {
        Some(persisted) => {
            println!("  Minutes:    {}", persisted.minutes.display());
            println!("  Analytics:  {}", persisted.analytics.display());
        }
        None => println!("  Session was not saved (see log)"),
    }
}

#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    use leadline::audio::capture::{DeviceKind, list_devices};

    for (label, kind) in [("input", DeviceKind::Input), ("output", DeviceKind::Output)] {
        let devices = list_devices(kind)?;
        if devices.is_empty() {
            println!("No audio {} devices found", label);
            continue;
        }
        println!("Available audio {} devices:", label);
        for (idx, device) in devices.iter().enumerate() {
            println!("  [{}] {}", idx, device);
        }
    }
    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    anyhow::bail!("Device listing needs the `cpal-audio` feature")
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Path => {
            let path = custom_path
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            let toml = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", toml);
        }
    }
    Ok(())
}
