use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use pulsecast::cli::{Cli, Commands, ConfigAction};
use pulsecast::config::Config;
use pulsecast::generation::ScriptedGenerator;
use pulsecast::media::{MediaSuite, MemoryStore};
use pulsecast::orchestrator::NarrationOrchestrator;
use pulsecast::playback::{AudioPlaybackCoordinator, TurnOutcome, read_turn};
use pulsecast::request::{ChatMessage, NarrationRequest};
use pulsecast::stream::MockSpeechProvider;
use pulsecast::validator::{OutputValidator, StoryContext};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    tracing::debug!(version = %pulsecast::version_string(), "starting");

    match cli.command {
        Commands::Classify {
            file,
            players,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let text = read_input(&file).await?;
            handle_classify(&config, &text, players, json)?;
        }
        Commands::Narrate {
            file,
            no_audio,
            token_chars,
            token_delay,
            blocking,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let script = read_input(&file).await?;
            let options = NarrateOptions {
                audio: !no_audio,
                token_chars,
                token_delay,
                blocking,
            };
            handle_narrate(config, script, options).await?;
        }
        Commands::Listen { file } => {
            let config = load_config(cli.config.as_deref())?;
            handle_listen(&config, &file).await?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout carries only the narration stream.
fn init_tracing(verbose: u8, quiet: bool) {
    let default_directive = if quiet {
        "pulsecast=warn"
    } else {
        match verbose {
            0 => "pulsecast=info",
            1 => "pulsecast=debug",
            _ => "pulsecast=trace",
        }
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .init();
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides()?)
}

/// Read a whole file, or stdin for `-`.
async fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("failed to read stdin")?;
        return Ok(text);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

fn handle_classify(config: &Config, text: &str, players: Vec<String>, json: bool) -> Result<()> {
    let validator = OutputValidator::new(&config.validator);
    let mut names = config.validator.player_names.clone();
    names.extend(players);

    let verdict = if names.is_empty() {
        validator.classify(text)
    } else {
        validator.classify_with_context(text, &StoryContext::with_players(names))
    };

    if json {
        let report = serde_json::json!({
            "is_garbage": verdict.is_garbage,
            "reason": verdict.describe(),
            "chars": text.trim().chars().count(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if verdict.is_garbage {
        println!("{} {}", "garbage:".red().bold(), verdict.describe());
    } else {
        println!("{}", "clean".green().bold());
    }

    if verdict.is_garbage {
        std::process::exit(1);
    }
    Ok(())
}

struct NarrateOptions {
    audio: bool,
    token_chars: usize,
    token_delay: Duration,
    blocking: bool,
}

async fn handle_narrate(config: Config, script: String, options: NarrateOptions) -> Result<()> {
    let generator = Arc::new(
        ScriptedGenerator::new("script")
            .with_response(&script)
            .with_token_chars(options.token_chars)
            .with_token_delay(options.token_delay),
    );
    let store = Arc::new(MemoryStore::new());
    let orchestrator = NarrationOrchestrator::new(config, generator, MediaSuite::template(), store)
        .with_speech(Arc::new(MockSpeechProvider::new()));

    let request = NarrationRequest::new("cli", "script")
        .with_message(ChatMessage::user("Continue the story."))
        .with_audio(options.audio);

    let finalizer = if options.blocking {
        let reply = orchestrator.narrate(&request).await?;
        println!("{}", reply.text);
        if reply.degraded {
            eprintln!(
                "{} returned after {} attempt(s): {}",
                "degraded:".yellow().bold(),
                reply.attempts,
                reply.verdict.describe()
            );
        }
        reply.finalizer
    } else {
        let report = orchestrator
            .stream_narration(&request, tokio::io::stdout())
            .await?;
        eprintln!(
            "{} {} text, {} audio, {} sound-effect frame(s){}",
            "done:".green().bold(),
            report.counts.text,
            report.counts.audio,
            report.counts.sound_effects,
            if report.truncated { " (truncated)" } else { "" }
        );
        report.finalizer
    };

    if let Some(finalizer) = finalizer {
        match finalizer.join().await {
            Ok(Some(url)) => eprintln!("{} {}", "image:".cyan().bold(), url),
            Ok(None) => tracing::debug!("no image attached"),
            Err(e) => tracing::warn!(error = %e, "image finalizer did not finish"),
        }
    }
    Ok(())
}

async fn handle_listen(config: &Config, path: &Path) -> Result<()> {
    let mut coordinator = AudioPlaybackCoordinator::from_config(&config.playback);
    let source: Box<dyn AsyncRead + Unpin + Send> = if path == Path::new("-") {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        )
    };

    let outcome = read_turn(BufReader::new(source), &mut coordinator).await?;
    let queued = coordinator.queued_chunks();
    coordinator.shutdown();
    tracing::debug!(queued, "playback queue released");

    match outcome {
        TurnOutcome::Completed { text, audio_chunks } => {
            println!("{text}");
            eprintln!(
                "{} {} chars, {} audio chunk(s) queued",
                "completed:".green().bold(),
                text.chars().count(),
                audio_chunks
            );
        }
        TurnOutcome::Aborted { text, .. } => {
            println!("{text}");
            eprintln!("{} stream ended without done frame", "aborted:".red().bold());
            std::process::exit(1);
        }
    }
    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }
    Ok(())
}
