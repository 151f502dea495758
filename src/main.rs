use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use console::{style, Term};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use linguist::store::open_snapshot_store;
use linguist::tutor::prompt::system_instruction;
use linguist::tutor::{ControllerUpdate, SessionController, Sender, SystemClock, TurnRecord};
use linguist::voice::capture::{ChannelInput, CAPTURE_CHANNEL_CAPACITY};
use linguist::voice::{AudioInput, AudioOutput, LiveTransport, Microphone, Speaker};
use linguist::{Config, TutorError};

/// Linguist - practice spoken English with a live voice tutor
#[derive(Parser)]
#[command(name = "linguist", version, about)]
struct Cli {
    /// Config file (defaults to ~/.linguist/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live voice session (Ctrl-C to stop)
    Practice {
        /// Stream a raw 16 kHz mono PCM16LE recording instead of the microphone
        #[arg(long)]
        pcm_file: Option<PathBuf>,
    },
    /// Show today's practice minutes and homework
    Stats,
    /// Print the transcript
    History {
        /// Only the most recent N exchanges
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Delete the transcript and stats
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Play back the audio stored with a transcript record
    Replay {
        /// Record id, as printed by `history`
        turn_id: String,
    },
}

type Controller = SessionController<LiveTransport>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            return ExitCode::FAILURE;
        }
    };

    let filter = match cli.verbose {
        0 => config.log_filter.clone(),
        1 => "linguist=debug".to_string(),
        _ => "trace".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            eprintln!("{} {e:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Practice { pcm_file } => practice(&config, pcm_file.as_deref()).await,
        Command::Stats => {
            show_stats(&open_controller(&config, None));
            Ok(())
        }
        Command::History { limit } => {
            show_history(&open_controller(&config, None), limit);
            Ok(())
        }
        Command::Clear { yes } => clear(&config, yes),
        Command::Replay { turn_id } => replay(&config, &turn_id).await,
    }
}

/// Build a controller over the on-disk store. `input` defaults to the microphone.
fn open_controller(config: &Config, input: Option<Box<dyn AudioInput>>) -> Controller {
    let data_dir = config.data_dir();
    let store = open_snapshot_store(data_dir.as_deref().map_err(|e| anyhow::anyhow!("{e:#}")));
    let transport = LiveTransport::new(
        config.live.clone(),
        config.api_key.clone().unwrap_or_default(),
        system_instruction(),
        input.unwrap_or_else(|| Box::new(Microphone::new(config.live.input_sample_rate))),
        Box::new(Speaker),
    );
    SessionController::new(transport, store, Arc::new(SystemClock), config.tutor.clone())
        .with_audio_rates(config.live.input_sample_rate, config.live.output_sample_rate)
}

async fn practice(config: &Config, pcm_file: Option<&Path>) -> anyhow::Result<()> {
    config.require_api_key()?;

    let input: Option<Box<dyn AudioInput>> = match pcm_file {
        Some(path) => Some(Box::new(feed_recording(
            path,
            config.live.frame_samples,
            config.live.input_sample_rate,
        )?)),
        None => None,
    };
    let mut controller = open_controller(config, input);

    println!("{}", style("Connecting to your tutor...").dim());
    if let Err(e) = controller.start_session().await {
        match &e {
            TutorError::PermissionDenied(_) => {
                eprintln!("{}", style("Check that a microphone is connected and allowed.").yellow());
            }
            TutorError::Connection(_) => {
                eprintln!("{}", style("Check your network and API key, then try again.").yellow());
            }
            _ => {}
        }
        return Err(e.into());
    }
    println!(
        "{} {}",
        style("Live.").green().bold(),
        style("Start speaking. Press Ctrl-C to end the session.").dim()
    );

    let term = Term::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                let _ = term.clear_line();
                let minutes = controller.stop_session().await.unwrap_or(0);
                println!("{} {minutes} min credited.", style("Session ended.").bold());
                break;
            }
            update = controller.next_update() => match update {
                Some(update) => render(&term, update),
                None => break,
            },
        }
    }

    show_stats(&controller);
    Ok(())
}

/// Replay a raw recording through a channel at real-time pace, followed by
/// a short silence so the server detects the end of speech.
fn feed_recording(path: &Path, frame_samples: usize, sample_rate: u32) -> anyhow::Result<ChannelInput> {
    let mut pcm = std::fs::read(path)
        .with_context(|| format!("Failed to read recording: {}", path.display()))?;
    pcm.truncate(pcm.len() & !1);
    if pcm.is_empty() {
        bail!("Recording is empty: {}", path.display());
    }

    let frame_bytes = frame_samples * 2;
    let frame_ms = (frame_samples as u64 * 1000 / u64::from(sample_rate)).max(1);
    let silence_frames = (1500 / frame_ms + 1) as usize;
    let (tx, rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let frames = pcm
            .chunks(frame_bytes)
            .map(<[u8]>::to_vec)
            .chain(std::iter::repeat_n(vec![0u8; frame_bytes], silence_frames));
        let mut ticker = tokio::time::interval(Duration::from_millis(frame_ms));
        for frame in frames {
            ticker.tick().await;
            if tx.send(frame).await.is_err() {
                return;
            }
        }
        tracing::info!("Recording fully streamed");
    });

    Ok(ChannelInput::new(rx))
}

fn render(term: &Term, update: ControllerUpdate) {
    match update {
        ControllerUpdate::InputPartial(text) => {
            let _ = term.clear_line();
            let _ = term.write_str(&format!("{} {}", style("you ›").cyan(), style(text.trim()).dim()));
        }
        ControllerUpdate::OutputPartial(text) => {
            let _ = term.clear_line();
            let _ = term.write_str(&format!("{} {}", style("coach ›").magenta(), style(last_line(&text)).dim()));
        }
        ControllerUpdate::Turn { user, tutor } => {
            let _ = term.clear_line();
            print_exchange(&user, &tutor);
        }
        ControllerUpdate::Failed(message) => {
            let _ = term.clear_line();
            eprintln!("{} {message}", style("Connection lost:").red().bold());
        }
        ControllerUpdate::Closed { minutes } => {
            let _ = term.clear_line();
            println!("{} {minutes} min credited.", style("Session closed.").bold());
        }
    }
}

fn last_line(text: &str) -> &str {
    text.trim_end().lines().last().unwrap_or("").trim()
}

fn print_exchange(user: &TurnRecord, tutor: &TurnRecord) {
    println!("{} {}", style("You").cyan().bold(), user.text);
    println!("{} {}", style("Coach").magenta().bold(), tutor.text);

    let details = [
        ("中文", &tutor.translation),
        ("Vocabulary", &tutor.vocabulary),
        ("Phrases", &tutor.phrases),
        ("Grammar", &tutor.grammar),
        ("Level up", &tutor.improved_version),
        ("Homework", &tutor.homework),
    ];
    for (label, value) in details {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            println!("  {} {}", style(format!("{label}:")).dim(), value.replace('\n', "\n    "));
        }
    }
    if tutor.is_homework_correction {
        println!("  {}", style("✔ homework graded").green());
    }
    println!();
}

fn show_stats(controller: &Controller) {
    let stats = controller.stats();
    println!("{} {}", style("Today").bold(), stats.date.format("%Y-%m-%d"));
    println!("  Minutes spoken: {}", stats.minutes_spoken);
    match (&stats.homework_assigned, stats.homework_completed) {
        (Some(hw), true) => println!("  Homework: {} {}", hw, style("(done)").green()),
        (Some(hw), false) => println!("  Homework: {} {}", hw, style("(pending)").yellow()),
        (None, _) => println!("  Homework: {}", style("none yet").dim()),
    }
}

fn show_history(controller: &Controller, limit: Option<usize>) {
    let records = controller.transcript();
    if records.is_empty() {
        println!("{}", style("No practice history yet.").dim());
        return;
    }
    let skip = limit.map_or(0, |n| records.len().saturating_sub(n * 2));
    for record in &records[skip..] {
        let who = match record.sender {
            Sender::User => style("You  ").cyan().bold(),
            Sender::Tutor => style("Coach").magenta().bold(),
        };
        let audio = record
            .audio
            .as_ref()
            .map(|a| format!(" [{:.1}s]", a.duration_ms() as f64 / 1000.0))
            .unwrap_or_default();
        println!("{} {who} {}{}", style(&record.id).dim(), record.text, style(audio).dim());
        if let Some(homework) = record.homework.as_deref().filter(|h| !h.is_empty()) {
            println!("  {} {homework}", style("Homework:").dim());
        }
        if record.sender == Sender::Tutor {
            println!();
        }
    }
}

fn clear(config: &Config, yes: bool) -> anyhow::Result<()> {
    let mut controller = open_controller(config, None);
    if !yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Delete all practice history and today's stats?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Nothing deleted.");
            return Ok(());
        }
    }
    controller.clear_history()?;
    println!("{}", style("History cleared.").green());
    Ok(())
}

async fn replay(config: &Config, turn_id: &str) -> anyhow::Result<()> {
    let controller = open_controller(config, None);
    let record = controller
        .transcript()
        .iter()
        .find(|r| r.id == turn_id)
        .with_context(|| format!("No record with id {turn_id}"))?;
    let Some(audio) = &record.audio else {
        bail!("Record {turn_id} has no audio");
    };

    println!("{} {}", style("▶").green(), record.text);
    let mut output = Speaker;
    let playback = output.open(audio.sample_rate)?;
    playback.enqueue(&audio.pcm);
    playback
        .drain(Duration::from_millis(audio.duration_ms() + 500))
        .await;
    Ok(())
}
