use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use parley::api::ApiServer;
use parley::conversation::{CaptureSink, Conversation, Event, Generation, PlaybackDone};
use parley::transport::{self, AudioResponse};
use parley::voice::{
    AudioCapture, AudioPlayback, CaptureDevice, PlaybackSink, VoiceActivityDetector, pcm16_to_wav,
    ring_size,
};
use parley::{Config, console};

/// Parley - hands-free voice conversations with a remote agent
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Path to a config file (defaults to ~/.config/parley/config.toml)
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the conversation loop on the default microphone and speakers
    Talk {
        /// Relay endpoint receiving each turn
        #[arg(long)]
        relay_url: Option<String>,

        /// Echo turns locally instead of calling the relay
        #[arg(long)]
        mock: bool,

        /// Speech threshold in [0, 1]
        #[arg(long)]
        threshold: Option<f32>,

        /// Silence after speech that ends a turn, in milliseconds
        #[arg(long)]
        silence_ms: Option<u64>,
    },
    /// Run the relay gateway
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Echo uploads instead of forwarding them
        #[arg(long)]
        mock: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,parley=info",
        1 => "info,parley=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Talk {
        relay_url: None,
        mock: false,
        threshold: None,
        silence_ms: None,
    }) {
        Command::Talk {
            relay_url,
            mock,
            threshold,
            silence_ms,
        } => {
            if let Some(url) = relay_url {
                config.conversation.relay_url = url;
            }
            config.conversation.mock |= mock;
            if let Some(threshold) = threshold {
                config.vad.threshold = threshold;
            }
            if let Some(ms) = silence_ms {
                config.vad.silence = Duration::from_millis(ms);
            }
            config.validate()?;
            talk(config).await
        }
        Command::Serve { port, mock } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            config.server.mock_mode |= mock;
            ApiServer::new(&config.server)?.run().await?;
            Ok(())
        }
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Run the conversation loop until quit or Ctrl-C
#[allow(clippy::future_not_send)]
async fn talk(config: Config) -> anyhow::Result<()> {
    let transport = transport::build(
        &config.conversation.relay_url,
        config.conversation.mock,
        config.conversation.request_timeout,
    )?;

    let conversation = Conversation::new(
        config.vad,
        Box::new(AudioCapture::new(config.capture.clone())),
        Box::new(AudioPlayback::new()),
        transport,
    );
    let handle = conversation.handle();

    let printer = console::spawn_printer(conversation.subscribe());
    console::spawn_input(handle.clone());

    let signal_handle = handle.clone();
    let signals = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down");
            signal_handle.shutdown();
        }
    });

    println!("Press Enter to start talking, Enter again to interrupt, q to quit.");

    // cpal streams are !Send, so the loop stays on this task
    conversation.run().await;

    signals.abort();
    printer.abort();
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new(config.capture.clone());
    capture.acquire()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    capture.start(CaptureSink::new(Generation::default(), tx))?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("Threshold: {}", config.vad.threshold);
    println!("---");

    let mut vad = VoiceActivityDetector::new(config.vad);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;

    let mut peak = 0.0f32;
    let mut second = 0;
    let mut turns = 0;

    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => break,
            _ = ticker.tick() => {
                second += 1;

                // Visual meter
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let meter_len = (peak * 50.0).min(50.0) as usize;
                let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

                println!(
                    "[{second:2}s] Level: {peak:.4} | Ring: {:5.1}px | {:?} | [{meter}]",
                    ring_size(peak),
                    vad.phase(),
                );
                peak = 0.0;
            }
            event = rx.recv() => match event {
                Some(Event::Level { level, .. }) => {
                    peak = peak.max(level);
                    vad.on_sample(level, Instant::now());
                    if vad.check(Instant::now()) {
                        turns += 1;
                        println!("  end of turn detected");
                        vad.reset();
                    }
                }
                Some(Event::Fault { fault, .. }) => {
                    capture.release();
                    return Err(fault.into());
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    capture.release();

    println!("\n---");
    println!("Turns detected: {turns}");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If the level stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let pcm: Vec<u8> = (0..sample_rate * 2)
        .flat_map(|i| {
            let t = i as f32 / sample_rate as f32;
            let sample = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3; // 30% volume
            ((sample * 32767.0) as i16).to_le_bytes()
        })
        .collect();

    let response = AudioResponse {
        bytes: pcm16_to_wav(&pcm, sample_rate)?,
        content_type: "audio/wav".to_string(),
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut playback = AudioPlayback::new();
    playback.play(response, PlaybackDone::new(Generation::default(), tx))?;

    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(Event::PlaybackFinished { .. })) => {}
        Ok(Some(Event::Fault { fault, .. })) => return Err(fault.into()),
        _ => println!("(playback did not report completion)"),
    }
    playback.stop();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}
