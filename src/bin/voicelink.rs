//! Voice link command-line client
//!
//! Captures PCM from standard input, sends it to the peer and plays the
//! peer's stream on the local output device until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voicelink::audio::source::ReaderSource;
use voicelink::codec::build_codec;
use voicelink::config::CodecKind;
use voicelink::{AppConfig, LinkMode, Session, SessionParts};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Uncompressed PCM blocks, no header
    Raw,
    /// Timestamped codec frames through a jitter buffer
    Codec,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CodecArg {
    Opus,
    Linear16,
}

/// Point-to-point voice over UDP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Peer host name or address
    #[arg(required_unless_present = "list_devices")]
    remote_addr: Option<String>,

    /// Peer UDP port
    #[arg(required_unless_present = "list_devices")]
    remote_port: Option<u16>,

    /// Local UDP port to receive on
    #[arg(required_unless_present = "list_devices")]
    local_port: Option<u16>,

    /// Bits per sample
    #[arg(short = 'b', long = "bits")]
    bits: Option<u16>,

    /// Samples per second (in a single channel)
    #[arg(short = 'r', long = "rate")]
    rate: Option<u32>,

    /// Number of channels
    #[arg(short = 'c', long = "channels")]
    channels: Option<u16>,

    /// Output device name (default device when omitted)
    #[arg(short = 'd', long = "device")]
    device: Option<String>,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Transport mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Frame codec used in codec mode
    #[arg(long, value_enum)]
    codec: Option<CodecArg>,

    /// Encoder bitrate in bits per second
    #[arg(long)]
    bitrate: Option<u32>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Cli {
    /// Command-line values win over the configuration file
    fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.remote_addr {
            config.network.remote_host = host.clone();
        }
        if let Some(port) = self.remote_port {
            config.network.remote_port = port;
        }
        if let Some(port) = self.local_port {
            config.network.local_port = port;
        }
        if let Some(bits) = self.bits {
            config.audio.bits_per_sample = bits;
        }
        if let Some(rate) = self.rate {
            config.audio.sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.audio.channels = channels;
        }
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(mode) = self.mode {
            config.codec.mode = match mode {
                ModeArg::Raw => LinkMode::Raw,
                ModeArg::Codec => LinkMode::Codec,
            };
        }
        if let Some(codec) = self.codec {
            config.codec.kind = match codec {
                CodecArg::Opus => CodecKind::Opus,
                CodecArg::Linear16 => CodecKind::Linear16,
            };
        }
        if let Some(bitrate) = self.bitrate {
            config.codec.bitrate = bitrate;
        }
        config.verbose |= self.verbose;
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Help and version go to stdout and are not failures
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_devices {
        return list_devices();
    }

    let mut config = load_config(cli.config.as_ref())?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    if config.verbose {
        info!("Bits per sample: {}", config.audio.bits_per_sample);
        info!("Number of channels: {}", config.audio.channels);
        info!("Sample rate: {}", config.audio.sample_rate);
        info!(
            "Output device: {}",
            config.audio.device.as_deref().unwrap_or("default")
        );
        info!("Mode: {:?}", config.codec.mode);
    }

    let read_chunk = match config.codec.mode {
        LinkMode::Raw => config.capture.raw_chunk_bytes,
        LinkMode::Codec => config.frame_bytes(),
    };
    let source = ReaderSource::stdin(read_chunk).context("Failed to start capture input")?;
    let sink = open_sink(&config)?;

    let mut parts = SessionParts::new(Box::new(source), sink);
    if config.codec.mode == LinkMode::Codec {
        let (encoder, decoder) = build_codec(&config).context("Failed to initialise codec")?;
        parts = parts.with_codec(encoder, decoder);
    }

    let mut session = Session::start(config, parts).context("Failed to start session")?;

    let stop = session.stop_signal();
    ctrlc::set_handler(move || stop.request()).context("Failed to install interrupt handler")?;
    #[cfg(unix)]
    let _verbose_signal = voicelink::engine::VerboseSignal::spawn(session.verbosity())
        .context("Failed to install SIGUSR1 handler")?;

    let received = session.run();
    let jitter = session.jitter_stats();
    let report = session.shutdown();

    debug!(
        "Received {} datagrams ({} bytes, {} malformed); sent {} ({} failed)",
        received.datagrams,
        received.bytes,
        received.malformed,
        report.capture.datagrams_sent,
        report.capture.send_failures
    );
    if let Some(stats) = jitter {
        debug!(
            "Jitter: {} played, {} concealed, {} late, loss {:.1}%",
            stats.played,
            stats.concealed,
            stats.late,
            stats.loss_rate() * 100.0
        );
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    if let Some(path) = path {
        return AppConfig::load(path).context("Failed to load configuration");
    }
    match AppConfig::default_path() {
        Some(path) if path.exists() => {
            debug!("Loading configuration from {}", path.display());
            AppConfig::load(&path).context("Failed to load configuration")
        }
        _ => Ok(AppConfig::default()),
    }
}

#[cfg(feature = "device")]
fn open_sink(config: &AppConfig) -> Result<Box<dyn voicelink::audio::AudioSink>> {
    let sink = voicelink::audio::CpalSink::open(&config.audio)
        .context("Failed to open output device")?;
    debug!("Playing on {}", sink.device_name());
    Ok(Box::new(sink))
}

#[cfg(not(feature = "device"))]
fn open_sink(_config: &AppConfig) -> Result<Box<dyn voicelink::audio::AudioSink>> {
    anyhow::bail!("Built without audio output support (enable the `device` feature)")
}

#[cfg(feature = "device")]
fn list_devices() -> Result<()> {
    println!("\n=== Output Devices ===");
    for device in voicelink::audio::list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    Ok(())
}

#[cfg(not(feature = "device"))]
fn list_devices() -> Result<()> {
    anyhow::bail!("Built without audio output support (enable the `device` feature)")
}
