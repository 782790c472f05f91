use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};

use tuner::{
    Arrangement, CpalBackend, EngineConfig, HeadlessBackend, PlaybackMode, Player, ReapPolicy, render_to_wav,
    server,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Engine settings as JSON; the flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output device name (default device if omitted)
    #[arg(long, global = true)]
    device: Option<String>,

    /// Fixed device buffer size in frames
    #[arg(long, global = true)]
    buffer_size: Option<u32>,

    /// How finished voices are dropped
    #[arg(long, global = true, value_enum)]
    reap: Option<Reap>,

    /// Render on a timed thread instead of a sound card
    #[arg(long, global = true)]
    headless: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play an arrangement file (.json, .txt or .mid) and exit when it ends
    File { path: PathBuf },

    /// Play notes received over TCP, one JSON record per line
    Server {
        #[arg(long, default_value = server::DEFAULT_ADDR)]
        addr: String,
    },

    /// Render an arrangement file to a 32-bit float WAV
    Render {
        path: PathBuf,
        output: PathBuf,

        #[arg(long)]
        sample_rate: Option<u32>,

        #[arg(long)]
        channels: Option<u16>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Reap {
    LeadingRun,
    All,
}

impl From<Reap> for ReapPolicy {
    fn from(reap: Reap) -> Self {
        match reap {
            Reap::LeadingRun => ReapPolicy::LeadingRun,
            Reap::All => ReapPolicy::All,
        }
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Could not read config {}", path.display()))?;
            serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    if cli.device.is_some() {
        config.device = cli.device.clone();
    }
    if cli.buffer_size.is_some() {
        config.buffer_size = cli.buffer_size;
    }
    if let Some(reap) = cli.reap {
        config.reap_policy = reap.into();
    }
    Ok(config)
}

fn load_arrangement(path: &Path) -> Result<Arrangement> {
    let arrangement = Arrangement::load(path).with_context(|| format!("Could not load {}", path.display()))?;
    info!(
        "Loaded {} notes from {} ({:.2}s)",
        arrangement.len(),
        path.display(),
        arrangement.duration()
    );
    Ok(arrangement)
}

fn start_player(config: &EngineConfig, headless: bool, arrangement: Arrangement, mode: PlaybackMode) -> Result<Player> {
    let player = if headless {
        Player::start(HeadlessBackend::new(config).realtime(true), config, arrangement, mode)?
    } else {
        let backend = CpalBackend::new(config).context("Could not open audio output")?;
        Player::start(backend, config, arrangement, mode)?
    };
    Ok(player)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Command::File { path } => {
            let arrangement = load_arrangement(path)?;
            let mut player = start_player(&config, cli.headless, arrangement, PlaybackMode::DrainAndQuit)?;
            player.run().context("Playback failed")?;
        }
        Command::Server { addr } => {
            let listener = TcpListener::bind(addr.as_str()).with_context(|| format!("Could not bind {}", addr))?;
            let mut player = start_player(&config, cli.headless, Arrangement::new(), PlaybackMode::RunForever)?;

            let notes = player.note_sender();
            let quit = player.quit_handle();
            thread::Builder::new()
                .name("tuner-server".to_string())
                .spawn(move || {
                    if let Err(e) = server::serve_on(listener, notes, quit.clone()) {
                        error!("Server stopped: {}", e);
                        quit.quit();
                    }
                })
                .context("Could not start server thread")?;

            player.run().context("Playback failed")?;
        }
        Command::Render { path, output, sample_rate, channels } => {
            let mut config = config;
            if let Some(rate) = sample_rate {
                config = config.with_sample_rate(*rate);
            }
            if let Some(channels) = channels {
                config = config.with_channels(*channels);
            }
            let arrangement = load_arrangement(path)?;
            render_to_wav(arrangement, &config, output)
                .with_context(|| format!("Could not render to {}", output.display()))?;
        }
    }

    Ok(())
}
