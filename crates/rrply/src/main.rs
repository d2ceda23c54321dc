mod cli;
mod control;
mod countdown;
mod driver;
mod engine;
mod gateway;
mod hotkey;
mod lifecycle;
mod session;

use anyhow::Context;
use rrply_proto::config::Config;
use rrply_proto::directory::{parse_channel_choice, ChannelDirectory};
use rrply_proto::platform;
use rrply_proto::protocol::{Command, Reply};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::driver::Driver;
use crate::engine::mpv::MpvEngine;
use crate::gateway::{RockRadioClient, TrackSource};
use crate::hotkey::BindingsWatcher;
use crate::lifecycle::Lifecycle;
use crate::session::Session;

/// File log always; stdout too with `-verbose`.
fn init_logging(verbose: bool) -> anyhow::Result<PathBuf> {
    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("rrply.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stdout_layer = verbose.then(|| tracing_subscriber::fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rrply=debug")),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = cli::Args::parse_normalized();
    let log_path = init_logging(args.verbose)?;
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    match args.client_command() {
        Some(cmd) => run_client(&config, cmd).await,
        None => run_player(&config, args.channel).await,
    }
}

async fn run_client(config: &Config, cmd: Command) -> anyhow::Result<ExitCode> {
    match control::request(&config.control_address(), cmd).await? {
        Reply::Status {
            status,
            channel_id,
            track,
        } => {
            let channel = channel_id.map(|id| id.to_string()).unwrap_or_default();
            match track {
                Some(track) => println!("{} (channel {}): {}", status, channel, track),
                None => println!("{} (channel {})", status, channel),
            }
            Ok(ExitCode::SUCCESS)
        }
        Reply::Error { message } => {
            println!("Error: {}", message);
            Ok(ExitCode::from(1))
        }
    }
}

async fn run_player(config: &Config, channel: u64) -> anyhow::Result<ExitCode> {
    let hotkeys = BindingsWatcher::open(platform::hotkey_config_path())?;
    let client = RockRadioClient::new(&config.station)?;

    let directory = ChannelDirectory::load_or_refresh(
        &platform::channel_cache_path(),
        Duration::from_secs(config.cache_max_age_secs()),
        || async { client.fetch_channels().await.map_err(anyhow::Error::from) },
    )
    .await?;

    let mut stdin = hotkey::stdin_lines()?;
    let channel_id = match channel {
        0 => prompt_channel(&directory, &mut stdin).await?,
        id => id,
    };
    match directory.get(channel_id) {
        Some(channel) => println!("\nPlaying: {}", channel.title),
        None => warn!("Channel {} is not in the channel directory", channel_id),
    }

    let token = client.fetch_token().await.map_err(|e| {
        anyhow::anyhow!("fetching audio token ({:?} failure): {}", e.kind(), e)
    })?;
    let engine = MpvEngine::start().await?;
    let session = Arc::new(Session::new(
        Arc::new(engine),
        Arc::new(client),
        channel_id,
        token,
    ));

    let lifecycle = Lifecycle::new();
    let mut tasks = JoinSet::new();

    tasks.spawn(lifecycle.guard("signals", lifecycle.clone().listen_for_signals()));
    tasks.spawn(lifecycle.guard(
        "hotkeys",
        hotkey::listen(stdin, hotkeys.subscribe(), Arc::clone(&session)),
    ));
    if config.control.enabled {
        match control::bind(&config.control_address()).await {
            Ok(listener) => {
                tasks.spawn(control::serve(
                    listener,
                    Arc::clone(&session),
                    hotkeys.subscribe(),
                    lifecycle.clone(),
                ));
            }
            Err(e) => warn!(
                "Control socket {} unavailable, --toggle/--key won't reach this player: {}",
                config.control_address(),
                e
            ),
        }
    }
    let poll = Duration::from_secs(config.hotkeys.poll_interval_secs.max(1));
    tasks.spawn(hotkeys.run(poll));

    let driver = tokio::spawn(lifecycle.guard(
        "playback",
        Driver::new(Arc::clone(&session), lifecycle.token()).run(),
    ));

    lifecycle.cancelled().await;
    Ok(lifecycle.wind_down(&session, driver, tasks).await)
}

/// List the channels and read the chosen id from `input`.
async fn prompt_channel(
    directory: &ChannelDirectory,
    input: &mut mpsc::Receiver<String>,
) -> anyhow::Result<u64> {
    println!("Choose channel:");
    for line in directory.menu_lines() {
        println!("{}", line);
    }
    print!("\nChannel: ");
    std::io::stdout().flush()?;

    let answer = input
        .recv()
        .await
        .context("standard input closed before a channel was chosen")?;
    parse_channel_choice(&answer)
}
