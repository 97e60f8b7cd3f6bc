use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, EnvFilter, FmtSubscriber};

mod args;
mod config;
mod error;
mod event;
mod gaps;
mod net;
mod scanner;

use args::{Cli, Command};
use config::Config;
use event::ScanEvent;
use net::Broadcaster;
use scanner::ScannerCommand;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // one-shot commands stay quiet unless RUST_LOG says otherwise
    let directive = match &cli.command {
        Command::Gaps { .. } | Command::Init => LevelFilter::WARN.into(),
        _ => LevelFilter::INFO.into(),
    };
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("logging already initialized");
    }

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    match cli.command {
        Command::Run => run(&config_path),
        Command::Listen { output } => listen(&config_path, output.as_deref()),
        Command::Gaps { file } => {
            let report = gaps::analyze_log(&file)
                .with_context(|| format!("cannot analyze {}", file.display()))?;
            print!("{report}");
            Ok(())
        }
        Command::Simulate { count } => simulate(&config_path, count),
        Command::Init => init(&config_path),
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config =
        Config::load(path).with_context(|| format!("cannot read config {}", path.display()))?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    config.log_summary();

    net::wait_for_link(&config.network)?;

    let (event_tx, event_rx) = mpsc::channel();
    let scanner_tx =
        scanner::start_scanner_thread(&config, event_tx).context("scanner startup failed")?;

    let stop_rx = shutdown_channel();
    let mut broadcaster = Broadcaster::new(config.network.source_addr(), config.broadcast_dest());
    let delay = Duration::from_millis(config.timing.main_loop_delay_ms);

    tracing::info!(dest = %config.broadcast_dest(), "scan node running");
    loop {
        if stop_rx.try_recv().is_ok() {
            tracing::info!("shutdown requested");
            break;
        }
        match event_rx.recv_timeout(delay) {
            Ok(event) => forward(&mut broadcaster, &event),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                anyhow::bail!("scanner thread stopped unexpectedly")
            }
        }
    }

    let _ = scanner_tx.send(ScannerCommand::Disconnect);
    // flush scans that arrived before the scanner saw the disconnect
    while let Ok(event) = event_rx.try_recv() {
        forward(&mut broadcaster, &event);
    }
    Ok(())
}

fn forward(broadcaster: &mut Broadcaster, event: &ScanEvent) {
    tracing::info!(seq = event.seq, barcode = %event.barcode, "scan");
    if let Err(e) = broadcaster.send(event) {
        tracing::warn!(seq = event.seq, "broadcast failed, scan dropped: {e}");
    }
}

fn listen(config_path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let socket = net::listen_socket(config.broadcast.port)?;
    tracing::info!(port = config.broadcast.port, "listening for scan broadcasts");

    let mut log = output
        .map(|path| {
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open {}", path.display()))
        })
        .transpose()?;

    let stop_rx = shutdown_channel();
    let mut buf = [0u8; 2048];
    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let Ok(line) = std::str::from_utf8(&buf[..n]) else {
            tracing::warn!(%from, "non-utf8 datagram: {}", hex::encode(&buf[..n]));
            continue;
        };
        let line = line.trim();
        match serde_json::from_str::<ScanEvent>(line) {
            Ok(event) => {
                println!("{line}");
                tracing::debug!(node = %event.node, seq = event.seq, "scan received");
                if let Some(file) = log.as_mut() {
                    writeln!(file, "{line}")?;
                }
            }
            Err(e) => tracing::warn!(%from, "ignoring malformed datagram: {e}"),
        }
    }
    Ok(())
}

fn simulate(config_path: &Path, count: Option<u64>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    net::wait_for_link(&config.network)?;

    let mut broadcaster = Broadcaster::new(config.network.source_addr(), config.broadcast_dest());
    let node = config.node_id();
    let stop_rx = shutdown_channel();

    tracing::info!(dest = %config.broadcast_dest(), "simulating one scan per second");
    let mut seq: u64 = 0;
    while count.is_none_or(|limit| seq < limit) {
        if stop_rx.recv_timeout(Duration::from_secs(1)).is_ok() {
            break;
        }
        seq += 1;
        let now = Utc::now();
        let event = ScanEvent {
            node: node.clone(),
            seq,
            // same payload the QR-per-second rig displays
            barcode: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            timestamp: now,
        };
        forward(&mut broadcaster, &event);
    }
    Ok(())
}

fn init(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("config file {} already exists", path.display());
    }
    Config::default()
        .save(path)
        .with_context(|| format!("cannot write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn shutdown_channel() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel();
    let _ = ctrlc::try_set_handler(move || {
        let _ = tx.send(());
    });
    rx
}
