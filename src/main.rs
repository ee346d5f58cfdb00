// Module layout: frame codec, serial link, record decoding, batching, sink.
mod config;
mod dispatch;
mod link;
mod pipeline;
mod proto;
mod record;
mod sink;

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use crate::dispatch::{flush_channel, spawn_sink_writer, BatchDispatcher};
use crate::link::{NodeLink, READ_TIMEOUT};
use crate::pipeline::run_poll_loop;
use crate::sink::InfluxWriter;

/// Ingress gateway between a serial sensor node and InfluxDB.
#[derive(Parser)]
#[command(name = "sensornet-ingress", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Push the current wall-clock time to the node, then exit.
    SyncTime,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let level = config::level_filter(&config.log.level);
    env_logger::Builder::new()
        .filter_level(level.unwrap_or(log::LevelFilter::Info))
        .init();
    if level.is_none() {
        log::warn!(
            "Unknown log level {:?}, defaulting to INFO",
            config.log.level
        );
    }

    log::info!(
        "Opening serial port {} at {} baud",
        config.serial.port,
        config.serial.baud_rate
    );
    let port = serialport::new(config.serial.port.as_str(), config.serial.baud_rate)
        .timeout(READ_TIMEOUT)
        .open()
        .with_context(|| format!("opening serial port {}", config.serial.port))?;
    let mut link = NodeLink::new(port);

    if let Some(Command::SyncTime) = cli.command {
        let (secs, micros) = wall_clock();
        link.sync_time(secs, micros).context("time sync")?;
        log::info!("Node acknowledged time sync");
        return Ok(());
    }

    // The poll loop owns the link exclusively, so time sync can only happen
    // here, before polling starts.
    if config.gateway.sync_time_on_start {
        let (secs, micros) = wall_clock();
        match link.sync_time(secs, micros) {
            Ok(()) => log::info!("Node acknowledged time sync"),
            Err(err) => log::warn!("Startup time sync failed: {}", err),
        }
    }

    let sink = InfluxWriter::new(
        &config.influx.url,
        &config.influx.org,
        &config.influx.bucket,
        &config.influx.token,
    );
    let (flush_tx, flush_rx) = flush_channel(config.gateway.flush_queue_depth);
    let _writer = spawn_sink_writer(flush_rx, sink);
    let dispatcher = BatchDispatcher::new(config.gateway.batch_size, flush_tx);

    log::info!(
        "Polling node every {} ms, batch size {}",
        config.gateway.poll_interval_ms,
        config.gateway.batch_size
    );
    run_poll_loop(
        link,
        dispatcher,
        Duration::from_millis(config.gateway.poll_interval_ms),
    )
}

/// Current wall-clock time as (seconds, microseconds-of-second).
fn wall_clock() -> (u32, u32) {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => (elapsed.as_secs() as u32, elapsed.subsec_micros()),
        Err(_) => (0, 0),
    }
}
