use std::sync::Arc;

use clap::{CommandFactory, Parser};

use infinity_bridge::state::poller::{state_poller, stats_poller, DEFAULT_PROBE_TABLES};
use infinity_bridge::state::{AirHandlerView, DamperView, HeatPumpView, StateCache};
use infinity_bridge::{attach_snoops, EngineConfig, ProtocolEngine, SerialLink};

#[derive(Debug, Parser)]
#[command(about = "Bridge and observer for the Carrier Infinity ABCD bus")]
struct Cli {
    /// Path to the serial port
    #[arg(long)]
    serial: Option<String>,

    /// HTTP port for the external web collaborator
    #[arg(long, default_value_t = 8080)]
    httpport: u16,

    /// URL for the external MQTT broker collaborator
    #[arg(long)]
    mqtt: Option<String>,

    /// Enable response frame logging
    #[arg(long)]
    rlog: bool,

    /// Enable debug log level
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_secs()
        .init();

    let Some(serial) = cli.serial else {
        eprintln!("must provide serial");
        let _ = Cli::command().print_help();
        std::process::exit(1);
    };

    let link = SerialLink::open(&serial)
        .unwrap_or_else(|e| panic!("error opening serial port: {e}"));

    let cache = Arc::new(StateCache::new());
    cache.update("blower", AirHandlerView::default());
    cache.update("heatpump", HeatPumpView::default());
    cache.update("damperpos", DamperView::default());

    let mut engine = ProtocolEngine::new(link, Arc::clone(&cache)).with_config(EngineConfig {
        log_frames: cli.rlog,
        ..Default::default()
    });
    attach_snoops(&mut engine);
    let bus = engine.spawn();

    log::info!("cache ready for HTTP collaborator on port {}", cli.httpport);
    if let Some(broker) = &cli.mqtt {
        let has_pass = std::env::var("MQTTPASS").is_ok();
        log::info!("MQTT mirror keys active for {broker} (MQTTPASS set: {has_pass})");
    }

    let poller = tokio::spawn(state_poller(
        bus.clone(),
        Arc::clone(&cache),
        DEFAULT_PROBE_TABLES.to_vec(),
    ));
    let stats = tokio::spawn(stats_poller(bus));

    // the bridge runs until the process is killed
    let _ = tokio::join!(poller, stats);
}
