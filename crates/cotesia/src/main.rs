//! `cotesia` - CLI for the aerial release controller
//!
//! This binary runs the release controller and provides maintenance
//! commands for stored flights, sealed logs, and configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use cotesia::cli::{Cli, Command, ConfigCommand, DecryptCommand, FlightsCommand, RunCommand};
use cotesia::runtime::Controller;
use cotesia::{init_logging, seal, Config, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Run(run_cmd) => handle_run(config, &run_cmd).await,
        Command::Flights(flights_cmd) => handle_flights(&config, flights_cmd),
        Command::Decrypt(decrypt_cmd) => handle_decrypt(&config, decrypt_cmd),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

async fn handle_run(mut config: Config, cmd: &RunCommand) -> anyhow::Result<()> {
    if cmd.simulate {
        config.actuator.simulate = true;
    }

    // The control handle is where an outer command surface would hang
    // off; the controller runs standalone without one.
    let (controller, _handle) = Controller::new(&config)?;

    tokio::select! {
        result = controller.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }
    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<SessionStore> {
    let sealer = seal::resolve(&config.log_key_path());
    Ok(SessionStore::open(config.data_dir(), sealer)?)
}

fn handle_flights(config: &Config, cmd: FlightsCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;

    match cmd {
        FlightsCommand::List { json } => {
            let sessions = store.list_sessions()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("No stored flights in {}", store.data_dir().display());
            } else {
                println!("{:>6}  {:>5}  {:<19}  {:>9}  {:>5}", "global", "daily", "created", "status", "tubes");
                for s in sessions {
                    println!(
                        "{:>6}  {:>5}  {:<19}  {:>9}  {:>5}",
                        s.global_number,
                        s.daily_number,
                        s.date_human,
                        if s.completed { "complete" } else { "incomplete" },
                        s.tubes.map_or_else(|| "-".to_string(), |t| t.to_string()),
                    );
                }
            }
        }
        FlightsCommand::Show { number, json } => {
            let meta = store.read_session(number)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&meta)?);
            } else {
                println!("Flight {} ({})", meta.global_number, meta.id);
                println!("  Created:    {}", meta.date_human);
                println!("  Directory:  {}", meta.relative_dir);
                println!(
                    "  Status:     {}",
                    if meta.completed { "complete" } else { "incomplete" }
                );
                if let Some(tubes) = meta.tubes {
                    println!("  Tubes:      {tubes}");
                }
                if let Some(duration) = meta.duration_secs {
                    println!("  Duration:   {duration:.0}s");
                }
                if let Some(speed) = meta.mean_speed_kmh {
                    println!("  Mean speed: {speed:.1} km/h");
                }
                println!(
                    "  Log:        {} ({})",
                    meta.files.log,
                    if meta.log_encrypted { "encrypted" } else { "plaintext" }
                );
            }
        }
        FlightsCommand::Delete { number, yes } => {
            if !yes {
                println!("This will delete flight {number} and all its files.");
                println!("Use --yes to confirm.");
                return Ok(());
            }
            store.delete_session(number)?;
            println!("Flight {number} deleted.");
        }
    }
    Ok(())
}

fn handle_decrypt(config: &Config, cmd: DecryptCommand) -> anyhow::Result<()> {
    let key = cmd.key.unwrap_or_else(|| config.log_key_path());
    let output = cmd.output.unwrap_or_else(|| {
        let name = cmd.log.to_string_lossy();
        match name.strip_suffix(".enc") {
            Some(stripped) => PathBuf::from(stripped),
            None => cmd.log.with_extension("decrypted.txt"),
        }
    });

    seal::unseal_file(&cmd.log, &key, &output)?;
    println!("Decrypted log written to {}", output.display());
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Telemetry]");
                println!(
                    "  Device:          {}",
                    config
                        .telemetry
                        .device
                        .as_ref()
                        .map_or_else(|| "auto-probe".to_string(), |d| d.display().to_string())
                );
                println!("  Baud rate:       {}", config.telemetry.baud_rate);
                println!("  Tick interval:   {} ms", config.telemetry.tick_interval_ms);
                println!("  Min satellites:  {}", config.telemetry.min_satellites);
                println!("  Max PDOP:        {}", config.telemetry.max_pdop);
                println!();
                println!("[Cycle]");
                println!("  Trigger distance: {} m", config.cycle.trigger_distance_m);
                println!("  Stop speed:       {} m/s", config.cycle.stop_speed_ms);
                println!("  Stop duration:    {} s", config.cycle.stop_duration_secs);
                println!("  Operating speed:  {} m/s", config.cycle.operating_speed_ms);
                println!("  Start speed:      {} m/s", config.cycle.start_speed_ms);
                println!();
                println!("[Actuator]");
                println!("  Simulate:        {}", config.actuator.simulate);
                println!("  PWM chip:        {}", config.actuator.pwm_chip.display());
                println!(
                    "  Channels:        A={} B={}",
                    config.actuator.channel_a, config.actuator.channel_b
                );
                println!();
                println!("[Storage]");
                println!("  Data dir:        {}", config.data_dir().display());
                println!("  Log key:         {}", config.log_key_path().display());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
