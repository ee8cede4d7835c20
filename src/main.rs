//! CLI Entry Point for the heliostat
//!
//! Provides command-line interface for:
//! - Running the control service (GRBL link, control loop, operator websocket)
//! - Listing serial ports and probing them for the GRBL banner
//! - Printing the sun and mirror position for a time and place
//!
//! # Usage
//!
//! Run the service:
//! ```bash
//! heliostat run --config heliostat.toml
//! ```
//!
//! Inspect a moment without hardware:
//! ```bash
//! heliostat sun --lat -36.9565 --long 174.7777 --at 2023-12-21T23:00:00Z
//! ```

// Global allocator, as for the other long-running services
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use heliostat::config::Settings;
use heliostat::controller::{spawn_status_poller, Controller, DEFAULT_LOCATION};
use heliostat::ephemeris::{SunCalc, SunEphemeris};
use heliostat::geometry::{mirror_target, Direction, GeoPosition};
use heliostat::hardware::gcode;
use heliostat::hardware::serial::list_ports;
use heliostat::hardware::{discover, probe, MotionLink};
use heliostat::transport::{self, publisher_for, Subscribers, TransportState};
use heliostat::{logging, shutdown, HelioResult};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "heliostat")]
#[command(about = "Sun-tracking heliostat controller for GRBL mounts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to GRBL and keep the mirror on target
    Run {
        /// Config file (defaults to ./heliostat.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Serial port, skipping discovery
        #[arg(long)]
        port: Option<String>,

        /// Websocket listen address
        #[arg(long)]
        listen: Option<String>,
    },

    /// List serial ports
    Ports {
        /// Open each port and look for the GRBL banner
        #[arg(long)]
        probe: bool,

        /// Config file for link settings
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print sun position, mirror direction and motion command
    Sun {
        /// Latitude in degrees
        #[arg(long, allow_negative_numbers = true, default_value_t = DEFAULT_LOCATION.lat)]
        lat: f64,

        /// Longitude in degrees
        #[arg(long, allow_negative_numbers = true, default_value_t = DEFAULT_LOCATION.long)]
        long: f64,

        /// RFC 3339 time (defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Target azimuth in degrees (south = 0, west positive)
        #[arg(long, allow_negative_numbers = true, default_value_t = 0.0)]
        target_azi: f64,

        /// Target altitude in degrees
        #[arg(long, allow_negative_numbers = true, default_value_t = 0.0)]
        target_alt: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            port,
            listen,
        } => run_service(config, port, listen).await,
        Commands::Ports { probe, config } => list_serial_ports(probe, config).await,
        Commands::Sun {
            lat,
            long,
            at,
            target_azi,
            target_alt,
        } => print_sun(
            GeoPosition { lat, long },
            at.unwrap_or_else(Utc::now),
            Direction::from_degrees(target_azi, target_alt),
        ),
    }
}

async fn run_service(
    config: Option<PathBuf>,
    port: Option<String>,
    listen: Option<String>,
) -> Result<()> {
    let mut settings = Settings::load(config.as_deref()).context("loading configuration")?;
    if port.is_some() {
        settings.link.port = port;
    }
    if let Some(listen) = listen {
        settings.transport.listen = listen;
    }
    settings.validate()?;

    logging::init_from_settings(&settings)?;
    info!(name = %settings.application.name, "Heliostat starting");

    let controller_settings = settings.controller_settings()?;
    let link: Arc<dyn MotionLink> = Arc::new(
        discover(&settings.link_settings())
            .await
            .context("connecting to GRBL")?,
    );

    let (trigger, signal) = shutdown::channel();
    let subscribers = Subscribers::new();
    let (publisher, fanout) = publisher_for(
        subscribers.clone(),
        settings.controller.outbound_capacity,
        signal.clone(),
    );
    let (inbound_tx, inbound_rx) = mpsc::channel(settings.controller.inbound_capacity);

    let transport_state = TransportState {
        subscribers,
        inbound: inbound_tx,
        client_queue: settings.transport.client_queue,
        shutdown: signal.clone(),
    };
    let listen = settings.transport.listen.clone();
    let mut server = tokio::spawn(async move { transport::serve(&listen, transport_state).await });

    let poller = settings
        .status_poll_period()
        .map(|period| spawn_status_poller(link.clone(), period, publisher.clone(), signal.clone()));

    let mut controller = Controller::new(link, Box::new(SunCalc), publisher, controller_settings);
    let mut control = tokio::spawn(async move { controller.run(inbound_rx, signal).await });

    let mut control_result = None;
    let mut server_result = None;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("Could not listen for Ctrl-C: {}", e);
            }
            info!("Shutdown requested");
        }
        res = &mut control => control_result = Some(joined(res)),
        res = &mut server => server_result = Some(joined(res)),
    }

    // Every task observes this and unwinds.
    let _ = trigger.send(true);

    let control_result = match control_result {
        Some(r) => r,
        None => joined(control.await),
    };
    let server_result = match server_result {
        Some(r) => r,
        None => joined(server.await),
    };
    if let Err(e) = fanout.await {
        warn!("Fan-out task failed: {}", e);
    }
    if let Some(poller) = poller {
        if let Err(e) = poller.await {
            warn!("Status poller failed: {}", e);
        }
    }

    control_result.context("control loop stopped")?;
    server_result.context("operator transport stopped")?;
    info!("Heliostat stopped");
    Ok(())
}

fn joined(res: std::result::Result<HelioResult<()>, JoinError>) -> Result<()> {
    res.context("task panicked")?.map_err(anyhow::Error::from)
}

async fn list_serial_ports(probe_ports: bool, config: Option<PathBuf>) -> Result<()> {
    let settings = Settings::load(config.as_deref()).context("loading configuration")?;
    logging::init_from_settings(&settings)?;

    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }

    let link_settings = settings.link_settings();
    for port in ports {
        if !probe_ports {
            println!("{}  ({})", port.name, port.kind);
            continue;
        }
        match probe(&port.name, &link_settings).await {
            Ok(banner) => println!("{}  ({})  {}", port.name, port.kind, banner),
            Err(e) => println!("{}  ({})  no banner: {}", port.name, port.kind, e),
        }
    }
    Ok(())
}

fn print_sun(location: GeoPosition, at: DateTime<Utc>, target: Direction) -> Result<()> {
    let sun = SunCalc.sun_position(at, location);
    let (sun_azi, sun_alt) = sun.to_degrees();
    println!("time     {}", at.to_rfc3339());
    println!("location lat {:.4}  long {:.4}", location.lat, location.long);
    println!("sun      azi {:9.4}  alt {:8.4}", sun_azi, sun_alt);

    let mirror = mirror_target(sun, target).context("computing mirror direction")?;
    let (azi, alt) = mirror.to_degrees();
    println!("mirror   azi {:9.4}  alt {:8.4}", azi, alt);

    let command = gcode::encode(azi, alt, 0.0, 0.0).context("encoding motion command")?;
    print!("command  {}", String::from_utf8_lossy(&command));
    Ok(())
}
