// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod anomaly;
mod config;
mod executor;
mod handlers;
mod heading;
mod router;
mod runner;
mod sim;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use wpx_actuator::{BuiltinDevices, GamepadBindings, RegistrationContext};
use wpx_app::{init_logging, ConfigFile};
use wpx_core::actuator::ActuatorMode;
use wpx_core::route::Route;
use wpx_core::DynResult;

use config::EngineConfig;
use handlers::HandlerRegistry;
use router::ActuatorRouter;
use runner::RouteRunner;
use sim::{SimTeleportHandler, SimWorld};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - waypoint route executor");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Route file (JSON) to execute
    #[arg(short = 'r', long = "route", value_name = "FILE")]
    route: Option<PathBuf>,
    /// Actuation backend (keyboard-mouse, gamepad)
    #[arg(short = 'b', long = "backend")]
    backend: Option<ActuatorMode>,
    /// Simulate a missing virtual gamepad driver
    #[arg(long = "no-gamepad-bus")]
    no_gamepad_bus: bool,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

fn build_router(world: &Arc<SimWorld>, cfg: &EngineConfig) -> ActuatorRouter {
    let mut registry = RegistrationContext::new();
    wpx_actuator::register_builtin_actuators_on(
        &mut registry,
        BuiltinDevices {
            input_sink: world.clone(),
            kbm: cfg.actuator.kbm_settings(),
            pad_bus: cfg
                .simulation
                .pad_bus_available
                .then(|| world.clone() as Arc<dyn wpx_actuator::VirtualPadBus>),
            gamepad: cfg.actuator.gamepad_settings(),
            gamepad_bindings: GamepadBindings::default(),
        },
    );
    ActuatorRouter::new(registry, cfg.actuator.switch_lock_timeout())
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", EngineConfig::example_combined_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = EngineConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level.clone() {
        cfg.general.log_level = Some(level);
    }
    if let Some(backend) = cli.backend {
        cfg.actuator.backend = backend;
    }
    if cli.no_gamepad_bus {
        cfg.simulation.pad_bus_available = false;
    }
    cfg.validate()
        .map_err(|e| format!("Invalid engine configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let route_path = cli.route.clone().or_else(|| cfg.general.route.clone()).ok_or(
        "Route not specified. Use --route or set [general].route in config.",
    )?;
    let route = Route::load(&route_path)?;
    info!(
        "Loaded route '{}' from {} ({} waypoints, {} segments)",
        route.info.name,
        route_path.display(),
        route.positions.len(),
        route.segments().len()
    );

    let world = Arc::new(SimWorld::new(cfg.simulation));
    let router = Arc::new(build_router(&world, &cfg));
    if !router.switch_to(cfg.actuator.backend).await {
        warn!(
            "Requested {} backend unavailable, continuing with {:?}",
            cfg.actuator.backend,
            router.current_mode().await
        );
    }

    let mut handlers = HandlerRegistry::with_builtins(router.clone());
    handlers.set_teleport_handler(SimTeleportHandler::new(world.clone()));

    let runner = RouteRunner::new(router.clone(), world.clone(), handlers, cfg);
    let mut handle = runner.start(route);

    tokio::select! {
        _ = handle.finished() => {
            if handle.is_success_complete() {
                info!("Run {} completed the route", handle.run_id());
            }
        }
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Ctrl+C received, stopping run");
            handle.request_cancel();
        }
    }
    let status = handle.wait().await;
    router.dispose().await;

    println!("{}", serde_json::to_string_pretty(&status)?);
    if !status.is_success() {
        return Err(format!("Route did not complete: {}", status).into());
    }
    Ok(())
}
