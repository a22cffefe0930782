//! Myoscope command-line front end.
//!
//! ## Threads
//!
//! ```text
//! main            stdin command loop → SessionController actions
//! renderer        fixed-rate redraw into LogSurface
//! status-events   prints SessionStatusEvent JSON lines
//! (engine)        feature-extractor, device notification thread
//! ```

mod commands;
mod settings;
mod state;
mod surface;

use std::io::{self, BufRead, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use myoscope_core::display::renderer::spawn_renderer;
use myoscope_core::{
    DeviceAddress, DisplayScale, Renderer, SessionController, SimulatedDevice,
    SimulatedDeviceConfig,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::commands::{dispatch, Command, HELP};
use crate::settings::{load_settings, settings_path};
use crate::state::AppState;
use crate::surface::LogSurface;

fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("myoscope=info,myoscope_core=info")),
        )
        .with_writer(io::stderr)
        .init();

    info!("Myoscope starting");

    let settings_path = settings_path();
    let app_settings = load_settings(&settings_path);
    info!(
        settings_path = ?settings_path,
        subject = %app_settings.subject,
        shift = %app_settings.shift,
        recordings_dir = ?app_settings.recordings_dir,
        "settings loaded"
    );

    // ── Session setup ─────────────────────────────────────────────────────
    let display_config = app_settings.display_config();
    let scale = Arc::new(DisplayScale::from_config(&display_config));
    let device = SimulatedDevice::new(SimulatedDeviceConfig {
        seed: app_settings.simulator_seed,
        ..SimulatedDeviceConfig::default()
    });
    let controller = SessionController::new(
        app_settings.session_config(),
        app_settings.engine_config(),
        Arc::clone(&scale),
        Box::new(device),
    )
    .context("failed to create session")?;
    let engine = Arc::clone(controller.engine());

    // ── Status forwarding ─────────────────────────────────────────────────
    let mut status_rx = engine.subscribe_status();
    std::thread::Builder::new()
        .name("status-events".into())
        .spawn(move || loop {
            match status_rx.blocking_recv() {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("{json}"),
                    Err(e) => warn!("failed to encode status event: {e}"),
                },
                Err(RecvError::Lagged(n)) => warn!("status forwarder lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        })
        .context("failed to spawn status forwarder")?;

    // ── Renderer ──────────────────────────────────────────────────────────
    let renderer = Renderer::new(
        display_config,
        scale,
        engine.feature_receiver(),
        LogSurface::new(app_settings.frame_log_every),
    )?;
    let render_running = Arc::new(AtomicBool::new(true));
    let render_handle = spawn_renderer(renderer, Arc::clone(&render_running))?;

    let auto_connect = app_settings.device_address.clone();
    let mut state = AppState::new(controller, app_settings, settings_path);

    if let Some(address) = auto_connect {
        let address = DeviceAddress::from(address.as_str());
        match state.controller.connect_to_device(&address) {
            Ok(()) => println!("Connected to {address}"),
            Err(e) => warn!(%address, "auto-connect failed: {e}"),
        }
    }

    // ── Command loop ──────────────────────────────────────────────────────
    println!("{HELP}");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read command")?;
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => match dispatch(&mut state, command) {
                Ok(out) => println!("{out}"),
                Err(e) => eprintln!("error: {e}"),
            },
            Err(e) => eprintln!("{e}"),
        }
        io::stdout().flush().ok();
    }

    // ── Shutdown ──────────────────────────────────────────────────────────
    if let Err(e) = state.controller.shutdown() {
        warn!("session shutdown failed: {e}");
    }
    render_running.store(false, Ordering::SeqCst);
    match render_handle.join() {
        Ok((renderer, Ok(()))) => info!(
            frames = renderer.surface().frames(),
            overruns = renderer.stats().overruns,
            "renderer finished"
        ),
        Ok((_, Err(e))) => error!("renderer stopped early: {e}"),
        Err(_) => error!("renderer thread panicked"),
    }

    if let Err(e) = state.persist() {
        warn!("failed to save settings: {e}");
    }
    info!(
        handled = state.commands_handled,
        failed = state.commands_failed,
        "Myoscope exiting"
    );
    Ok(())
}
