// src/main.rs
//! Headless composer session.
//!
//! Reads uevent lines from stdin (for example
//! `change@/devices/virtual/switch/mdss_mdp/drm/card0-DP-1 status=connected`)
//! and presents a frame on every bound display once per vsync until stdin
//! closes. The final session dump is printed to stdout.

use anyhow::Context;
use composer_session::{
    config::CONFIG,
    display::DisplayType,
    error::HwcError,
    headless::{HeadlessEngine, HeadlessPowerService, HeadlessUeventTransport, RecordingSink},
    power_hint::{refresh_rate_hint, DISPLAY_IDLE_HINT},
    session::Session,
    uevent::{HotplugDispatcher, UeventListener},
};
use log::*;
use std::io::BufReader;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const PRIMARY_BACKING_ID: i32 = 0;
const EXTERNAL_BACKING_ID: i32 = 1;
const POWER_MODE_ON: i32 = 2;

fn main() -> anyhow::Result<()> {
    // Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting composer-session...");
    let config = &*CONFIG;

    let engine = HeadlessEngine::new(DisplayType::BuiltIn);
    engine.add_endpoint(PRIMARY_BACKING_ID, DisplayType::BuiltIn, true, true);
    engine.add_endpoint(EXTERNAL_BACKING_ID, DisplayType::Pluggable, false, false);

    let power = HeadlessPowerService::new([
        DISPLAY_IDLE_HINT.to_string(),
        refresh_rate_hint(60),
        refresh_rate_hint(90),
    ]);

    let session = Arc::new(
        Session::new(Arc::new(engine.clone()), power.connector(), config)
            .context("Failed to start composer session")?,
    );
    let sink = Arc::new(RecordingSink::new());
    session.register_sink(sink.clone());
    session
        .set_power_mode(0, POWER_MODE_ON)
        .context("Failed to power on primary display")?;

    let (sender, receiver) = mpsc::channel();
    let transport = HeadlessUeventTransport::new(BufReader::new(std::io::stdin()), engine);
    let listener = UeventListener::spawn(transport, sender)?;
    let dispatcher = HotplugDispatcher::spawn(Arc::clone(&session), receiver)?;

    let vsync = Duration::from_nanos(session.get_vsync_period(0)?);
    info!("Presenting every {:?}", vsync);

    let mut frames: u64 = 0;
    while listener.is_running() {
        for id in session.bound_displays() {
            if let Err(e) = session.validate_display(id.raw()) {
                warn!("Validate failed on display {}: {}", id, e);
                continue;
            }
            match session.present_display(id.raw()) {
                Ok(_) => {}
                Err(HwcError::NotValidated) => debug!("Display {} needs validation", id),
                Err(e) => warn!("Present failed on display {}: {}", id, e),
            }
        }
        frames += 1;
        thread::sleep(vsync);
    }

    // Joins once the listener has dropped its sender.
    drop(dispatcher);
    info!(
        "Input closed after {} frames, {} client notifications, {} power hints",
        frames,
        sink.notifications().len(),
        power.sets().len()
    );
    println!("{}", session.dump());
    Ok(())
}
