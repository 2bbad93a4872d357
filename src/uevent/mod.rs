// src/uevent/mod.rs
//! Kernel hotplug events.
//!
//! The listener thread only parses and forwards. Everything that touches the
//! session happens on the dispatcher thread, which consumes the channel:
//!
//! ```text
//! UeventTransport -> UeventListener --HotplugEvent--> HotplugDispatcher -> Session
//! ```

use crate::display::TestPattern;
use crate::session::Session;
use anyhow::{Context, Result};
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub const UEVENT_GRAPHICS_FB0: &str = "change@/devices/virtual/graphics/fb0";
pub const UEVENT_DRM_EXT_HOTPLUG: &str = "mdss_mdp/drm/card";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    /// The primary panel stopped responding.
    PanelDead,
    /// An external connector changed. `bpp` and `pattern` are -1 when absent.
    Hotplug {
        connected: Option<bool>,
        mst: bool,
        bpp: i32,
        pattern: i32,
    },
}

impl HotplugEvent {
    /// Test pattern requested by a hotplug event, if both parameters are set.
    pub fn test_pattern(&self) -> Option<TestPattern> {
        match *self {
            HotplugEvent::Hotplug { bpp, pattern, .. } if bpp > 0 && pattern > 0 => {
                Some(TestPattern {
                    bpp: bpp as u32,
                    pattern: pattern as u32,
                })
            }
            _ => None,
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

/// Value following `key` in the first token that contains it.
fn token_value<'a>(tokens: &[&'a str], key: &str) -> Option<&'a str> {
    tokens
        .iter()
        .find_map(|token| token.find(key).map(|at| &token[at + key.len()..]))
}

/// Leading integer of a token value, like C `atoi`. Absent keys read as -1.
fn event_value(tokens: &[&str], key: &str) -> i32 {
    let Some(value) = token_value(tokens, key) else {
        return -1;
    };
    let value = value.trim_start();
    let end = value
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
        .map_or(value.len(), |(i, _)| i);
    value[..end].parse().unwrap_or(0)
}

/// Decodes one NUL- or whitespace-separated uevent payload.
pub fn parse_uevent(payload: &str) -> Option<HotplugEvent> {
    let tokens: Vec<&str> = payload
        .split(|c: char| c == '\0' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .collect();

    if contains_ignore_case(payload, UEVENT_GRAPHICS_FB0) {
        return (event_value(&tokens, "PANEL_ALIVE=") == 0).then_some(HotplugEvent::PanelDead);
    }

    if contains_ignore_case(payload, UEVENT_DRM_EXT_HOTPLUG) {
        let status = token_value(&tokens, "status=");
        let mst = token_value(&tokens, "MST_HOTPLUG=").is_some();
        if status.is_none() && !mst {
            return None;
        }
        return Some(HotplugEvent::Hotplug {
            connected: status.map(|s| s.starts_with("connected")),
            mst,
            bpp: event_value(&tokens, "bpp="),
            pattern: event_value(&tokens, "pattern="),
        });
    }

    None
}

/// Blocking source of raw uevent payloads.
pub trait UeventTransport: Send {
    /// Next payload, `None` once the transport is closed.
    fn next_event(&mut self) -> Result<Option<String>>;
}

/// Detached thread that parses uevents and forwards them to the dispatcher.
pub struct UeventListener {
    running: Arc<AtomicBool>,
}

impl UeventListener {
    pub fn spawn<T>(mut transport: T, sender: Sender<HotplugEvent>) -> Result<Self>
    where
        T: UeventTransport + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        // Detached: the listener lives as long as its transport.
        let _handle = thread::Builder::new()
            .name("hwc-uevent".to_string())
            .spawn(move || {
                debug!("UeventListener thread started");
                loop {
                    let payload = match transport.next_event() {
                        Ok(Some(payload)) => payload,
                        Ok(None) => {
                            info!("UeventListener: Transport closed");
                            break;
                        }
                        Err(e) => {
                            error!("UeventListener: Transport failed: {:#}", e);
                            break;
                        }
                    };
                    let Some(event) = parse_uevent(&payload) else {
                        trace!("UeventListener: Ignoring {:?}", payload);
                        continue;
                    };
                    debug!("UeventListener: {:?}", event);
                    if sender.send(event).is_err() {
                        info!("UeventListener: Dispatcher gone, exiting");
                        break;
                    }
                }
                flag.store(false, Ordering::SeqCst);
            })
            .context("Failed to spawn uevent listener thread")?;

        Ok(Self { running })
    }

    /// False once the transport closed or the dispatcher went away.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Applies hotplug events to the session, one at a time.
pub struct HotplugDispatcher {
    thread_handle: Option<JoinHandle<()>>,
}

impl HotplugDispatcher {
    /// Consumes `events` until every sender is dropped.
    pub fn spawn(session: Arc<Session>, events: Receiver<HotplugEvent>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("hwc-hotplug".to_string())
            .spawn(move || {
                debug!("HotplugDispatcher thread started");
                for event in events {
                    dispatch(&session, event);
                }
                debug!("HotplugDispatcher thread exiting");
            })
            .context("Failed to spawn hotplug dispatcher thread")?;

        Ok(Self {
            thread_handle: Some(handle),
        })
    }
}

fn dispatch(session: &Session, event: HotplugEvent) {
    match event {
        HotplugEvent::PanelDead => {
            warn!("HotplugDispatcher: Primary panel is dead");
            session.request_panel_reset();
        }
        HotplugEvent::Hotplug { connected, mst, .. } => {
            info!(
                "HotplugDispatcher: Hotplug connected={:?} mst={} test_pattern={:?}",
                connected,
                mst,
                event.test_pattern()
            );
            session.set_hotplug_params(event.test_pattern());
            if let Err(e) = session.handle_hotplug(true) {
                if e.is_fatal() {
                    error!("HotplugDispatcher: {}", e);
                    std::process::abort();
                }
                error!("HotplugDispatcher: Could not handle hotplug, event dropped: {}", e);
            }
        }
    }
}

impl Drop for HotplugDispatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("HotplugDispatcher thread panicked: {:?}", e);
            }
        }
    }
}
