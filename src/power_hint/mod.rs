// src/power_hint/mod.rs
//! Background worker that pushes refresh-rate and idle hints to the power service.
//!
//! Producers never touch hint state. They drop a value snapshot into the
//! worker's mailbox and return immediately:
//!
//! - `signal_refresh_rate(mode, vsync_period)` after every power-mode or
//!   config change
//! - `signal_idle()` after every present, pushing the idle deadline forward
//!
//! The worker sleeps until signalled, until the idle deadline passes, or
//! until a failed refresh-rate update is due for another attempt. Hint
//! failures only surface in the log and in the worker's cached state.

pub mod service;

use crate::config::PowerHintConfig;
use crate::display::PowerMode;
use anyhow::{Context, Result};
use log::*;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub use service::{HintError, PowerService, PowerServiceConnector};

pub const DISPLAY_IDLE_HINT: &str = "DISPLAY_IDLE";

/// Name of the refresh-rate hint for `rate` frames per second.
pub fn refresh_rate_hint(rate: u32) -> String {
    format!("REFRESH_{}FPS", rate)
}

/// Rounds `1 / vsync_period` to the nearest multiple of ten fps.
pub fn refresh_rate_for_period(vsync_period_ns: u64) -> u32 {
    if vsync_period_ns == 0 {
        return 0;
    }
    let fps = 1_000_000_000f64 / vsync_period_ns as f64;
    ((fps * 0.1).round() * 10.0) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Support {
    Unknown,
    Supported,
    Unsupported,
}

/// Last-known desired state, written by producers and drained by the worker.
struct Mailbox {
    /// Set by every signal so a wakeup sent before the worker waits is not lost.
    signalled: bool,
    needs_refresh_rate_update: bool,
    power_mode: PowerMode,
    vsync_period_ns: u64,
    idle_deadline: Instant,
    idle_support: Support,
    idle_enabled: bool,
    /// Set after an idle hint failed; cleared by the next `signal_idle`.
    idle_stalled: bool,
    retry_at: Option<Instant>,
    exit: bool,
}

struct Shared {
    mailbox: Mutex<Mailbox>,
    wake: Condvar,
}

/// Snapshot taken under the mailbox lock before any hint I/O.
struct Wakeup {
    update_refresh_rate: bool,
    power_mode: PowerMode,
    vsync_period_ns: u64,
    idle_deadline: Instant,
}

pub struct PowerHintWorker {
    shared: Arc<Shared>,
    idle_timeout: Duration,
    thread_handle: Option<JoinHandle<()>>,
}

impl PowerHintWorker {
    /// Spawns the worker thread. The service is connected lazily on first use.
    pub fn spawn(
        connector: Arc<dyn PowerServiceConnector>,
        config: &PowerHintConfig,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            mailbox: Mutex::new(Mailbox {
                signalled: false,
                needs_refresh_rate_update: false,
                power_mode: PowerMode::Off,
                vsync_period_ns: config.initial_vsync_period_ns,
                idle_deadline: Instant::now(),
                idle_support: Support::Unknown,
                idle_enabled: false,
                idle_stalled: false,
                retry_at: None,
                exit: false,
            }),
            wake: Condvar::new(),
        });

        let mut state = HintState {
            connector,
            service: None,
            prev_refresh_rate: 0,
            pending_prev_refresh_rate: 0,
            refresh_rate_support: HashMap::new(),
        };
        let worker_shared = Arc::clone(&shared);
        let retry_backoff = config.retry_backoff();

        let thread_handle = thread::Builder::new()
            .name("display-hints".to_string())
            .spawn(move || {
                info!("PowerHintWorker: Started");
                state.run(&worker_shared, retry_backoff);
                debug!("PowerHintWorker: Thread exiting");
            })
            .context("Failed to spawn power hint worker thread")?;

        Ok(Self {
            shared,
            idle_timeout: config.idle_timeout(),
            thread_handle: Some(thread_handle),
        })
    }

    /// Records the latest power mode and vsync period and wakes the worker.
    pub fn signal_refresh_rate(&self, power_mode: PowerMode, vsync_period_ns: u64) {
        let mut mailbox = self.shared.mailbox.lock().unwrap();
        mailbox.power_mode = power_mode;
        mailbox.vsync_period_ns = vsync_period_ns;
        mailbox.needs_refresh_rate_update = true;
        mailbox.retry_at = None;
        mailbox.signalled = true;
        self.shared.wake.notify_one();
    }

    /// Pushes the idle deadline forward and wakes the worker.
    pub fn signal_idle(&self) {
        let mut mailbox = self.shared.mailbox.lock().unwrap();
        if mailbox.idle_support == Support::Unsupported {
            return;
        }
        mailbox.idle_deadline = Instant::now() + self.idle_timeout;
        mailbox.idle_stalled = false;
        mailbox.signalled = true;
        self.shared.wake.notify_one();
    }
}

impl Drop for PowerHintWorker {
    fn drop(&mut self) {
        debug!("PowerHintWorker dropped");
        self.shared.mailbox.lock().unwrap().exit = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                error!("PowerHintWorker thread panicked: {:?}", e);
            }
        }
    }
}

/// Hint bookkeeping owned by the worker thread.
struct HintState {
    connector: Arc<dyn PowerServiceConnector>,
    service: Option<Arc<dyn PowerService>>,
    prev_refresh_rate: u32,
    /// A rate whose disable failed; disabled first on the next update.
    pending_prev_refresh_rate: u32,
    refresh_rate_support: HashMap<u32, bool>,
}

impl HintState {
    fn run(&mut self, shared: &Shared, retry_backoff: Duration) {
        while let Some(wakeup) = Self::wait_for_work(shared) {
            match self.update_idle_hint(shared, wakeup.idle_deadline) {
                Ok(()) | Err(HintError::Unsupported) => {}
                // Not retried until the next signal_idle.
                Err(_) => shared.mailbox.lock().unwrap().idle_stalled = true,
            }

            if !wakeup.update_refresh_rate {
                continue;
            }
            match self.update_refresh_rate_hint(wakeup.power_mode, wakeup.vsync_period_ns) {
                Ok(()) | Err(HintError::Unsupported) => {}
                Err(HintError::Transport) => {
                    warn!("PowerHintWorker: Service unreachable, waiting for next signal");
                }
                Err(e) => {
                    let mut mailbox = shared.mailbox.lock().unwrap();
                    if mailbox.power_mode == PowerMode::On && !mailbox.needs_refresh_rate_update {
                        debug!("PowerHintWorker: Retrying refresh rate hint after {}", e);
                        mailbox.retry_at = Some(Instant::now() + retry_backoff);
                    }
                }
            }
        }
    }

    /// Blocks until there is something to do. `None` means exit.
    fn wait_for_work(shared: &Shared) -> Option<Wakeup> {
        let mut mailbox = shared.mailbox.lock().unwrap();
        if mailbox.exit {
            return None;
        }

        if !mailbox.signalled && !mailbox.needs_refresh_rate_update {
            let now = Instant::now();
            let idle_wait = (mailbox.idle_support == Support::Supported
                && !mailbox.idle_enabled
                && !mailbox.idle_stalled)
                .then(|| mailbox.idle_deadline.saturating_duration_since(now));
            let retry_wait = mailbox
                .retry_at
                .map(|at| at.saturating_duration_since(now));
            let timeout = match (idle_wait, retry_wait) {
                (Some(idle), Some(retry)) => Some(idle.min(retry)),
                (idle, retry) => idle.or(retry),
            };

            mailbox = match timeout {
                Some(timeout) if timeout.is_zero() => mailbox,
                Some(timeout) => shared.wake.wait_timeout(mailbox, timeout).unwrap().0,
                None => shared.wake.wait(mailbox).unwrap(),
            };
            if mailbox.exit {
                return None;
            }
        }

        if mailbox.retry_at.is_some_and(|at| at <= Instant::now()) {
            mailbox.retry_at = None;
            mailbox.needs_refresh_rate_update = true;
        }

        // Clear before the I/O so a signal arriving mid-update is not lost.
        let wakeup = Wakeup {
            update_refresh_rate: mailbox.needs_refresh_rate_update,
            power_mode: mailbox.power_mode,
            vsync_period_ns: mailbox.vsync_period_ns,
            idle_deadline: mailbox.idle_deadline,
        };
        mailbox.needs_refresh_rate_update = false;
        mailbox.signalled = false;
        Some(wakeup)
    }

    fn update_idle_hint(&mut self, shared: &Shared, deadline: Instant) -> Result<(), HintError> {
        let (support, enabled) = {
            let mailbox = shared.mailbox.lock().unwrap();
            (mailbox.idle_support, mailbox.idle_enabled)
        };

        match support {
            Support::Unsupported => return Err(HintError::Unsupported),
            Support::Supported => {}
            Support::Unknown => {
                let supported = self.check_hint_support(DISPLAY_IDLE_HINT)?;
                info!(
                    "PowerHintWorker: Display idle hint is {}",
                    if supported { "supported" } else { "unsupported" }
                );
                let mut mailbox = shared.mailbox.lock().unwrap();
                if supported {
                    mailbox.idle_support = Support::Supported;
                } else {
                    mailbox.idle_support = Support::Unsupported;
                    return Err(HintError::Unsupported);
                }
            }
        }

        let enable = deadline < Instant::now();
        if enable != enabled {
            self.send_hint(DISPLAY_IDLE_HINT, enable)?;
            trace!("PowerHintWorker: Idle hint = {}", enable);
            shared.mailbox.lock().unwrap().idle_enabled = enable;
        }
        Ok(())
    }

    fn update_refresh_rate_hint(
        &mut self,
        power_mode: PowerMode,
        vsync_period_ns: u64,
    ) -> Result<(), HintError> {
        if self.pending_prev_refresh_rate != 0 {
            self.send_refresh_rate_hint(self.pending_prev_refresh_rate, false)?;
            self.pending_prev_refresh_rate = 0;
        }

        if power_mode != PowerMode::On {
            if self.prev_refresh_rate != 0 {
                self.send_refresh_rate_hint(self.prev_refresh_rate, false)?;
                self.prev_refresh_rate = 0;
            }
            return Ok(());
        }

        let rate = refresh_rate_for_period(vsync_period_ns);
        if rate == 0 || rate == self.prev_refresh_rate {
            return Ok(());
        }
        self.check_refresh_rate_support(rate)?;

        // Enable the next hint before disabling the previous one so a hint
        // is active at every point of the switch.
        self.send_refresh_rate_hint(rate, true)?;
        if self.prev_refresh_rate != 0 {
            if let Err(e) = self.send_refresh_rate_hint(self.prev_refresh_rate, false) {
                if e != HintError::Transport {
                    self.pending_prev_refresh_rate = self.prev_refresh_rate;
                    self.prev_refresh_rate = rate;
                }
                return Err(e);
            }
        }
        info!(
            "PowerHintWorker: Refresh rate hint {} -> {}",
            self.prev_refresh_rate, rate
        );
        self.prev_refresh_rate = rate;
        Ok(())
    }

    fn check_refresh_rate_support(&mut self, rate: u32) -> Result<(), HintError> {
        let supported = match self.refresh_rate_support.get(&rate) {
            Some(supported) => *supported,
            None => {
                let hint = refresh_rate_hint(rate);
                let supported = self.check_hint_support(&hint)?;
                info!("PowerHintWorker: Cached {} supported={}", hint, supported);
                self.refresh_rate_support.insert(rate, supported);
                supported
            }
        };
        if supported {
            Ok(())
        } else {
            Err(HintError::Unsupported)
        }
    }

    fn send_refresh_rate_hint(&mut self, rate: u32, enabled: bool) -> Result<(), HintError> {
        self.send_hint(&refresh_rate_hint(rate), enabled)
    }

    fn connected_service(&mut self) -> Result<Arc<dyn PowerService>, HintError> {
        if let Some(service) = &self.service {
            return Ok(Arc::clone(service));
        }
        match self.connector.connect() {
            Some(service) => {
                info!("PowerHintWorker: Connected to power service");
                self.service = Some(Arc::clone(&service));
                Ok(service)
            }
            None => {
                error!("PowerHintWorker: Failed to connect to power service");
                Err(self.on_failure(HintError::Transport))
            }
        }
    }

    fn check_hint_support(&mut self, mode: &str) -> Result<bool, HintError> {
        let service = self.connected_service()?;
        service.is_mode_supported(mode).map_err(|e| {
            error!("PowerHintWorker: Failed to query {}: {}", mode, e);
            self.on_failure(e)
        })
    }

    fn send_hint(&mut self, mode: &str, enabled: bool) -> Result<(), HintError> {
        let service = self.connected_service()?;
        service.set_mode(mode, enabled).map_err(|e| {
            error!(
                "PowerHintWorker: Failed to send {} enabled={}: {}",
                mode, enabled, e
            );
            self.on_failure(e)
        })
    }

    /// A broken transport leaves the service's hint state unknown.
    fn on_failure(&mut self, e: HintError) -> HintError {
        if e == HintError::Transport {
            self.service = None;
            self.prev_refresh_rate = 0;
            self.pending_prev_refresh_rate = 0;
        }
        e
    }
}
