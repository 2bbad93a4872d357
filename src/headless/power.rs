// src/headless/power.rs
//! In-process power service with a call log and scripted failures.

use crate::power_hint::{HintError, PowerService, PowerServiceConnector};
use log::*;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerCall {
    Query(String),
    Set {
        mode: String,
        enabled: bool,
        ok: bool,
    },
}

struct Script {
    mode: String,
    enabled: bool,
    error: HintError,
}

#[derive(Default)]
struct PowerLog {
    supported: HashSet<String>,
    calls: Vec<PowerCall>,
    failures: VecDeque<Script>,
}

pub struct HeadlessPowerService {
    log: Mutex<PowerLog>,
    connects: AtomicUsize,
    available: AtomicBool,
}

impl HeadlessPowerService {
    /// A reachable service that supports exactly `modes`.
    pub fn new<I, S>(modes: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            log: Mutex::new(PowerLog {
                supported: modes.into_iter().map(Into::into).collect(),
                ..PowerLog::default()
            }),
            connects: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        })
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn PowerServiceConnector> {
        Arc::new(HeadlessPowerConnector {
            service: Arc::clone(self),
        })
    }

    /// Fails the next matching `set_mode` call with `error`.
    pub fn fail_next(&self, mode: &str, enabled: bool, error: HintError) {
        self.log.lock().unwrap().failures.push_back(Script {
            mode: mode.to_string(),
            enabled,
            error,
        });
    }

    /// Makes `connect` fail until the service is available again.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PowerCall> {
        self.log.lock().unwrap().calls.clone()
    }

    /// `(mode, enabled, ok)` for every `set_mode` call, in order.
    pub fn sets(&self) -> Vec<(String, bool, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PowerCall::Set { mode, enabled, ok } => Some((mode, enabled, ok)),
                PowerCall::Query(_) => None,
            })
            .collect()
    }

    pub fn queries(&self, mode: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, PowerCall::Query(m) if m == mode))
            .count()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl PowerService for HeadlessPowerService {
    fn is_mode_supported(&self, mode: &str) -> Result<bool, HintError> {
        let mut log = self.log.lock().unwrap();
        log.calls.push(PowerCall::Query(mode.to_string()));
        Ok(log.supported.contains(mode))
    }

    fn set_mode(&self, mode: &str, enabled: bool) -> Result<(), HintError> {
        let mut log = self.log.lock().unwrap();
        let scripted = log
            .failures
            .iter()
            .position(|script| script.mode == mode && script.enabled == enabled);
        let result = match scripted.and_then(|index| log.failures.remove(index)) {
            Some(script) => Err(script.error),
            None => Ok(()),
        };
        log.calls.push(PowerCall::Set {
            mode: mode.to_string(),
            enabled,
            ok: result.is_ok(),
        });
        trace!("HeadlessPowerService: {} enabled={} -> {:?}", mode, enabled, result);
        result
    }
}

struct HeadlessPowerConnector {
    service: Arc<HeadlessPowerService>,
}

impl PowerServiceConnector for HeadlessPowerConnector {
    fn connect(&self) -> Option<Arc<dyn PowerService>> {
        if !self.service.available.load(Ordering::SeqCst) {
            return None;
        }
        self.service.connects.fetch_add(1, Ordering::SeqCst);
        let service: Arc<dyn PowerService> = self.service.clone();
        Some(service)
    }
}
