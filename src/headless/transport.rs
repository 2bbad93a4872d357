// src/headless/transport.rs

use crate::headless::HeadlessEngine;
use crate::uevent::{parse_uevent, HotplugEvent, UeventTransport};
use anyhow::{Context, Result};
use log::*;
use std::io::BufRead;

/// Reads one uevent payload per line.
///
/// `status=` changes are applied to the engine's first pluggable endpoint
/// before the payload is handed on, so the next status snapshot sees them.
pub struct HeadlessUeventTransport<R: BufRead> {
    reader: R,
    engine: HeadlessEngine,
}

impl<R: BufRead> HeadlessUeventTransport<R> {
    pub fn new(reader: R, engine: HeadlessEngine) -> Self {
        Self { reader, engine }
    }

    fn apply(&self, payload: &str) {
        let Some(HotplugEvent::Hotplug {
            connected: Some(connected),
            ..
        }) = parse_uevent(payload)
        else {
            return;
        };
        match self.engine.pluggable_endpoints().first() {
            Some(&backing_id) => {
                debug!(
                    "HeadlessUeventTransport: Endpoint {} connected={}",
                    backing_id, connected
                );
                self.engine.set_connected(backing_id, connected);
            }
            None => warn!("HeadlessUeventTransport: No pluggable endpoint to update"),
        }
    }
}

impl<R: BufRead + Send> UeventTransport for HeadlessUeventTransport<R> {
    fn next_event(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .context("Failed to read uevent")?;
        if read == 0 {
            return Ok(None);
        }
        let payload = line.trim_end().to_string();
        self.apply(&payload);
        Ok(Some(payload))
    }
}
