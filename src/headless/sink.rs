// src/headless/sink.rs

use crate::callbacks::ClientSink;
use crate::error::HwcError;
use crate::session::ClientId;
use log::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Connected(ClientId),
    Disconnected(ClientId),
    Refresh(ClientId),
}

/// Client sink that records every accepted notification.
///
/// A rejecting sink refuses its first `n` notifications, which makes the
/// sender retry.
#[derive(Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<Notification>>,
    reject_remaining: AtomicUsize,
    rejected: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(count: usize) -> Self {
        Self {
            reject_remaining: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn refreshes(&self, id: ClientId) -> usize {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|n| **n == Notification::Refresh(id))
            .count()
    }

    /// Hotplug notifications only, in delivery order.
    pub fn hotplugs(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|n| !matches!(n, Notification::Refresh(_)))
            .copied()
            .collect()
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.notifications.lock().unwrap().clear();
    }

    fn record(&self, notification: Notification) -> Result<(), HwcError> {
        let rejecting = self
            .reject_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejecting {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(HwcError::NoResources);
        }
        info!("RecordingSink: {:?}", notification);
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }
}

impl ClientSink for RecordingSink {
    fn notify_connected(&self, id: ClientId) -> Result<(), HwcError> {
        self.record(Notification::Connected(id))
    }

    fn notify_disconnected(&self, id: ClientId) -> Result<(), HwcError> {
        self.record(Notification::Disconnected(id))
    }

    fn notify_refresh_needed(&self, id: ClientId) -> Result<(), HwcError> {
        self.record(Notification::Refresh(id))
    }
}
