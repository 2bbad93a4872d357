// src/session/concurrency.rs
//! Secondary-display arbitration.
//!
//! Shared composition hardware supports the primary plus one secondary:
//! either a second built-in, or one of {external, virtual}. A second built-in
//! takes priority. Policy is recomputed from live slot state on every call, so
//! repeated calls issue no redundant activations, and a race between two
//! triggers is corrected by the next one.

use crate::display::PowerMode;
use crate::session::slot::{ClientId, LegacyDisplay, SlotRegistry};
use log::*;

pub struct ConcurrencyArbiter<'a> {
    registry: &'a SlotRegistry,
}

impl<'a> ConcurrencyArbiter<'a> {
    pub fn new(registry: &'a SlotRegistry) -> Self {
        Self { registry }
    }

    /// Re-derives which secondary displays may render after `changed` was
    /// powered, created or destroyed. Callers must not hold any slot lock.
    pub fn handle_concurrency(&self, changed: ClientId, primary_ready: bool) {
        if !primary_ready {
            debug!("ConcurrencyArbiter: primary not ready, skipping {}", changed);
            return;
        }

        let external = self.registry.lookup(LegacyDisplay::External);
        let virtual_ = self.registry.lookup(LegacyDisplay::Virtual);
        let builtin2 = self.registry.first_bound_builtin();
        let builtin2_active = builtin2.is_some_and(|id| {
            self.registry.slot(id).lock().last_power_mode() != PowerMode::Off
        });
        debug!(
            "ConcurrencyArbiter: changed={} builtin2={:?} active={}",
            changed, builtin2, builtin2_active
        );

        // With no second built-in bound, the primary stands in for it.
        let builtin_changed = match builtin2 {
            Some(id) => id == changed,
            None => changed == ClientId::PRIMARY,
        };

        if builtin_changed {
            if builtin2_active {
                for id in [external, virtual_].into_iter().flatten() {
                    self.activate(id, false);
                }
            } else if let Some(id) = external.filter(|id| self.is_bound(*id)) {
                self.activate(id, true);
            } else if let Some(id) = virtual_.filter(|id| self.is_bound(*id)) {
                self.activate(id, true);
            }
            return;
        }

        self.non_builtin_concurrency(changed, external, virtual_, builtin2_active);
    }

    fn non_builtin_concurrency(
        &self,
        changed: ClientId,
        external: Option<ClientId>,
        virtual_: Option<ClientId>,
        builtin2_active: bool,
    ) {
        let co_display = if Some(changed) == external {
            virtual_
        } else if Some(changed) == virtual_ {
            external
        } else {
            return;
        };
        let co_present = co_display.is_some_and(|id| self.is_bound(id));

        if self.is_bound(changed) {
            if builtin2_active || co_present {
                self.activate(changed, false);
            }
        } else if !builtin2_active && co_present {
            if let Some(id) = co_display {
                self.activate(id, true);
            }
        }
    }

    fn is_bound(&self, id: ClientId) -> bool {
        self.registry.slot(id).lock().is_bound()
    }

    /// Locks only the target slot. Failures are logged and left for the next trigger.
    fn activate(&self, id: ClientId, enable: bool) {
        let mut slot = self.registry.slot(id).lock();
        let Some(display) = slot.display_mut() else {
            return;
        };
        let ops = display.ops_mut();
        if ops.is_activated() == enable {
            return;
        }
        match ops.activate(enable) {
            Ok(()) => info!("ConcurrencyArbiter: display {} active={}", id, enable),
            Err(e) => warn!(
                "ConcurrencyArbiter: failed to set display {} active={}: {}",
                id, enable, e
            ),
        }
    }
}
