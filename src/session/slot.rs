// src/session/slot.rs
//! Fixed-capacity table of client-visible display slots.
//!
//! Slot ids are assigned once at startup and never reused:
//!
//! ```text
//! 0               primary (built-in or pluggable)
//! 1..=P           pluggable
//! P+1..=P+B       built-in beyond the primary
//! P+B+1..         virtual
//! ```

use crate::display::{
    CompositionEngine, DisplayKind, DisplayType, HdrCapabilities, PowerMode, TestPattern,
};
use crate::error::HwcError;
use crate::session::slot_lock::SlotLock;
use anyhow::{Context, Result};
use log::*;

pub const MAX_BUILTIN_SLOTS: usize = 4;
pub const MAX_PLUGGABLE_SLOTS: usize = 4;
pub const MAX_VIRTUAL_SLOTS: usize = 4;

/// Validated, stable client-facing display id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub const PRIMARY: ClientId = ClientId(0);

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotClass {
    Primary,
    BuiltIn,
    Pluggable,
    Virtual,
}

/// Legacy numeric display indices used by administrative clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyDisplay {
    Primary,
    External,
    Virtual,
    BuiltIn2,
}

impl TryFrom<i32> for LegacyDisplay {
    type Error = HwcError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(LegacyDisplay::Primary),
            1 => Ok(LegacyDisplay::External),
            2 => Ok(LegacyDisplay::Virtual),
            3 => Ok(LegacyDisplay::BuiltIn2),
            _ => Err(HwcError::BadParameter),
        }
    }
}

/// One client-visible display identity and whatever is bound to it.
#[derive(Debug)]
pub struct DisplaySlot {
    client_id: ClientId,
    class: SlotClass,
    backing_id: i32,
    pub test_pattern: Option<TestPattern>,
    pub hdr_supported: bool,
    display: Option<DisplayKind>,
}

impl DisplaySlot {
    fn new(client_id: ClientId, class: SlotClass) -> Self {
        Self {
            client_id,
            class,
            backing_id: -1,
            test_pattern: None,
            hdr_supported: false,
            display: None,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn class(&self) -> SlotClass {
        self.class
    }

    /// Engine handle of the bound endpoint, `None` while unbound or for a placeholder.
    pub fn backing_id(&self) -> Option<i32> {
        match self.display {
            Some(_) if self.backing_id >= 0 => Some(self.backing_id),
            _ => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.display.is_some()
    }

    pub fn display(&self) -> Option<&DisplayKind> {
        self.display.as_ref()
    }

    pub fn display_mut(&mut self) -> Option<&mut DisplayKind> {
        self.display.as_mut()
    }

    /// Binds a freshly created display and caches its HDR support.
    pub fn bind(&mut self, backing_id: Option<i32>, display: DisplayKind) {
        self.hdr_supported = display.ops().hdr_capabilities().is_supported();
        self.backing_id = backing_id.unwrap_or(-1);
        self.display = Some(display);
    }

    /// Resets the slot and hands back the display object for teardown.
    pub fn unbind(&mut self) -> Option<DisplayKind> {
        self.backing_id = -1;
        self.test_pattern = None;
        self.hdr_supported = false;
        self.display.take()
    }

    /// Power mode of the bound display, `Off` while unbound.
    pub fn last_power_mode(&self) -> PowerMode {
        self.display
            .as_ref()
            .map(|display| display.ops().last_power_mode())
            .unwrap_or(PowerMode::Off)
    }

    pub fn hdr_capabilities(&self) -> Option<HdrCapabilities> {
        self.display
            .as_ref()
            .map(|display| display.ops().hdr_capabilities())
    }
}

/// Owned table of `(slot, lock)` pairs indexed by [`ClientId`].
pub struct SlotRegistry {
    slots: Vec<SlotLock<DisplaySlot>>,
    primary_type: DisplayType,
    pluggable: Vec<ClientId>,
    builtin: Vec<ClientId>,
    virtuals: Vec<ClientId>,
}

impl SlotRegistry {
    /// Partitions slot capacity from the engine's reported maximums.
    ///
    /// A failed capability query is fatal: slot counts are structural.
    pub fn init(engine: &dyn CompositionEngine) -> Result<Self> {
        let primary_type = engine
            .first_display_type()
            .context("Primary display type not recognized")?;
        let mut max_builtin = engine
            .max_displays(DisplayType::BuiltIn)
            .context("Could not query maximum built-in displays")?;
        let mut max_pluggable = engine
            .max_displays(DisplayType::Pluggable)
            .context("Could not query maximum pluggable displays")?;
        let max_virtual = engine
            .max_displays(DisplayType::Virtual)
            .context("Could not query maximum virtual displays")?;

        match primary_type {
            DisplayType::Pluggable => max_pluggable = max_pluggable.saturating_sub(1),
            DisplayType::BuiltIn => max_builtin = max_builtin.saturating_sub(1),
            DisplayType::Virtual => anyhow::bail!("Virtual display cannot be primary"),
        }

        Ok(Self::with_capacities(
            primary_type,
            max_builtin.min(MAX_BUILTIN_SLOTS),
            max_pluggable.min(MAX_PLUGGABLE_SLOTS),
            max_virtual.min(MAX_VIRTUAL_SLOTS),
        ))
    }

    /// Builds the table from already clamped per-class counts.
    pub fn with_capacities(
        primary_type: DisplayType,
        builtin: usize,
        pluggable: usize,
        virtuals: usize,
    ) -> Self {
        let mut slots = vec![SlotLock::new(DisplaySlot::new(
            ClientId::PRIMARY,
            SlotClass::Primary,
        ))];
        let mut allocate = |class: SlotClass, count: usize| -> Vec<ClientId> {
            (0..count)
                .map(|_| {
                    let id = ClientId(slots.len() as u64);
                    slots.push(SlotLock::new(DisplaySlot::new(id, class)));
                    id
                })
                .collect()
        };
        let pluggable = allocate(SlotClass::Pluggable, pluggable);
        let builtin = allocate(SlotClass::BuiltIn, builtin);
        let virtuals = allocate(SlotClass::Virtual, virtuals);

        info!(
            "SlotRegistry: primary={:?} pluggable={:?} builtin={:?} virtual={:?}",
            primary_type, pluggable, builtin, virtuals
        );

        Self {
            slots,
            primary_type,
            pluggable,
            builtin,
            virtuals,
        }
    }

    /// Validates a raw client id.
    pub fn resolve(&self, raw: u64) -> Result<ClientId, HwcError> {
        if (raw as usize) < self.slots.len() {
            Ok(ClientId(raw))
        } else {
            Err(HwcError::BadDisplay)
        }
    }

    pub fn slot(&self, id: ClientId) -> &SlotLock<DisplaySlot> {
        &self.slots[id.index()]
    }

    pub fn primary(&self) -> &SlotLock<DisplaySlot> {
        self.slot(ClientId::PRIMARY)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Maps a legacy index to the first slot of its class.
    pub fn lookup(&self, legacy: LegacyDisplay) -> Option<ClientId> {
        match legacy {
            LegacyDisplay::Primary => Some(ClientId::PRIMARY),
            LegacyDisplay::External => self.pluggable.first().copied(),
            LegacyDisplay::Virtual => self.virtuals.first().copied(),
            LegacyDisplay::BuiltIn2 => self.builtin.first().copied(),
        }
    }

    pub fn builtin_ids(&self) -> &[ClientId] {
        &self.builtin
    }

    pub fn pluggable_ids(&self) -> &[ClientId] {
        &self.pluggable
    }

    pub fn virtual_ids(&self) -> &[ClientId] {
        &self.virtuals
    }

    /// Lazy, restartable sequence over every slot in id order.
    pub fn all_displayed(
        &self,
    ) -> impl Iterator<Item = (ClientId, &SlotLock<DisplaySlot>)> + Clone + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| (ClientId(index as u64), slot))
    }

    /// Pluggable slots, preceded by the primary when the primary is pluggable.
    pub fn pluggable_with_primary(&self) -> Vec<ClientId> {
        let mut ids = Vec::with_capacity(self.pluggable.len() + 1);
        if self.primary_type == DisplayType::Pluggable {
            ids.push(ClientId::PRIMARY);
        }
        ids.extend_from_slice(&self.pluggable);
        ids
    }

    /// First non-primary built-in slot that currently has a display bound.
    pub fn first_bound_builtin(&self) -> Option<ClientId> {
        self.builtin
            .iter()
            .copied()
            .find(|id| self.slot(*id).lock().is_bound())
    }

    /// Class of a slot, answered without taking its lock.
    pub fn class_of(&self, id: ClientId) -> SlotClass {
        if id == ClientId::PRIMARY {
            SlotClass::Primary
        } else if self.pluggable.contains(&id) {
            SlotClass::Pluggable
        } else if self.builtin.contains(&id) {
            SlotClass::BuiltIn
        } else {
            SlotClass::Virtual
        }
    }
}
