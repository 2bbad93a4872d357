// src/session/slot_lock.rs
//! Per-slot exclusive lock with a cancellable validate/present sequence.
//!
//! A slot's value is always accessed through one mutex. On top of that the
//! lock tracks the phase of the slot's frame sequence:
//!
//! ```text
//! Idle -> Validating -> Validated -> Presenting -> Idle
//!              \             \
//!               `-- cancel ---`-----------------> Idle
//! ```
//!
//! `Validating` and `Presenting` only exist while a guard is held, so other
//! threads can only ever observe `Idle` or `Validated`. A `Validated` sequence
//! is open: it belongs to the thread that validated, and other threads that
//! want to start a sequence, or that need the slot settled, block until it is
//! presented or cancelled. Plain [`SlotLock::lock`] never waits on a sequence.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

/// Observable phase of a slot's frame sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencePhase {
    Idle,
    Validating,
    Validated,
    Presenting,
}

struct SlotState<T> {
    phase: SequencePhase,
    owner: Option<ThreadId>,
    cancellations: u64,
    value: T,
}

impl<T> SlotState<T> {
    /// True while another thread owns an open sequence.
    fn blocked_for(&self, me: ThreadId) -> bool {
        self.phase == SequencePhase::Validated && self.owner != Some(me)
    }
}

pub struct SlotLock<T> {
    state: Mutex<SlotState<T>>,
    changed: Condvar,
}

impl<T> SlotLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(SlotState {
                phase: SequencePhase::Idle,
                owner: None,
                cancellations: 0,
                value,
            }),
            changed: Condvar::new(),
        }
    }

    /// Plain exclusive access. Does not wait for an open sequence.
    pub fn lock(&self) -> SlotGuard<'_, T> {
        SlotGuard {
            state: self.state.lock().unwrap(),
        }
    }

    /// Begins a validate. Blocks while another thread's sequence is open.
    ///
    /// Dropping the guard leaves the sequence `Validated`; it must then be
    /// closed by [`wait_sequence`](Self::wait_sequence) or
    /// [`cancel_sequence`](Self::cancel_sequence).
    pub fn enter_sequence(&self) -> SequenceGuard<'_, T> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();
        while state.blocked_for(me) {
            state = self.changed.wait(state).unwrap();
        }
        state.phase = SequencePhase::Validating;
        state.owner = Some(me);
        SequenceGuard { state }
    }

    /// Begins a present. Blocks while another thread's sequence is open.
    /// An idle slot goes straight to presenting, so a skipped validate still
    /// works. Dropping the guard closes the sequence and wakes every waiter.
    pub fn wait_sequence(&self) -> PresentGuard<'_, T> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();
        while state.blocked_for(me) {
            state = self.changed.wait(state).unwrap();
        }
        state.phase = SequencePhase::Presenting;
        state.owner = Some(me);
        PresentGuard {
            state,
            changed: &self.changed,
        }
    }

    /// Aborts whatever sequence is open and wakes every waiter.
    pub fn cancel_sequence(&self) {
        let mut state = self.state.lock().unwrap();
        state.phase = SequencePhase::Idle;
        state.owner = None;
        state.cancellations += 1;
        self.changed.notify_all();
    }

    /// Exclusive access once no other thread holds an open sequence.
    ///
    /// The guard reports whether the awaited sequence ended in a cancel.
    pub fn lock_settled(&self) -> SettledGuard<'_, T> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();
        let cancellations = state.cancellations;
        while state.blocked_for(me) {
            state = self.changed.wait(state).unwrap();
        }
        let was_cancelled = state.cancellations != cancellations;
        SettledGuard {
            state,
            was_cancelled,
        }
    }

    pub fn phase(&self) -> SequencePhase {
        self.state.lock().unwrap().phase
    }
}

/// Plain slot guard.
pub struct SlotGuard<'a, T> {
    state: MutexGuard<'a, SlotState<T>>,
}

impl<T> Deref for SlotGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.state.value
    }
}

impl<T> DerefMut for SlotGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state.value
    }
}

/// Guard for the validate half of a sequence.
pub struct SequenceGuard<'a, T> {
    state: MutexGuard<'a, SlotState<T>>,
}

impl<T> Deref for SequenceGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.state.value
    }
}

impl<T> DerefMut for SequenceGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state.value
    }
}

impl<T> Drop for SequenceGuard<'_, T> {
    fn drop(&mut self) {
        if self.state.phase == SequencePhase::Validating {
            self.state.phase = SequencePhase::Validated;
        }
    }
}

/// Guard for the present half of a sequence.
pub struct PresentGuard<'a, T> {
    state: MutexGuard<'a, SlotState<T>>,
    changed: &'a Condvar,
}

impl<T> Deref for PresentGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.state.value
    }
}

impl<T> DerefMut for PresentGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state.value
    }
}

impl<T> Drop for PresentGuard<'_, T> {
    fn drop(&mut self) {
        self.state.phase = SequencePhase::Idle;
        self.state.owner = None;
        self.changed.notify_all();
    }
}

/// Guard returned by [`SlotLock::lock_settled`].
pub struct SettledGuard<'a, T> {
    state: MutexGuard<'a, SlotState<T>>,
    was_cancelled: bool,
}

impl<T> SettledGuard<'_, T> {
    pub fn was_cancelled(&self) -> bool {
        self.was_cancelled
    }
}

impl<T> Deref for SettledGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.state.value
    }
}

impl<T> DerefMut for SettledGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state.value
    }
}
