//! Link debouncer.
//!
//! The radio reports connected/disconnected on every poll, and it flaps
//! during roaming and DHCP renewals. [`LinkMonitor`] only reports a change
//! after [`LINK_DEBOUNCE_THRESHOLD`] consecutive samples agree, and only
//! once per change.

use crate::config::LINK_DEBOUNCE_THRESHOLD;

/// Debounced link state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Emitted when the debounced state changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    StableConnected,
    StableDisconnected,
}

/// Consecutive-sample debouncer with hysteresis.
#[derive(Clone, Debug)]
pub struct LinkMonitor {
    threshold: u8,
    connect_streak: u8,
    disconnect_streak: u8,
    /// `None` until the first stable state after boot.
    stable: Option<LinkState>,
}

impl Default for LinkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkMonitor {
    pub const fn new() -> Self {
        Self::with_threshold(LINK_DEBOUNCE_THRESHOLD)
    }

    /// A threshold of 0 behaves like 1.
    pub const fn with_threshold(threshold: u8) -> Self {
        Self {
            threshold: if threshold == 0 { 1 } else { threshold },
            connect_streak: 0,
            disconnect_streak: 0,
            stable: None,
        }
    }

    /// Last stable state, `None` before the first one.
    pub fn state(&self) -> Option<LinkState> {
        self.stable
    }

    /// `(connect_streak, disconnect_streak)`.
    pub fn streaks(&self) -> (u8, u8) {
        (self.connect_streak, self.disconnect_streak)
    }

    /// Feed one raw sample. Returns an event when the debounced state flips.
    pub fn sample(&mut self, connected: bool) -> Option<LinkEvent> {
        if connected {
            // Saturate at the threshold so long runs cannot overflow
            self.connect_streak = (self.connect_streak + 1).min(self.threshold);
            self.disconnect_streak = 0;
            if self.connect_streak >= self.threshold && self.stable != Some(LinkState::Connected) {
                self.stable = Some(LinkState::Connected);
                return Some(LinkEvent::StableConnected);
            }
        } else {
            self.disconnect_streak = (self.disconnect_streak + 1).min(self.threshold);
            self.connect_streak = 0;
            if self.disconnect_streak >= self.threshold && self.stable != Some(LinkState::Disconnected) {
                self.stable = Some(LinkState::Disconnected);
                return Some(LinkEvent::StableDisconnected);
            }
        }
        None
    }
}
