//! Library interface for powerview.
//!
//! Everything that does not need the radio or the panel lives here so it
//! can be tested on the host: screen coordination, link debouncing and
//! supervision, settings, the portal routing rules and the power readout.
//!
//! Usage: `cargo test --lib` / `cargo test`
//!
//! Note: The embedded binary (main.rs, `--features embedded`) wires these
//! modules to the ESP32-C6 hardware.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

// ═══════════════════════════════════════════════════════════════════════════
// Core modules
// ═══════════════════════════════════════════════════════════════════════════

pub mod config;
pub mod error;

/// Rendering: engine contract, widget arena, render lock.
pub mod engine;
pub mod render_lock;
pub mod scene;

/// Screens and the state machine that switches between them.
pub mod screen;

/// Connectivity: debouncer and supervisor.
pub mod link;
pub mod supervisor;

/// Settings, flash persistence and the captive portal.
pub mod dhcp;
pub mod dns;
pub mod portal;
pub mod settings;
pub mod storage;

/// Power readout and monitor polling.
pub mod metrics;
pub mod power;

pub use error::Error;
pub use link::{LinkEvent, LinkMonitor, LinkState};
pub use metrics::{HomeSelector, PowerSource, Sample, WallClock};
pub use render_lock::{RenderGuard, RenderLock, Surface};
pub use screen::{Backlight, Brightness, Layout, Screen, ScreenStateMachine};
pub use settings::{Credentials, KvStore, MemoryStore, Rotation, Settings};
pub use supervisor::{ConnectivitySupervisor, LinkControl};

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests
// ═══════════════════════════════════════════════════════════════════════════
