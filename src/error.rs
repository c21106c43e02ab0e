//! Unified error type for powerview.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Derives `defmt::Format` when the `defmt` feature is enabled.

use core::fmt;

use crate::screen::Screen;

/// Top-level error type used across the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Rendering
    /// The render backend guarded by the render lock is not initialised
    /// and a re-initialisation attempt failed.
    LockUnavailable,

    /// A widget could not be created while building the given screen.
    BuildFailed(Screen),

    // Storage
    /// Flash read/write/erase failed.
    Storage,

    /// The settings store has no room for another entry.
    StoreFull,

    // Settings / portal input
    /// Rotation outside {0, 90, 180, 270}.
    InvalidRotation(i32),

    /// A required form field or request part is missing.
    MissingField(&'static str),

    /// The request could not be parsed.
    BadRequest,

    // Radio
    /// The WiFi driver rejected a configuration or connect call.
    Radio,

    /// A socket operation failed or the peer is unreachable.
    Network,

    // Display
    /// Transfer to the panel failed.
    Display,

    // Generic
    /// Buffer too small for the requested operation.
    BufferOverflow,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LockUnavailable => f.write_str("render lock unavailable"),
            Error::BuildFailed(screen) => write!(f, "failed to build {:?} screen", screen),
            Error::Storage => f.write_str("storage error"),
            Error::StoreFull => f.write_str("settings store full"),
            Error::InvalidRotation(deg) => write!(f, "invalid rotation {}", deg),
            Error::MissingField(name) => write!(f, "missing field `{}`", name),
            Error::BadRequest => f.write_str("malformed request"),
            Error::Radio => f.write_str("radio error"),
            Error::Network => f.write_str("network error"),
            Error::Display => f.write_str("display error"),
            Error::BufferOverflow => f.write_str("buffer overflow"),
        }
    }
}
