//! Screens and their coordination.
//!
//! Five full-panel screens share the display; at most one is visible.
//!
//! ```text
//!   ScreenStateMachine ── show*/hide/reset_all/update_* ──► RenderLock
//!          │                                                   │
//!          └── Backlight::set_brightness (outside the lock)    └── ScreenRegistry (built subtrees + active flags)
//! ```

pub mod layout;
mod machine;
mod registry;

#[cfg(test)]
mod tests;

pub use layout::{PortWidgets, PowerWidgets, ScreenWidgets};
pub use machine::ScreenStateMachine;
pub use registry::ScreenRegistry;

use crate::config::{BRIGHTNESS_DIM_PCT, BRIGHTNESS_NORMAL_PCT, PANEL_LONG_SIDE, PANEL_SHORT_SIDE};
use crate::settings::Rotation;

/// A full-panel view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Screen {
    /// Captive-portal instructions (AP name and address).
    ApSetup,
    /// "WiFi connection lost" notice while reconnecting.
    LinkError,
    /// Time and date; shown dimmed.
    Clock,
    /// Per-port and total power readout.
    PowerMonitor,
    /// Progress while scanning for networks.
    Scanning,
}

impl Screen {
    pub const COUNT: usize = 5;

    pub const ALL: [Screen; Screen::COUNT] = [
        Screen::ApSetup,
        Screen::LinkError,
        Screen::Clock,
        Screen::PowerMonitor,
        Screen::Scanning,
    ];

    pub const fn index(self) -> usize {
        match self {
            Screen::ApSetup => 0,
            Screen::LinkError => 1,
            Screen::Clock => 2,
            Screen::PowerMonitor => 3,
            Screen::Scanning => 4,
        }
    }

    /// Setup, error and scan screens keep the display until they are
    /// replaced explicitly; the home screens never displace them.
    pub const fn is_modal(self) -> bool {
        matches!(self, Screen::ApSetup | Screen::LinkError | Screen::Scanning)
    }

    /// Backlight level applied after the screen becomes active.
    pub const fn brightness(self) -> Brightness {
        match self {
            Screen::Clock => Brightness::Dim,
            _ => Brightness::Normal,
        }
    }
}

/// Backlight level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Brightness {
    Dim,
    Normal,
}

impl Brightness {
    /// PWM duty cycle in percent.
    pub const fn percent(self) -> u8 {
        match self {
            Brightness::Dim => BRIGHTNESS_DIM_PCT,
            Brightness::Normal => BRIGHTNESS_NORMAL_PCT,
        }
    }
}

/// Backlight driver. Called outside the render lock.
pub trait Backlight {
    fn set_brightness(&self, level: Brightness);
}

/// Panel orientation derived from the stored rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Layout {
    /// 172 wide, 320 tall (rotation 0 / 180).
    Portrait,
    /// 320 wide, 172 tall (rotation 90 / 270).
    Landscape,
}

impl Layout {
    pub const fn for_rotation(rotation: Rotation) -> Self {
        match rotation.degrees() {
            90 | 270 => Layout::Landscape,
            _ => Layout::Portrait,
        }
    }

    /// `(width, height)` in pixels.
    pub const fn size(self) -> (u16, u16) {
        match self {
            Layout::Portrait => (PANEL_SHORT_SIDE, PANEL_LONG_SIDE),
            Layout::Landscape => (PANEL_LONG_SIDE, PANEL_SHORT_SIDE),
        }
    }
}

/// Inputs needed to build a screen's widgets.
#[derive(Clone, Copy, Debug)]
pub struct BuildContext<'a> {
    pub layout: Layout,
    /// Access-point name and address shown on [`Screen::ApSetup`].
    pub ap: Option<(&'a str, &'a str)>,
}

/// Wall-clock time as shown on [`Screen::Clock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl ClockTime {
    const SECS_PER_DAY: u64 = 86_400;

    /// Civil UTC time for a Unix timestamp.
    pub const fn from_unix(secs: u64) -> Self {
        let days = secs / Self::SECS_PER_DAY;
        let rem = secs % Self::SECS_PER_DAY;

        // Days since 0000-03-01, in 400-year eras
        let z = days + 719_468;
        let era = z / 146_097;
        let doe = z - era * 146_097;
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = doy - (153 * mp + 2) / 5 + 1;
        let month = if mp < 10 { mp + 3 } else { mp - 9 };
        let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };

        Self {
            year: year as u16,
            month: month as u8,
            day: day as u8,
            hour: (rem / 3600) as u8,
            minute: (rem % 3600 / 60) as u8,
            second: (rem % 60) as u8,
        }
    }

    /// Unix timestamp, or `None` for a field out of range or a date
    /// before 1970.
    pub fn to_unix(&self) -> Option<u64> {
        if self.year < 1970
            || !(1..=12).contains(&self.month)
            || self.day == 0
            || self.day > days_in_month(self.year, self.month)
            || self.hour > 23
            || self.minute > 59
            || self.second > 59
        {
            return None;
        }

        let month = self.month as u64;
        let year = self.year as u64 - if month <= 2 { 1 } else { 0 };
        let era = year / 400;
        let yoe = year - era * 400;
        let doy = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + self.day as u64 - 1;
        let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
        let days = era * 146_097 + doe - 719_468;

        Some(
            days * Self::SECS_PER_DAY
                + self.hour as u64 * 3600
                + self.minute as u64 * 60
                + self.second as u64,
        )
    }
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) => 29,
        2 => 28,
        _ => 31,
    }
}
