//! Power readout - turns raw port measurements into display values.
//!
//! Pure functions, no engine access. The screen layer applies the result
//! under the render lock.

use core::fmt::Write;

use embedded_graphics::pixelcolor::Rgb565;
use heapless::String;

use crate::config::{PORT_FULL_SCALE_W, POWER_PORTS, TOTAL_FULL_SCALE_W};
use crate::engine::palette;
use crate::screen::layout::NO_DATA;

/// One output port as measured by the monitor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PortReading {
    /// Negotiated output voltage; negative when unknown.
    pub voltage_mv: i32,
    pub power_w: f32,
}

/// One sample of all ports.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowerSnapshot {
    pub ports: [PortReading; POWER_PORTS],
    pub total_w: f32,
    /// The source could not be read or parsed; every field is meaningless.
    pub data_error: bool,
}

impl PowerSnapshot {
    /// Snapshot for a failed fetch.
    pub const fn unavailable() -> Self {
        Self {
            ports: [PortReading {
                voltage_mv: -1,
                power_w: 0.0,
            }; POWER_PORTS],
            total_w: 0.0,
            data_error: true,
        }
    }
}

/// What one readout widget pair shows.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub text: String<12>,
    pub color: Rgb565,
    /// Indicator fill, 0..=100.
    pub percent: i32,
}

/// Display values for the whole power screen.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerReadout {
    pub ports: [Reading; POWER_PORTS],
    pub total: Reading,
}

/// Compute what the power screen should show for `snapshot`.
///
/// On a data error every port and the total show the no-data placeholder
/// in grey with empty indicators.
pub fn readout(snapshot: &PowerSnapshot) -> PowerReadout {
    if snapshot.data_error {
        return PowerReadout {
            ports: core::array::from_fn(|_| no_data()),
            total: no_data(),
        };
    }

    PowerReadout {
        ports: core::array::from_fn(|i| port_reading(&snapshot.ports[i])),
        total: total_reading(snapshot.total_w),
    }
}

/// Colour band for a port's negotiated voltage.
pub fn voltage_color(voltage_mv: i32) -> Rgb565 {
    match voltage_mv {
        v if v > 21_000 => palette::BAND_20V,
        v if v > 16_000 => palette::BAND_15V,
        v if v > 13_000 => palette::BAND_12V,
        v if v > 10_000 => palette::BAND_9V,
        v if v > 6_000 => palette::BAND_5V,
        v if v >= 0 => palette::BAND_LOW,
        _ => palette::BAND_INVALID,
    }
}

/// `power` as a percentage of `full_scale`, clamped to 0..=100. Any
/// positive power shows at least 1 % so a trickle is still visible.
pub fn percent_of(power_w: f32, full_scale_w: f32) -> i32 {
    if power_w <= 0.0 || full_scale_w <= 0.0 {
        return 0;
    }
    let pct = (power_w / full_scale_w * 100.0) as i32;
    pct.clamp(1, 100)
}

fn no_data() -> Reading {
    let mut text = String::new();
    let _ = text.push_str(NO_DATA);
    Reading {
        text,
        color: palette::BAND_INVALID,
        percent: 0,
    }
}

fn port_reading(port: &PortReading) -> Reading {
    let power = port.power_w.max(0.0);
    // Truncate to centiwatts
    let centi = (power * 100.0) as i32;
    let mut text = String::new();
    let _ = write!(text, "{}.{:02}W", centi / 100, centi % 100);
    Reading {
        text,
        color: voltage_color(port.voltage_mv),
        percent: percent_of(power, PORT_FULL_SCALE_W),
    }
}

fn total_reading(total_w: f32) -> Reading {
    let total = total_w.max(0.0);
    let mut text = String::new();
    let _ = if total < 10.0 {
        write!(text, "{:.2}W", total)
    } else if total < 100.0 {
        write!(text, "{:.1}W", total)
    } else {
        write!(text, "{}W", (total + 0.5) as i32)
    };
    Reading {
        text,
        color: palette::TEXT,
        percent: percent_of(total, TOTAL_FULL_SCALE_W),
    }
}
