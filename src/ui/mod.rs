//! Display hardware - ST7789 panel, PWM backlight and status lamp.
//!
//! The widget tree itself lives in the library ([`powerview::scene::Scene`]
//! behind the render lock); this module only moves pixels and light.
//!
//! ## Components
//!
//! - **Panel**: 172×320 ST7789 over SPI2, rotated per the stored setting
//! - **Backlight**: LEDC low-speed channel, duty set from a [`Signal`]
//! - **Lamp**: status LED switched from the portal's `/rgb` route
//!
//! [`Signal`]: embassy_sync::signal::Signal

pub mod backlight;
pub mod display;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use esp_hal::gpio::Output;
use log::info;

static LAMP_SIGNAL: Signal<CriticalSectionRawMutex, bool> = Signal::new();

/// Request the status lamp on or off.
pub fn set_lamp(on: bool) {
    LAMP_SIGNAL.signal(on);
}

/// Apply lamp requests.
#[embassy_executor::task]
pub async fn lamp_task(mut lamp: Output<'static>, initially_on: bool) {
    lamp.set_level(initially_on.into());
    loop {
        let on = LAMP_SIGNAL.wait().await;
        lamp.set_level(on.into());
        info!("status lamp {}", if on { "on" } else { "off" });
    }
}
