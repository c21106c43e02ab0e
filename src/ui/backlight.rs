//! PWM backlight on an LEDC low-speed channel.
//!
//! [`SignalBacklight`] is what the screen state machine holds: setting the
//! level only records it in a signal, so it never blocks while a screen
//! transition is in progress. [`backlight_task`] owns the channel and
//! applies the latest level.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use esp_hal::gpio::interconnect::PeripheralOutput;
use esp_hal::gpio::DriveMode;
use esp_hal::ledc::channel::{self as ledc_channel, ChannelIFace as _};
use esp_hal::ledc::timer::{self as ledc_timer, TimerIFace as _};
use esp_hal::ledc::{LSGlobalClkSource, Ledc, LowSpeed};
use esp_hal::peripherals::LEDC;
use esp_hal::time::Rate;
use log::{debug, warn};
use powerview::{Backlight, Brightness};
use static_cell::StaticCell;

/// PWM frequency, above the audible range.
const PWM_FREQUENCY_KHZ: u32 = 20;

static BRIGHTNESS_SIGNAL: Signal<CriticalSectionRawMutex, Brightness> = Signal::new();
static BACKLIGHT_TIMER: StaticCell<ledc_timer::Timer<'static, LowSpeed>> = StaticCell::new();

/// Backlight handle given to the screen state machine.
pub struct SignalBacklight;

impl Backlight for SignalBacklight {
    fn set_brightness(&self, level: Brightness) {
        BRIGHTNESS_SIGNAL.signal(level);
    }
}

/// Configure LEDC timer 0 / channel 0 on `pin`, starting at full brightness.
pub fn init(
    ledc: LEDC<'static>,
    pin: impl PeripheralOutput<'static>,
) -> ledc_channel::Channel<'static, LowSpeed> {
    let mut ledc = Ledc::new(ledc);
    ledc.set_global_slow_clock(LSGlobalClkSource::APBClk);

    let mut timer = ledc.timer::<LowSpeed>(ledc_timer::Number::Timer0);
    timer
        .configure(ledc_timer::config::Config {
            duty: ledc_timer::config::Duty::Duty10Bit,
            clock_source: ledc_timer::LSClockSource::APBClk,
            frequency: Rate::from_khz(PWM_FREQUENCY_KHZ),
        })
        .expect("backlight timer");
    let timer = BACKLIGHT_TIMER.init(timer);

    let mut channel = ledc.channel(ledc_channel::Number::Channel0, pin);
    channel
        .configure(ledc_channel::config::Config {
            timer: &*timer,
            duty_pct: Brightness::Normal.percent(),
            drive_mode: DriveMode::PushPull,
        })
        .expect("backlight channel");
    channel
}

/// Apply brightness changes requested through [`SignalBacklight`].
#[embassy_executor::task]
pub async fn backlight_task(channel: ledc_channel::Channel<'static, LowSpeed>) {
    loop {
        let level = BRIGHTNESS_SIGNAL.wait().await;
        match channel.set_duty(level.percent()) {
            Ok(()) => debug!("backlight {:?} ({}%)", level, level.percent()),
            Err(e) => warn!("backlight duty error: {:?}", e),
        }
    }
}
