//! powerview firmware - ESP32-C6 with a 172×320 ST7789 panel.
//!
//! Shows the captive-portal instructions until WiFi is configured, then a
//! live power readout from the monitor on the local network, falling back
//! to a dimmed clock while the charger is idle.
//!
//! ## Tasks
//!
//! ```text
//!   render_task      10 ms   animations + panel flush
//!   supervisor_task 200 ms   link debounce, reconnect, LinkError screen
//!   refresh_task      1 s    monitor poll → PowerMonitor / Clock
//!   portal_task ×2           HTTP on AP and STA
//!   dhcp_task, dns_task      captive responders on the AP
//!   backlight_task, lamp_task, net_task ×2
//! ```

#![no_std]
#![no_main]

extern crate alloc;

mod net;
mod ui;

use embassy_embedded_hal::adapter::BlockingAsync;
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{with_timeout, Duration, Timer};
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::spi::Mode;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_storage::FlashStorage;
use heapless::String;
use log::{error, info, warn, LevelFilter};
use powerview::config::{AP_ADDRESS_STR, AP_SSID, STORAGE_LOAD_TIMEOUT_MS, URL_MAX};
use powerview::scene::Scene;
use powerview::storage::FlashStore;
use powerview::{Layout, MemoryStore, ScreenStateMachine, Settings};
use static_cell::StaticCell;

use crate::net::link::EspLink;
use crate::net::monitor::HttpPowerSource;
use crate::net::portal::{SettingsStore, SharedSettings};
use crate::ui::backlight::SignalBacklight;
use crate::ui::display::PanelPins;

esp_bootloader_esp_idf::esp_app_desc!();

/// The screen state machine as wired on this board.
pub type Screens = ScreenStateMachine<CriticalSectionRawMutex, Scene, SignalBacklight>;

static SCREENS: StaticCell<Screens> = StaticCell::new();
static SETTINGS: StaticCell<SharedSettings> = StaticCell::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger(LevelFilter::Info);
    info!("powerview starting");

    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 64 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    // ── Settings ──────────────────────────────────────────────────────────
    let mut flash = FlashStore::new(BlockingAsync::new(FlashStorage::new(peripherals.FLASH)));
    let cache = match with_timeout(Duration::from_millis(STORAGE_LOAD_TIMEOUT_MS), flash.load()).await {
        Ok(cache) => cache,
        Err(_) => {
            warn!("settings load timed out, starting unconfigured");
            MemoryStore::new()
        }
    };
    let mut settings = Settings::new(cache);
    if let Err(e) = settings.begin() {
        error!("settings normalisation failed: {:?}", e);
    }
    let rotation = settings.rotation();
    let credentials = settings.credentials();
    let lamp_on = settings.rgb_enabled();
    let monitor_url: String<URL_MAX> = String::try_from(settings.monitor_url()).unwrap_or_default();

    let mut store = SettingsStore { settings, flash };
    if let Err(e) = store.save().await {
        error!("could not persist defaults: {:?}", e);
    }
    let store: &'static SharedSettings = SETTINGS.init(Mutex::new(store));

    // ── Display ───────────────────────────────────────────────────────────
    let spi = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(40))
            .with_mode(Mode::_0),
    )
    .expect("spi init")
    .with_sck(peripherals.GPIO7)
    .with_mosi(peripherals.GPIO6);

    let panel = ui::display::init(
        PanelPins {
            spi,
            cs: Output::new(peripherals.GPIO14, Level::High, OutputConfig::default()),
            dc: Output::new(peripherals.GPIO15, Level::High, OutputConfig::default()),
            reset: Output::new(peripherals.GPIO21, Level::High, OutputConfig::default()),
        },
        rotation,
    );

    let layout = Layout::for_rotation(rotation);
    let (width, height) = layout.size();
    let screens: &'static Screens =
        SCREENS.init(ScreenStateMachine::new(Scene::new(width, height), SignalBacklight, layout));
    if let Err(e) = screens.render_lock().init().await {
        error!("scene init failed: {:?}", e);
    }

    let backlight = ui::backlight::init(peripherals.LEDC, peripherals.GPIO22);
    let lamp = Output::new(peripherals.GPIO23, Level::Low, OutputConfig::default());

    spawner.must_spawn(ui::display::render_task(screens, panel));
    spawner.must_spawn(ui::backlight::backlight_task(backlight));
    spawner.must_spawn(ui::lamp_task(lamp, lamp_on));

    // ── Network ───────────────────────────────────────────────────────────
    let network = net::init(peripherals.WIFI, credentials.as_ref())
        .await
        .expect("radio init");

    spawner.must_spawn(net::net_task(network.ap_runner));
    spawner.must_spawn(net::net_task(network.sta_runner));
    spawner.must_spawn(net::captive::dhcp_task(network.ap));
    spawner.must_spawn(net::captive::dns_task(network.ap));
    spawner.must_spawn(net::portal::portal_task(network.ap, network.sta, screens, store));
    spawner.must_spawn(net::portal::portal_task(network.sta, network.sta, screens, store));

    let mut link = EspLink::new(network.controller, network.sta);
    if credentials.is_some() {
        if let Err(e) = link.connect() {
            warn!("initial connect rejected: {:?}", e);
        }
        spawner.must_spawn(net::monitor::refresh_task(
            screens,
            HttpPowerSource::new(network.sta, monitor_url),
        ));
    } else if let Err(e) = screens.show_ap_setup(AP_SSID, AP_ADDRESS_STR).await {
        error!("setup screen failed: {:?}", e);
    }
    spawner.must_spawn(net::link::supervisor_task(screens, link, credentials));

    info!("boot complete");
    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}
