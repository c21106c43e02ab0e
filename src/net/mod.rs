//! WiFi radio and network stacks.
//!
//! The radio runs AP + STA at once: the access point always serves the
//! configuration portal at 192.168.4.1, the station joins the stored
//! network when one is configured.
//!
//! ```text
//!   AP stack  ── portal (80) · DHCP (67) · DNS (53)
//!   STA stack ── portal (80) · monitor client · link supervision
//! ```

pub mod captive;
pub mod link;
pub mod monitor;
pub mod portal;

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_net::{Config, Ipv4Address, Ipv4Cidr, Runner, Stack, StackResources, StaticConfigV4};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::signal::Signal;
use esp_hal::peripherals::WIFI;
use esp_hal::rng::Rng;
use esp_radio::wifi::{AccessPointConfig, ClientConfig, ModeConfig, WifiController, WifiDevice};
use esp_radio::Controller;
use log::info;
use powerview::config::{AP_ADDRESS, AP_SSID};
use powerview::{Credentials, Error, Screen};
use static_cell::StaticCell;

static RADIO: StaticCell<Controller<'static>> = StaticCell::new();
static AP_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
static STA_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();

/// Debounced station link state, published by the supervisor.
static LINK_UP: AtomicBool = AtomicBool::new(false);

/// Home screen chosen by the refresh task, used by the supervisor when
/// the link recovers.
static HOME_SCREEN: BlockingMutex<CriticalSectionRawMutex, Cell<Screen>> =
    BlockingMutex::new(Cell::new(Screen::PowerMonitor));

/// Portal request to drop the station association.
static DISCONNECT_SIGNAL: Signal<CriticalSectionRawMutex, ()> = Signal::new();

pub fn link_up() -> bool {
    LINK_UP.load(Ordering::Relaxed)
}

fn set_link_up(up: bool) {
    LINK_UP.store(up, Ordering::Relaxed);
}

pub fn home_screen() -> Screen {
    HOME_SCREEN.lock(|home| home.get())
}

pub fn set_home_screen(screen: Screen) {
    HOME_SCREEN.lock(|home| home.set(screen));
}

pub fn request_disconnect() {
    DISCONNECT_SIGNAL.signal(());
}

/// Everything the radio bring-up hands to the tasks.
pub struct Network {
    pub controller: WifiController<'static>,
    pub ap: Stack<'static>,
    pub sta: Stack<'static>,
    pub ap_runner: Runner<'static, WifiDevice<'static>>,
    pub sta_runner: Runner<'static, WifiDevice<'static>>,
}

/// Radio mode for the given station credentials; without credentials the
/// station half stays unconfigured.
pub fn mode_config(credentials: Option<&Credentials>) -> ModeConfig {
    let client = match credentials {
        Some(c) => ClientConfig::default()
            .with_ssid(c.ssid.as_str().into())
            .with_password(c.password.as_str().into()),
        None => ClientConfig::default(),
    };
    let ap = AccessPointConfig::default().with_ssid(AP_SSID.into());
    ModeConfig::ApSta(client, ap)
}

/// Bring up the radio and both network stacks. The controller is
/// configured and started; connecting is left to the caller.
pub async fn init(wifi: WIFI<'static>, credentials: Option<&Credentials>) -> Result<Network, Error> {
    let radio = RADIO.init(esp_radio::init().map_err(|_| Error::Radio)?);
    let (mut controller, interfaces) =
        esp_radio::wifi::new(radio, wifi, Default::default()).map_err(|_| Error::Radio)?;

    controller
        .set_config(&mode_config(credentials))
        .map_err(|_| Error::Radio)?;
    controller.start_async().await.map_err(|_| Error::Radio)?;
    info!("radio started, AP \"{}\"", AP_SSID);

    let [a, b, c, d] = AP_ADDRESS;
    let ap_address = Ipv4Address::new(a, b, c, d);
    let ap_config = Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(ap_address, 24),
        gateway: Some(ap_address),
        dns_servers: Default::default(),
    });
    let sta_config = Config::dhcpv4(Default::default());

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;

    let (ap, ap_runner) = embassy_net::new(
        interfaces.ap,
        ap_config,
        AP_RESOURCES.init(StackResources::new()),
        seed,
    );
    let (sta, sta_runner) = embassy_net::new(
        interfaces.sta,
        sta_config,
        STA_RESOURCES.init(StackResources::new()),
        seed ^ 0x5A5A_5A5A,
    );

    Ok(Network {
        controller,
        ap,
        sta,
        ap_runner,
        sta_runner,
    })
}

/// Drive one network stack; spawned once per interface.
#[embassy_executor::task(pool_size = 2)]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}
