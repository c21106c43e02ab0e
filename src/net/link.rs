//! Station link control and the supervisor task.

use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Ticker, Timer};
use esp_radio::wifi::WifiController;
use log::{debug, info};
use powerview::config::{LINK_TICK_MS, RECONNECT_PAUSE_MS};
use powerview::scene::Scene;
use powerview::{ConnectivitySupervisor, Credentials, Error, LinkControl, LinkEvent};

use super::{home_screen, mode_config, set_link_up, DISCONNECT_SIGNAL};
use crate::ui::backlight::SignalBacklight;
use crate::Screens;

/// The station half of the radio plus its IP stack.
pub struct EspLink {
    controller: WifiController<'static>,
    stack: Stack<'static>,
}

impl EspLink {
    pub fn new(controller: WifiController<'static>, stack: Stack<'static>) -> Self {
        Self { controller, stack }
    }

    /// Start the first association; the supervisor takes over from here.
    pub fn connect(&mut self) -> Result<(), Error> {
        self.controller.connect().map_err(|_| Error::Radio)
    }

    /// Drop the association without retrying.
    pub async fn disconnect(&mut self) {
        if let Err(e) = self.controller.disconnect_async().await {
            debug!("disconnect: {:?}", e);
        }
    }
}

impl LinkControl for EspLink {
    /// Associated *and* holding a DHCP lease.
    fn is_connected(&mut self) -> bool {
        matches!(self.controller.is_connected(), Ok(true)) && self.stack.is_config_up()
    }

    async fn reconnect(&mut self, credentials: &Credentials) -> Result<(), Error> {
        self.disconnect().await;
        Timer::after(Duration::from_millis(RECONNECT_PAUSE_MS)).await;
        self.controller
            .set_config(&mode_config(Some(credentials)))
            .map_err(|_| Error::Radio)?;
        self.controller.connect().map_err(|_| Error::Radio)
    }
}

type Supervisor = ConnectivitySupervisor<'static, CriticalSectionRawMutex, Scene, SignalBacklight, EspLink>;

/// Poll the link every tick and publish the debounced state.
#[embassy_executor::task]
pub async fn supervisor_task(screens: &'static Screens, link: EspLink, credentials: Option<Credentials>) {
    let mut supervisor: Supervisor = ConnectivitySupervisor::new(screens, link, credentials);
    let mut ticker = Ticker::every(Duration::from_millis(LINK_TICK_MS));
    info!("link supervisor running");

    loop {
        ticker.next().await;

        if DISCONNECT_SIGNAL.try_take().is_some() {
            info!("portal requested disconnect");
            supervisor.link().disconnect().await;
        }

        supervisor.set_home(home_screen());
        match supervisor.tick().await {
            Some(LinkEvent::StableConnected) => set_link_up(true),
            Some(LinkEvent::StableDisconnected) => set_link_up(false),
            None => {}
        }
    }
}
