//! Connectivity supervisor.
//!
//! Polled every [`LINK_TICK_MS`](crate::config::LINK_TICK_MS). Feeds the raw
//! link status through [`LinkMonitor`] and reacts to debounced changes:
//!
//! ```text
//!   StableDisconnected (configured) ──► show LinkError ──► reconnect ──► backoff armed
//!   still disconnected, backoff due  ──────────────────► reconnect (interval doubles)
//!   StableConnected                  ──► LinkError / nothing shown ──► show home screen
//! ```
//!
//! The render lock is never held across a reconnect; screen calls return
//! before the radio is touched.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::config::{RECONNECT_RETRY_MAX_TICKS, RECONNECT_RETRY_TICKS};
use crate::engine::WidgetEngine;
use crate::error::Error;
use crate::link::{LinkEvent, LinkMonitor, LinkState};
use crate::screen::{Backlight, Screen, ScreenStateMachine};
use crate::settings::Credentials;

/// Station-mode radio as seen by the supervisor.
#[allow(async_fn_in_trait)]
pub trait LinkControl {
    /// Raw, undebounced link status.
    fn is_connected(&mut self) -> bool;

    /// Drop the current association, pause briefly, and start connecting
    /// with `credentials`. Returns once the attempt is issued, not when it
    /// completes.
    async fn reconnect(&mut self, credentials: &Credentials) -> Result<(), Error>;
}

/// Tick-counted retry schedule while the link stays down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectBackoff {
    interval: u32,
    remaining: u32,
    armed: bool,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectBackoff {
    pub const fn new() -> Self {
        Self {
            interval: RECONNECT_RETRY_TICKS,
            remaining: 0,
            armed: false,
        }
    }

    /// Start counting after an initial reconnect.
    pub fn arm(&mut self) {
        self.interval = RECONNECT_RETRY_TICKS;
        self.remaining = self.interval;
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        *self = Self::new();
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Ticks between the current and the next retry.
    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Count one tick. Returns true when a retry is due; the next interval
    /// is then doubled up to [`RECONNECT_RETRY_MAX_TICKS`].
    pub fn tick(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return false;
        }
        self.interval = (self.interval.saturating_mul(2)).min(RECONNECT_RETRY_MAX_TICKS);
        self.remaining = self.interval;
        true
    }
}

/// Watches the link and keeps the display in step with it.
pub struct ConnectivitySupervisor<'a, M, E, B, L>
where
    M: RawMutex,
    E: WidgetEngine,
    B: Backlight,
    L: LinkControl,
{
    screens: &'a ScreenStateMachine<M, E, B>,
    link: L,
    monitor: LinkMonitor,
    backoff: ReconnectBackoff,
    /// `None` while the device has no saved network.
    credentials: Option<Credentials>,
    home: Screen,
}

impl<'a, M, E, B, L> ConnectivitySupervisor<'a, M, E, B, L>
where
    M: RawMutex,
    E: WidgetEngine,
    B: Backlight,
    L: LinkControl,
{
    pub fn new(screens: &'a ScreenStateMachine<M, E, B>, link: L, credentials: Option<Credentials>) -> Self {
        Self {
            screens,
            link,
            monitor: LinkMonitor::new(),
            backoff: ReconnectBackoff::new(),
            credentials,
            home: Screen::PowerMonitor,
        }
    }

    /// Screen shown once the link is (back) up.
    pub fn set_home(&mut self, home: Screen) {
        self.home = home;
    }

    pub fn home(&self) -> Screen {
        self.home
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn link_state(&self) -> Option<LinkState> {
        self.monitor.state()
    }

    pub fn backoff(&self) -> &ReconnectBackoff {
        &self.backoff
    }

    pub fn link(&mut self) -> &mut L {
        &mut self.link
    }

    /// One supervision step.
    pub async fn tick(&mut self) -> Option<LinkEvent> {
        let connected = self.link.is_connected();
        let event = self.monitor.sample(connected);
        match event {
            Some(LinkEvent::StableDisconnected) => self.on_disconnected().await,
            Some(LinkEvent::StableConnected) => self.on_connected().await,
            None => self.retry_if_due().await,
        }
        event
    }

    async fn on_disconnected(&mut self) {
        let Some(credentials) = self.credentials.as_ref() else {
            debug!("link down, no saved network");
            return;
        };
        warn!("link lost, reconnecting to {}", credentials.ssid.as_str());

        // Screen first; the lock is released before the radio is touched
        if let Err(e) = self.screens.show_link_error().await {
            warn!("link error screen failed: {:?}", e);
        }

        if self.link.reconnect(credentials).await.is_err() {
            error!("reconnect request rejected");
        }
        self.backoff.arm();
    }

    async fn on_connected(&mut self) {
        info!("link up");
        self.backoff.disarm();

        match self.screens.active().await {
            None | Some(Screen::LinkError) => {
                if let Err(e) = self.screens.show(self.home).await {
                    warn!("showing {:?} failed: {:?}", self.home, e);
                }
            }
            Some(_) => {}
        }
    }

    async fn retry_if_due(&mut self) {
        if self.monitor.state() != Some(LinkState::Disconnected) || !self.backoff.tick() {
            return;
        }
        let Some(credentials) = self.credentials.as_ref() else {
            return;
        };
        info!("still offline, retrying (next in {} ticks)", self.backoff.interval());
        // Idempotent; puts the error screen back if anything replaced it
        if let Err(e) = self.screens.show_link_error().await {
            warn!("link error screen failed: {:?}", e);
        }
        if self.link.reconnect(credentials).await.is_err() {
            error!("reconnect request rejected");
        }
    }
}
