//! Screen state machine - which screen is visible, and getting there safely.

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::String;

use super::layout::ScreenWidgets;
use super::{Backlight, BuildContext, ClockTime, Layout, Screen};
use crate::engine::{palette, Font, Style, WidgetEngine};
use crate::error::Error;
use crate::power::{readout, PowerSnapshot};
use crate::render_lock::{RenderGuard, RenderLock, Surface};

/// Coordinates the five screens on one panel.
///
/// At most one screen is active at any time. Every operation runs under
/// the render lock; the backlight is adjusted after the lock is released.
pub struct ScreenStateMachine<M: RawMutex, E: WidgetEngine, B: Backlight> {
    lock: RenderLock<M, E>,
    backlight: B,
    layout: Layout,
}

impl<M: RawMutex, E: WidgetEngine, B: Backlight> ScreenStateMachine<M, E, B> {
    /// The layout is fixed for the lifetime of the machine; a rotation
    /// change takes effect after restart.
    pub const fn new(engine: E, backlight: B, layout: Layout) -> Self {
        Self {
            lock: RenderLock::new(engine),
            backlight,
            layout,
        }
    }

    pub fn render_lock(&self) -> &RenderLock<M, E> {
        &self.lock
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn backlight(&self) -> &B {
        &self.backlight
    }

    /// Show the captive-portal instructions for the given AP.
    pub async fn show_ap_setup(&self, ssid: &str, address: &str) -> Result<(), Error> {
        let ctx = BuildContext {
            layout: self.layout,
            ap: Some((ssid, address)),
        };
        self.show_with(Screen::ApSetup, &ctx).await
    }

    pub async fn show_link_error(&self) -> Result<(), Error> {
        self.show(Screen::LinkError).await
    }

    pub async fn show_clock(&self) -> Result<(), Error> {
        self.show(Screen::Clock).await
    }

    pub async fn show_power_monitor(&self) -> Result<(), Error> {
        self.show(Screen::PowerMonitor).await
    }

    pub async fn show_scanning(&self) -> Result<(), Error> {
        self.show(Screen::Scanning).await
    }

    /// Make `screen` the single active screen.
    ///
    /// Idempotent: showing the active screen changes nothing. A registry
    /// with more than one active screen is reset before the transition.
    /// [`Screen::ApSetup`] built through here shows no AP details; use
    /// [`show_ap_setup`](Self::show_ap_setup).
    pub async fn show(&self, screen: Screen) -> Result<(), Error> {
        let ctx = BuildContext {
            layout: self.layout,
            ap: None,
        };
        self.show_with(screen, &ctx).await
    }

    async fn show_with(&self, screen: Screen, ctx: &BuildContext<'_>) -> Result<(), Error> {
        let switched = {
            let mut guard = self.acquire(screen).await?;
            transition(&mut guard, screen, ctx)?
        };
        if switched {
            self.backlight.set_brightness(screen.brightness());
        }
        Ok(())
    }

    /// Show `home` unless a modal screen (setup, link error, scanning) is
    /// active. The check and the switch happen under one hold of the render
    /// lock, so a modal screen shown meanwhile is never painted over.
    ///
    /// Returns whether `home` is the active screen afterwards.
    pub async fn show_home(&self, home: Screen) -> Result<bool, Error> {
        let ctx = BuildContext {
            layout: self.layout,
            ap: None,
        };
        let switched = {
            let mut guard = self.acquire(home).await?;
            if let Some(active) = guard.screens.active() {
                if active.is_modal() && active != home {
                    debug!("{:?} holds the display, {:?} deferred", active, home);
                    return Ok(false);
                }
            }
            transition(&mut guard, home, &ctx)?
        };
        if switched {
            self.backlight.set_brightness(home.brightness());
        }
        Ok(true)
    }

    /// Hide one screen and clear its active flag. Screens that were never
    /// built are left alone.
    pub async fn hide(&self, screen: Screen) -> Result<(), Error> {
        let mut guard = self.acquire(screen).await?;
        let Surface { engine, screens, .. } = &mut *guard;
        screens.set_visible(engine, screen, false);
        screens.set_active(screen, false);
        Ok(())
    }

    /// Hide everything and clear all active flags.
    pub async fn reset_all(&self) -> Result<(), Error> {
        let mut guard = self.lock.acquire().await?;
        let Surface { engine, screens, .. } = &mut *guard;
        warn!("resetting all screens");
        screens.hide_all(engine);
        Ok(())
    }

    /// Currently active screen. `None` also when the lock is unavailable.
    pub async fn active(&self) -> Option<Screen> {
        let guard = self.lock.acquire().await.ok()?;
        guard.screens.active()
    }

    pub async fn is_active(&self, screen: Screen) -> bool {
        self.active().await == Some(screen)
    }

    /// Keep the setup screen in line with the configured state: shown while
    /// unconfigured, hidden once credentials exist.
    pub async fn sync_setup_screen(&self, configured: bool, ssid: &str, address: &str) -> Result<(), Error> {
        let showing = self.is_active(Screen::ApSetup).await;
        match (configured, showing) {
            (false, false) => self.show_ap_setup(ssid, address).await,
            (true, true) => self.hide(Screen::ApSetup).await,
            _ => Ok(()),
        }
    }

    /// Write a power snapshot to the power screen. Ignored unless the power
    /// screen is active.
    pub async fn update_power(&self, snapshot: &PowerSnapshot) -> Result<(), Error> {
        let mut guard = self.lock.acquire().await?;
        let Surface { engine, screens, .. } = &mut *guard;
        if !screens.is_active(Screen::PowerMonitor) {
            return Ok(());
        }
        let Some(ScreenWidgets::PowerMonitor { power, .. }) = screens.widgets(Screen::PowerMonitor) else {
            return Ok(());
        };

        let view = readout(snapshot);
        for (port, reading) in power.ports.iter().zip(view.ports.iter()) {
            engine.set_style(port.value, Style::text(reading.color, Font::Medium));
            engine.set_text(port.value, &reading.text);
            engine.set_style(port.bar, Style::indicator(reading.color, palette::TRACK));
            engine.set_value(port.bar, reading.percent, true);
        }
        engine.set_style(power.total, Style::text(view.total.color, Font::Large));
        engine.set_text(power.total, &view.total.text);
        engine.set_value(power.gauge, view.total.percent, true);
        Ok(())
    }

    /// Write the time to the clock screen. Ignored unless the clock is
    /// active; skips the engine entirely when the time is unchanged since
    /// the previous write.
    pub async fn update_clock(&self, now: ClockTime) -> Result<(), Error> {
        let mut guard = self.lock.acquire().await?;
        let Surface {
            engine,
            screens,
            shown_clock,
        } = &mut *guard;
        if !screens.is_active(Screen::Clock) {
            return Ok(());
        }
        let Some(ScreenWidgets::Clock { time, date, .. }) = screens.widgets(Screen::Clock) else {
            return Ok(());
        };

        let previous = shown_clock.replace(now);
        if previous == Some(now) {
            return Ok(());
        }

        let mut text: String<16> = String::new();
        let _ = write!(text, "{:02}:{:02}:{:02}", now.hour, now.minute, now.second);
        engine.set_text(time, &text);

        let date_changed = previous.map_or(true, |p| (p.year, p.month, p.day) != (now.year, now.month, now.day));
        if date_changed {
            text.clear();
            let _ = write!(text, "{:04}-{:02}-{:02}", now.year, now.month, now.day);
            engine.set_text(date, &text);
        }
        Ok(())
    }

    /// Progress text on the scanning screen.
    pub async fn update_scan_status(&self, status: &str) -> Result<(), Error> {
        let mut guard = self.lock.acquire().await?;
        let Surface { engine, screens, .. } = &mut *guard;
        if let Some(ScreenWidgets::Scanning { status: label, .. }) = screens.widgets(Screen::Scanning) {
            engine.set_text(label, status);
        }
        Ok(())
    }

    async fn acquire(&self, screen: Screen) -> Result<RenderGuard<'_, M, E>, Error> {
        self.lock.acquire().await.map_err(|e| {
            error!("{:?} skipped, render lock unavailable", screen);
            e
        })
    }
}

/// Make `screen` the single active screen. Returns `false` when it already
/// was; the caller only touches the backlight on a real switch.
fn transition<E: WidgetEngine>(
    surface: &mut Surface<E>,
    screen: Screen,
    ctx: &BuildContext<'_>,
) -> Result<bool, Error> {
    let Surface { engine, screens, .. } = surface;

    let active = screens.active_count();
    if active > 1 {
        warn!("{} screens active at once, resetting", active);
        screens.hide_all(engine);
    }

    if screens.is_active(screen) {
        debug!("{:?} already active", screen);
        return Ok(false);
    }

    screens.hide_all(engine);
    if let Err(e) = screens.ensure_built(engine, screen, ctx) {
        error!("could not build {:?} screen", screen);
        return Err(e);
    }
    screens.set_visible(engine, screen, true);
    screens.set_active(screen, true);
    info!("showing {:?}", screen);
    Ok(true)
}
