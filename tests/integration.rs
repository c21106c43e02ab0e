//! Integration tests for powerview host-testable logic.
//!
//! These drive the public API the way the firmware does: settings and
//! portal on one side, the supervisor and screen machine on the other,
//! with the real `Scene` engine behind the render lock.

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;

use powerview::config::{AP_ADDRESS_STR, AP_SSID, DEFAULT_MONITOR_URL, RECONNECT_RETRY_TICKS};
use powerview::engine::{palette, WidgetEngine};
use powerview::portal::{self, LinkStatus, Request, Status};
use powerview::power::PowerSnapshot;
use powerview::scene::Scene;
use powerview::screen::ScreenWidgets;
use powerview::metrics::parse_response;
use powerview::{
    Backlight, Brightness, ConnectivitySupervisor, Credentials, Error, HomeSelector, Layout, LinkControl, LinkEvent,
    MemoryStore, PowerSource, Sample, Screen, ScreenStateMachine, Settings, WallClock,
};

// ════════════════════════════════════════════════════════════════════════
// Test doubles
// ════════════════════════════════════════════════════════════════════════

struct NoBacklight;

impl Backlight for NoBacklight {
    fn set_brightness(&self, _: Brightness) {}
}

#[derive(Default)]
struct FakeLink {
    connected: bool,
    reconnects: Vec<String>,
}

impl LinkControl for FakeLink {
    fn is_connected(&mut self) -> bool {
        self.connected
    }

    async fn reconnect(&mut self, credentials: &Credentials) -> Result<(), Error> {
        self.reconnects.push(credentials.ssid.as_str().to_owned());
        Ok(())
    }
}

/// Replays canned monitor responses, then fails like an unreachable host.
struct CannedMonitor {
    responses: std::collections::VecDeque<&'static str>,
}

impl PowerSource for CannedMonitor {
    async fn fetch(&mut self) -> Result<Sample, Error> {
        let raw = self.responses.pop_front().ok_or(Error::Network)?;
        Ok(parse_response(raw.as_bytes()))
    }
}

type Machine = ScreenStateMachine<NoopRawMutex, Scene, NoBacklight>;

fn boot_screens(settings: &Settings<MemoryStore>) -> Machine {
    let layout = Layout::for_rotation(settings.rotation());
    let (w, h) = layout.size();
    let machine = ScreenStateMachine::new(Scene::new(w, h), NoBacklight, layout);
    block_on(machine.render_lock().init()).unwrap();
    machine
}

fn boot_settings(store: MemoryStore) -> Settings<MemoryStore> {
    let mut settings = Settings::new(store);
    settings.begin().unwrap();
    settings
}

fn post(settings: &mut Settings<MemoryStore>, path: &str, body: &str) -> portal::Outcome {
    let raw = format!(
        "POST {} HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
        path,
        body.len(),
        body
    );
    let req = Request::parse(raw.as_bytes()).unwrap();
    portal::handle(settings, &req, &LinkStatus::default())
}

/// Simple RGB565 framebuffer.
struct Frame {
    size: Size,
    pixels: Vec<Rgb565>,
}

impl Frame {
    fn new(width: u16, height: u16) -> Self {
        Self {
            size: Size::new(width as u32, height as u32),
            pixels: vec![Rgb565::BLACK; width as usize * height as usize],
        }
    }

    fn count(&self, color: Rgb565) -> usize {
        self.pixels.iter().filter(|p| **p == color).count()
    }
}

impl OriginDimensions for Frame {
    fn size(&self) -> Size {
        self.size
    }
}

impl DrawTarget for Frame {
    type Color = Rgb565;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Rgb565>>,
    {
        for Pixel(p, c) in pixels {
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < self.size.width && (p.y as u32) < self.size.height {
                self.pixels[p.y as usize * self.size.width as usize + p.x as usize] = c;
            }
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════
// Provisioning
// ════════════════════════════════════════════════════════════════════════

#[test]
fn unconfigured_boot_shows_setup_and_never_reconnects() {
    let settings = boot_settings(MemoryStore::new());
    assert!(!settings.is_configured());
    assert_eq!(settings.rotation().degrees(), 90);
    assert!(!settings.rgb_enabled());
    assert_eq!(settings.monitor_url(), DEFAULT_MONITOR_URL);

    let screens = boot_screens(&settings);
    assert_eq!(screens.layout(), Layout::Landscape);
    block_on(screens.sync_setup_screen(settings.is_configured(), AP_SSID, AP_ADDRESS_STR)).unwrap();
    assert_eq!(block_on(screens.active()), Some(Screen::ApSetup));

    let mut supervisor = ConnectivitySupervisor::new(&screens, FakeLink::default(), settings.credentials());
    assert!(!supervisor.is_configured());
    for _ in 0..200 {
        block_on(supervisor.tick());
    }
    assert!(supervisor.link().reconnects.is_empty());
    assert_eq!(block_on(screens.active()), Some(Screen::ApSetup));
}

#[test]
fn provisioning_then_restart_connects_cleanly() {
    let mut settings = boot_settings(MemoryStore::new());

    let out = post(&mut settings, "/save", "ssid=Home&password=secret&monitor_url=192.168.1.5");
    assert_eq!(out.reply.status, Status::Ok);
    assert!(out.effects.restart);
    assert_eq!(settings.monitor_url(), "http://192.168.1.5/metrics");

    // Restart: same store, fresh everything else
    let settings = boot_settings(settings.into_store());
    assert!(settings.is_configured());
    let screens = boot_screens(&settings);
    block_on(screens.sync_setup_screen(settings.is_configured(), AP_SSID, AP_ADDRESS_STR)).unwrap();
    assert_eq!(block_on(screens.active()), None);

    let link = FakeLink {
        connected: true,
        ..FakeLink::default()
    };
    let mut supervisor = ConnectivitySupervisor::new(&screens, link, settings.credentials());
    assert_eq!(block_on(supervisor.tick()), None);
    assert_eq!(block_on(supervisor.tick()), None);
    assert_eq!(block_on(supervisor.tick()), Some(LinkEvent::StableConnected));

    assert!(supervisor.link().reconnects.is_empty());
    assert_eq!(block_on(screens.active()), Some(Screen::PowerMonitor));
    let guard = block_on(screens.render_lock().acquire()).unwrap();
    assert!(!guard.screens.is_built(Screen::LinkError));
}

#[test]
fn rotation_change_restarts_only_when_different() {
    let mut settings = boot_settings(MemoryStore::new());

    let out = post(&mut settings, "/screen_rotation", "rotation=90");
    assert_eq!(out.reply.status, Status::Ok);
    assert!(!out.effects.restart);

    let out = post(&mut settings, "/screen_rotation", "rotation=180");
    assert_eq!(out.reply.status, Status::Ok);
    assert!(out.effects.restart);

    // New layout only after the restart
    let settings = boot_settings(settings.into_store());
    assert_eq!(settings.rotation().degrees(), 180);
    assert_eq!(boot_screens(&settings).layout(), Layout::Portrait);
}

#[test]
fn factory_reset_returns_to_setup() {
    let mut settings = boot_settings(MemoryStore::new());
    post(&mut settings, "/save", "ssid=Home&password=secret");
    let out = post(&mut settings, "/reset", "");
    assert!(out.effects.restart);
    assert_eq!(out.effects.configured, Some(false));

    let settings = boot_settings(settings.into_store());
    assert!(!settings.is_configured());
    assert_eq!(settings.monitor_url(), DEFAULT_MONITOR_URL);
}

// ════════════════════════════════════════════════════════════════════════
// Link supervision
// ════════════════════════════════════════════════════════════════════════

fn connected_supervisor(screens: &Machine) -> ConnectivitySupervisor<'_, NoopRawMutex, Scene, NoBacklight, FakeLink> {
    let link = FakeLink {
        connected: true,
        ..FakeLink::default()
    };
    let mut supervisor = ConnectivitySupervisor::new(screens, link, Some(Credentials::new("Home", "secret").unwrap()));
    for _ in 0..3 {
        block_on(supervisor.tick());
    }
    supervisor
}

#[test]
fn link_loss_shows_error_and_reconnects_once() {
    let settings = boot_settings(MemoryStore::new());
    let screens = boot_screens(&settings);
    let mut supervisor = connected_supervisor(&screens);
    assert_eq!(block_on(screens.active()), Some(Screen::PowerMonitor));

    supervisor.link().connected = false;
    assert_eq!(block_on(supervisor.tick()), None);
    assert_eq!(block_on(supervisor.tick()), None);
    assert_eq!(block_on(supervisor.tick()), Some(LinkEvent::StableDisconnected));

    assert_eq!(block_on(screens.active()), Some(Screen::LinkError));
    assert_eq!(supervisor.link().reconnects, ["Home"]);

    // Still down: nothing more until the retry interval elapses
    for _ in 0..RECONNECT_RETRY_TICKS - 1 {
        block_on(supervisor.tick());
    }
    assert_eq!(supervisor.link().reconnects.len(), 1);
    block_on(supervisor.tick());
    assert_eq!(supervisor.link().reconnects.len(), 2);
    assert_eq!(supervisor.backoff().interval(), RECONNECT_RETRY_TICKS * 2);
}

#[test]
fn recovery_leaves_error_screen() {
    let settings = boot_settings(MemoryStore::new());
    let screens = boot_screens(&settings);
    let mut supervisor = connected_supervisor(&screens);

    supervisor.link().connected = false;
    for _ in 0..3 {
        block_on(supervisor.tick());
    }
    assert_eq!(block_on(screens.active()), Some(Screen::LinkError));

    supervisor.link().connected = true;
    for _ in 0..3 {
        block_on(supervisor.tick());
    }
    assert_eq!(block_on(screens.active()), Some(Screen::PowerMonitor));
    assert!(!supervisor.backoff().is_armed());
}

#[test]
fn short_dropout_keeps_current_screen() {
    let settings = boot_settings(MemoryStore::new());
    let screens = boot_screens(&settings);
    let mut supervisor = connected_supervisor(&screens);

    // Below the threshold nothing happens
    block_on(screens.show_scanning()).unwrap();
    supervisor.link().connected = false;
    block_on(supervisor.tick());
    block_on(supervisor.tick());
    supervisor.link().connected = true;
    block_on(supervisor.tick());
    assert_eq!(block_on(screens.active()), Some(Screen::Scanning));
    assert!(supervisor.link().reconnects.is_empty());
}

#[test]
fn stale_refresh_does_not_cover_link_error() {
    let settings = boot_settings(MemoryStore::new());
    let screens = boot_screens(&settings);
    let mut supervisor = connected_supervisor(&screens);
    let mut home = HomeSelector::new();

    // The refresh loop saw the link up and started a fetch...
    assert_eq!(block_on(screens.active()), Some(Screen::PowerMonitor));
    let target = home.observe(&PowerSnapshot::unavailable());

    // ...the link dropped while it waited...
    supervisor.link().connected = false;
    for _ in 0..3 {
        block_on(supervisor.tick());
    }
    assert_eq!(block_on(screens.active()), Some(Screen::LinkError));

    // ...and the late result must not repaint the home screen
    assert!(!block_on(screens.show_home(target)).unwrap());
    assert_eq!(block_on(screens.active()), Some(Screen::LinkError));

    block_on(supervisor.tick());
    assert_eq!(block_on(screens.active()), Some(Screen::LinkError));
}

#[test]
fn retry_restores_link_error_screen() {
    let settings = boot_settings(MemoryStore::new());
    let screens = boot_screens(&settings);
    let mut supervisor = connected_supervisor(&screens);

    supervisor.link().connected = false;
    for _ in 0..3 {
        block_on(supervisor.tick());
    }
    assert_eq!(block_on(screens.active()), Some(Screen::LinkError));

    // Something painted over the error screen while offline
    block_on(screens.show(Screen::PowerMonitor)).unwrap();
    for _ in 0..RECONNECT_RETRY_TICKS {
        block_on(supervisor.tick());
    }
    assert_eq!(supervisor.link().reconnects.len(), 2);
    assert_eq!(block_on(screens.active()), Some(Screen::LinkError));
}

#[test]
fn flapping_link_causes_no_transition() {
    let settings = boot_settings(MemoryStore::new());
    let screens = boot_screens(&settings);
    let mut supervisor = connected_supervisor(&screens);

    for connected in [false, true, false, false, true, false, true, true] {
        supervisor.link().connected = connected;
        assert_eq!(block_on(supervisor.tick()), None);
    }
    assert_eq!(block_on(screens.active()), Some(Screen::PowerMonitor));
}

// ════════════════════════════════════════════════════════════════════════
// Rendering
// ════════════════════════════════════════════════════════════════════════

#[test]
fn data_error_renders_placeholders() {
    let settings = boot_settings(MemoryStore::new());
    let screens = boot_screens(&settings);
    block_on(screens.show_power_monitor()).unwrap();
    block_on(screens.update_power(&PowerSnapshot::unavailable())).unwrap();

    let mut guard = block_on(screens.render_lock().acquire()).unwrap();
    let Some(ScreenWidgets::PowerMonitor { power, .. }) = guard.screens.widgets(Screen::PowerMonitor) else {
        panic!("power screen not built");
    };
    for port in power.ports {
        assert_eq!(guard.engine.text(port.value), Some("--.-W"));
        assert_eq!(guard.engine.value(port.bar), Some(0));
    }
    assert_eq!(guard.engine.text(power.total), Some("--.-W"));

    // Let the animation settle and render a frame
    for _ in 0..100 {
        guard.engine.pump_timers();
    }
    let (w, h) = screens.layout().size();
    let mut frame = Frame::new(w, h);
    guard.engine.render(&mut frame).unwrap();
    assert!(frame.count(palette::BAND_INVALID) > 0);
}

#[test]
fn link_error_screen_renders_alert_text() {
    let settings = boot_settings(MemoryStore::new());
    let screens = boot_screens(&settings);
    block_on(screens.show_link_error()).unwrap();

    let mut guard = block_on(screens.render_lock().acquire()).unwrap();
    assert!(guard.engine.take_dirty());
    let mut frame = Frame::new(320, 172);
    guard.engine.render(&mut frame).unwrap();
    assert!(frame.count(palette::ALERT) > 0);
    assert!(!guard.engine.take_dirty());
}

#[test]
fn hidden_screens_are_not_rendered() {
    let settings = boot_settings(MemoryStore::new());
    let screens = boot_screens(&settings);
    block_on(screens.show_link_error()).unwrap();
    block_on(screens.show_clock()).unwrap();

    let guard = block_on(screens.render_lock().acquire()).unwrap();
    let mut frame = Frame::new(320, 172);
    guard.engine.render(&mut frame).unwrap();
    assert_eq!(frame.count(palette::ALERT), 0);
}

// ════════════════════════════════════════════════════════════════════════
// Monitor refresh
// ════════════════════════════════════════════════════════════════════════

const CHARGING: &str = "HTTP/1.1 200 OK\r\nDate: Sun, 06 Nov 1994 08:49:37 GMT\r\n\r\n\
port_voltage_mv{port=\"1\"} 20000\nport_power_w{port=\"1\"} 45.2\n";
const IDLE: &str = "HTTP/1.1 200 OK\r\nDate: Sun, 06 Nov 1994 08:49:38 GMT\r\n\r\ntotal_power_w 0.1\n";

/// One pass of the firmware's refresh loop.
fn refresh(screens: &Machine, source: &mut CannedMonitor, home: &mut HomeSelector, clock: &mut WallClock, now_ms: u64) -> Screen {
    let snapshot = match block_on(source.fetch()) {
        Ok(sample) => {
            if let Some(unix) = sample.unix_time {
                clock.sync(unix, now_ms);
            }
            sample.power
        }
        Err(_) => PowerSnapshot::unavailable(),
    };
    let target = home.observe(&snapshot);
    assert!(block_on(screens.show_home(target)).unwrap());
    block_on(screens.update_power(&snapshot)).unwrap();
    if let Some(now) = clock.now(now_ms) {
        block_on(screens.update_clock(now)).unwrap();
    }
    target
}

#[test]
fn idle_charger_dims_to_clock_and_wakes_on_load() {
    let settings = boot_settings(MemoryStore::new());
    let screens = boot_screens(&settings);
    let mut source = CannedMonitor {
        responses: [CHARGING, IDLE, IDLE, IDLE, CHARGING].into_iter().collect(),
    };
    let mut home = HomeSelector::with_idle_refreshes(3);
    let mut clock = WallClock::new();

    let shown: Vec<Screen> = (0..5)
        .map(|i| refresh(&screens, &mut source, &mut home, &mut clock, i * 1000))
        .collect();
    assert_eq!(
        shown,
        [
            Screen::PowerMonitor,
            Screen::PowerMonitor,
            Screen::PowerMonitor,
            Screen::Clock,
            Screen::PowerMonitor
        ]
    );

    // The clock was built while idle and kept the last server time it showed
    let guard = block_on(screens.render_lock().acquire()).unwrap();
    let Some(ScreenWidgets::Clock { time, date, .. }) = guard.screens.widgets(Screen::Clock) else {
        panic!("clock screen not built");
    };
    assert_eq!(guard.engine.text(time), Some("08:49:38"));
    assert_eq!(guard.engine.text(date), Some("1994-11-06"));

    let Some(ScreenWidgets::PowerMonitor { power, .. }) = guard.screens.widgets(Screen::PowerMonitor) else {
        panic!("power screen not built");
    };
    assert_eq!(guard.engine.text(power.ports[0].value), Some("45.20W"));
}

#[test]
fn unreachable_monitor_keeps_power_screen_with_placeholders() {
    let settings = boot_settings(MemoryStore::new());
    let screens = boot_screens(&settings);
    let mut source = CannedMonitor {
        responses: Default::default(),
    };
    let mut home = HomeSelector::with_idle_refreshes(1);
    let mut clock = WallClock::new();

    for i in 0..3 {
        assert_eq!(
            refresh(&screens, &mut source, &mut home, &mut clock, i * 1000),
            Screen::PowerMonitor
        );
    }
    assert!(!clock.is_synced());
    let guard = block_on(screens.render_lock().acquire()).unwrap();
    let Some(ScreenWidgets::PowerMonitor { power, .. }) = guard.screens.widgets(Screen::PowerMonitor) else {
        panic!("power screen not built");
    };
    assert_eq!(guard.engine.text(power.total), Some("--.-W"));
}
