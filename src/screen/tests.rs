//! Screen state machine tests against a recording engine.

use core::cell::{Cell, RefCell};

use embassy_futures::block_on;
use embassy_futures::join::join;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;

use super::*;
use crate::engine::{Align, Style, WidgetEngine, WidgetKind};
use crate::error::Error;
use crate::power::{PortReading, PowerSnapshot};
use crate::settings::Rotation;

// ════════════════════════════════════════════════════════════════════════
// Test doubles
// ════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, Default)]
struct Node {
    parent: Option<usize>,
    alive: bool,
    hidden: bool,
    text: std::string::String,
    value: i32,
}

/// Engine that records every widget and how often each call was made.
#[derive(Default)]
struct RecordingEngine {
    nodes: Vec<Node>,
    ready: bool,
    /// Fail `init` this many more times.
    init_failures: u32,
    init_calls: u32,
    /// Fail `create` once this many widgets exist.
    create_limit: Option<usize>,
    creates: usize,
    pumps: u32,
}

impl RecordingEngine {
    fn ready() -> Self {
        Self {
            ready: true,
            ..Self::default()
        }
    }

    fn live(&self) -> usize {
        self.nodes.iter().filter(|n| n.alive).count()
    }

    fn text_of(&self, handle: usize) -> &str {
        &self.nodes[handle].text
    }
}

impl WidgetEngine for RecordingEngine {
    type Handle = usize;

    fn init(&mut self) -> Result<(), Error> {
        self.init_calls += 1;
        if self.init_failures > 0 {
            self.init_failures -= 1;
            return Err(Error::Display);
        }
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn create(&mut self, parent: Option<usize>, _: WidgetKind) -> Option<usize> {
        if self.create_limit.is_some_and(|limit| self.live() >= limit) {
            return None;
        }
        self.creates += 1;
        self.nodes.push(Node {
            parent,
            alive: true,
            ..Node::default()
        });
        Some(self.nodes.len() - 1)
    }

    fn delete(&mut self, handle: usize) {
        self.nodes[handle].alive = false;
        let children: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| self.nodes[i].alive && self.nodes[i].parent == Some(handle))
            .collect();
        for child in children {
            self.delete(child);
        }
    }

    fn set_size(&mut self, _: usize, _: u16, _: u16) {}

    fn align(&mut self, _: usize, _: Align, _: i16, _: i16) {}

    fn set_style(&mut self, _: usize, _: Style) {}

    fn set_text(&mut self, handle: usize, text: &str) {
        self.nodes[handle].text = text.into();
    }

    fn set_range(&mut self, _: usize, _: i32, _: i32) {}

    fn set_value(&mut self, handle: usize, value: i32, _: bool) {
        self.nodes[handle].value = value;
    }

    fn set_hidden(&mut self, handle: usize, hidden: bool) {
        self.nodes[handle].hidden = hidden;
    }

    fn is_hidden(&self, handle: usize) -> bool {
        self.nodes[handle].hidden
    }

    fn pump_timers(&mut self) {
        self.pumps += 1;
    }
}

#[derive(Default)]
struct RecordingBacklight {
    levels: RefCell<Vec<Brightness>>,
}

impl Backlight for RecordingBacklight {
    fn set_brightness(&self, level: Brightness) {
        self.levels.borrow_mut().push(level);
    }
}

type Machine = ScreenStateMachine<NoopRawMutex, RecordingEngine, RecordingBacklight>;

fn machine_with(engine: RecordingEngine) -> Machine {
    ScreenStateMachine::new(engine, RecordingBacklight::default(), Layout::Landscape)
}

fn machine() -> Machine {
    machine_with(RecordingEngine::ready())
}

/// Run `f` on the surface behind the lock.
fn with_surface<R>(m: &Machine, f: impl FnOnce(&mut crate::render_lock::Surface<RecordingEngine>) -> R) -> R {
    let mut guard = block_on(m.render_lock().acquire()).unwrap();
    f(&mut *guard)
}

fn root_hidden(m: &Machine, screen: Screen) -> Option<bool> {
    with_surface(m, |s| {
        let root = s.screens.widgets(screen)?.root();
        Some(s.engine.is_hidden(root))
    })
}

// ════════════════════════════════════════════════════════════════════════
// Transitions
// ════════════════════════════════════════════════════════════════════════

#[test]
fn starts_with_nothing_active() {
    let m = machine();
    assert_eq!(block_on(m.active()), None);
}

#[test]
fn show_makes_screen_the_only_active_one() {
    let m = machine();
    for screen in Screen::ALL {
        block_on(m.show(screen)).unwrap();
        assert_eq!(block_on(m.active()), Some(screen));
        with_surface(&m, |s| assert_eq!(s.screens.active_count(), 1));
    }
}

#[test]
fn previous_screen_is_hidden_not_destroyed() {
    let m = machine();
    block_on(m.show_ap_setup("ESP32_Config", "192.168.4.1")).unwrap();
    block_on(m.show_power_monitor()).unwrap();

    assert_eq!(root_hidden(&m, Screen::ApSetup), Some(true));
    assert_eq!(root_hidden(&m, Screen::PowerMonitor), Some(false));
    with_surface(&m, |s| assert!(s.screens.is_built(Screen::ApSetup)));
}

#[test]
fn show_is_idempotent() {
    let m = machine();
    block_on(m.show_clock()).unwrap();
    let creates = with_surface(&m, |s| s.engine.creates);
    let hidden_before: Vec<bool> = with_surface(&m, |s| s.engine.nodes.iter().map(|n| n.hidden).collect());

    block_on(m.show_clock()).unwrap();

    with_surface(&m, |s| {
        assert_eq!(s.engine.creates, creates);
        let hidden_after: Vec<bool> = s.engine.nodes.iter().map(|n| n.hidden).collect();
        assert_eq!(hidden_after, hidden_before);
    });
    // Backlight only set by the first call
    assert_eq!(m.backlight().levels.borrow().len(), 1);
}

#[test]
fn screens_are_built_once() {
    let m = machine();
    block_on(m.show_clock()).unwrap();
    block_on(m.show_link_error()).unwrap();
    let creates = with_surface(&m, |s| s.engine.creates);

    block_on(m.show_clock()).unwrap();
    block_on(m.show_link_error()).unwrap();
    assert_eq!(with_surface(&m, |s| s.engine.creates), creates);
}

#[test]
fn brightness_follows_screen() {
    let m = machine();
    block_on(m.show_clock()).unwrap();
    block_on(m.show_power_monitor()).unwrap();
    block_on(m.show_scanning()).unwrap();
    assert_eq!(
        *m.backlight().levels.borrow(),
        [Brightness::Dim, Brightness::Normal, Brightness::Normal]
    );
}

#[test]
fn corrupt_registry_is_reset_before_transition() {
    let m = machine();
    block_on(m.show_clock()).unwrap();
    block_on(m.show_power_monitor()).unwrap();
    with_surface(&m, |s| {
        // Two flags set behind the machine's back
        s.screens.set_active(Screen::Clock, true);
        s.engine.set_hidden(s.screens.widgets(Screen::Clock).unwrap().root(), false);
        assert_eq!(s.screens.active_count(), 2);
    });

    block_on(m.show_link_error()).unwrap();

    assert_eq!(block_on(m.active()), Some(Screen::LinkError));
    with_surface(&m, |s| assert_eq!(s.screens.active_count(), 1));
    assert_eq!(root_hidden(&m, Screen::Clock), Some(true));
    assert_eq!(root_hidden(&m, Screen::PowerMonitor), Some(true));
}

#[test]
fn corrupt_registry_heals_even_when_target_was_flagged() {
    let m = machine();
    block_on(m.show_clock()).unwrap();
    with_surface(&m, |s| s.screens.set_active(Screen::PowerMonitor, true));

    // PowerMonitor claims to be active but is not built; it must still appear
    block_on(m.show_power_monitor()).unwrap();

    assert_eq!(block_on(m.active()), Some(Screen::PowerMonitor));
    assert_eq!(root_hidden(&m, Screen::PowerMonitor), Some(false));
    assert_eq!(root_hidden(&m, Screen::Clock), Some(true));
}

#[test]
fn reset_all_hides_everything() {
    let m = machine();
    block_on(m.show_scanning()).unwrap();
    block_on(m.reset_all()).unwrap();
    assert_eq!(block_on(m.active()), None);
    assert_eq!(root_hidden(&m, Screen::Scanning), Some(true));
}

#[test]
fn hide_clears_single_screen() {
    let m = machine();
    block_on(m.show_ap_setup("ESP32_Config", "192.168.4.1")).unwrap();
    block_on(m.hide(Screen::ApSetup)).unwrap();
    assert_eq!(block_on(m.active()), None);
    assert_eq!(root_hidden(&m, Screen::ApSetup), Some(true));

    // Never built: nothing to do
    block_on(m.hide(Screen::Clock)).unwrap();
    with_surface(&m, |s| assert!(!s.screens.is_built(Screen::Clock)));
}

#[test]
fn ap_setup_shows_network_details() {
    let m = machine();
    block_on(m.show_ap_setup("ESP32_Config", "192.168.4.1")).unwrap();
    with_surface(&m, |s| {
        let texts: Vec<&str> = s.engine.nodes.iter().map(|n| n.text.as_str()).collect();
        assert!(texts.iter().any(|t| t.contains("ESP32_Config")));
        assert!(texts.iter().any(|t| t.contains("192.168.4.1")));
    });
}

#[test]
fn sync_setup_screen_tracks_configuration() {
    let m = machine();
    block_on(m.sync_setup_screen(false, "ESP32_Config", "192.168.4.1")).unwrap();
    assert_eq!(block_on(m.active()), Some(Screen::ApSetup));

    // Already shown: no rebuild, still active
    block_on(m.sync_setup_screen(false, "ESP32_Config", "192.168.4.1")).unwrap();
    assert_eq!(block_on(m.active()), Some(Screen::ApSetup));

    block_on(m.sync_setup_screen(true, "ESP32_Config", "192.168.4.1")).unwrap();
    assert_eq!(block_on(m.active()), None);
}

#[test]
fn home_screen_never_replaces_modal_screen() {
    let m = machine();
    for modal in [Screen::ApSetup, Screen::LinkError, Screen::Scanning] {
        block_on(m.show(modal)).unwrap();
        let levels = m.backlight().levels.borrow().len();

        assert!(!block_on(m.show_home(Screen::PowerMonitor)).unwrap());
        assert!(!block_on(m.show_home(Screen::Clock)).unwrap());
        assert_eq!(block_on(m.active()), Some(modal));
        assert_eq!(root_hidden(&m, modal), Some(false));
        assert_eq!(m.backlight().levels.borrow().len(), levels);
    }
}

#[test]
fn home_screen_switches_between_home_screens() {
    let m = machine();
    assert!(block_on(m.show_home(Screen::PowerMonitor)).unwrap());
    assert!(block_on(m.show_home(Screen::Clock)).unwrap());
    assert_eq!(block_on(m.active()), Some(Screen::Clock));

    // Already shown counts as shown, without touching the backlight again
    assert!(block_on(m.show_home(Screen::Clock)).unwrap());
    assert_eq!(
        *m.backlight().levels.borrow(),
        [Brightness::Normal, Brightness::Dim]
    );
}

// ════════════════════════════════════════════════════════════════════════
// Failure paths
// ════════════════════════════════════════════════════════════════════════

#[test]
fn build_failure_leaves_no_partial_tree() {
    let m = machine_with(RecordingEngine {
        ready: true,
        create_limit: Some(4),
        ..RecordingEngine::default()
    });

    assert_eq!(
        block_on(m.show_power_monitor()),
        Err(Error::BuildFailed(Screen::PowerMonitor))
    );
    with_surface(&m, |s| {
        assert!(!s.screens.is_built(Screen::PowerMonitor));
        assert_eq!(s.engine.live(), 0);
        assert_eq!(s.screens.active_count(), 0);
    });
    assert!(m.backlight().levels.borrow().is_empty());
}

#[test]
fn build_failure_keeps_machine_usable() {
    let m = machine_with(RecordingEngine {
        ready: true,
        create_limit: Some(4),
        ..RecordingEngine::default()
    });
    assert!(block_on(m.show_power_monitor()).is_err());

    // A smaller screen still fits
    block_on(m.show_clock()).unwrap();
    assert_eq!(block_on(m.active()), Some(Screen::Clock));
}

#[test]
fn unready_engine_is_reinitialised_once() {
    let m = machine_with(RecordingEngine::default());
    block_on(m.show_clock()).unwrap();
    assert_eq!(block_on(m.active()), Some(Screen::Clock));
    with_surface(&m, |s| assert_eq!(s.engine.init_calls, 1));
}

#[test]
fn unavailable_lock_skips_transition() {
    let m = machine_with(RecordingEngine {
        init_failures: 1,
        ..RecordingEngine::default()
    });

    assert_eq!(block_on(m.show_clock()), Err(Error::LockUnavailable));
    assert!(m.backlight().levels.borrow().is_empty());

    // Next acquisition retries and succeeds
    block_on(m.show_clock()).unwrap();
    assert_eq!(block_on(m.active()), Some(Screen::Clock));
}

#[test]
fn startup_init_failure_then_lazy_recovery() {
    let m = machine_with(RecordingEngine {
        init_failures: 1,
        ..RecordingEngine::default()
    });
    assert_eq!(block_on(m.render_lock().init()), Err(Error::Display));
    block_on(m.show_scanning()).unwrap();
    with_surface(&m, |s| assert_eq!(s.engine.init_calls, 2));
}

// ════════════════════════════════════════════════════════════════════════
// Content updates
// ════════════════════════════════════════════════════════════════════════

#[test]
fn power_update_ignored_when_screen_inactive() {
    let m = machine();
    block_on(m.show_power_monitor()).unwrap();
    block_on(m.show_clock()).unwrap();

    let mut snapshot = PowerSnapshot::unavailable();
    snapshot.data_error = false;
    snapshot.ports[0] = PortReading {
        voltage_mv: 5_000,
        power_w: 10.0,
    };
    block_on(m.update_power(&snapshot)).unwrap();

    with_surface(&m, |s| {
        let Some(ScreenWidgets::PowerMonitor { power, .. }) = s.screens.widgets(Screen::PowerMonitor) else {
            panic!("power screen not built");
        };
        assert_eq!(s.engine.text_of(power.ports[0].value), layout::NO_DATA);
    });
}

#[test]
fn power_update_writes_readout() {
    let m = machine();
    block_on(m.show_power_monitor()).unwrap();

    let mut snapshot = PowerSnapshot::unavailable();
    snapshot.data_error = false;
    snapshot.ports[2] = PortReading {
        voltage_mv: 9_000,
        power_w: 18.5,
    };
    snapshot.total_w = 18.5;
    block_on(m.update_power(&snapshot)).unwrap();

    with_surface(&m, |s| {
        let Some(ScreenWidgets::PowerMonitor { power, .. }) = s.screens.widgets(Screen::PowerMonitor) else {
            panic!("power screen not built");
        };
        assert_eq!(s.engine.text_of(power.ports[2].value), "18.50W");
        assert_eq!(s.engine.nodes[power.ports[2].bar].value, 18);
        assert_eq!(s.engine.text_of(power.total), "18.5W");
    });

    // Fetch failure falls back to placeholders
    block_on(m.update_power(&PowerSnapshot::unavailable())).unwrap();
    with_surface(&m, |s| {
        let Some(ScreenWidgets::PowerMonitor { power, .. }) = s.screens.widgets(Screen::PowerMonitor) else {
            panic!("power screen not built");
        };
        for port in power.ports {
            assert_eq!(s.engine.text_of(port.value), "--.-W");
            assert_eq!(s.engine.nodes[port.bar].value, 0);
        }
    });
}

#[test]
fn clock_update_skips_unchanged_time() {
    let m = machine();
    block_on(m.show_clock()).unwrap();
    let now = ClockTime {
        year: 2024,
        month: 3,
        day: 7,
        hour: 9,
        minute: 5,
        second: 2,
    };
    block_on(m.update_clock(now)).unwrap();

    let (time, date) = with_surface(&m, |s| match s.screens.widgets(Screen::Clock) {
        Some(ScreenWidgets::Clock { time, date, .. }) => (time, date),
        _ => panic!("clock not built"),
    });
    with_surface(&m, |s| {
        assert_eq!(s.engine.text_of(time), "09:05:02");
        assert_eq!(s.engine.text_of(date), "2024-03-07");
        // Scribble over the label; an unchanged time must not rewrite it
        s.engine.set_text(time, "x");
    });

    block_on(m.update_clock(now)).unwrap();
    with_surface(&m, |s| assert_eq!(s.engine.text_of(time), "x"));

    block_on(m.update_clock(ClockTime { second: 3, ..now })).unwrap();
    with_surface(&m, |s| assert_eq!(s.engine.text_of(time), "09:05:03"));
}

#[test]
fn clock_update_ignored_while_hidden() {
    let m = machine();
    block_on(m.show_clock()).unwrap();
    block_on(m.show_power_monitor()).unwrap();
    let now = ClockTime {
        year: 2024,
        month: 3,
        day: 7,
        hour: 9,
        minute: 5,
        second: 2,
    };
    block_on(m.update_clock(now)).unwrap();

    with_surface(&m, |s| {
        let Some(ScreenWidgets::Clock { time, .. }) = s.screens.widgets(Screen::Clock) else {
            panic!("clock not built");
        };
        assert_eq!(s.engine.text_of(time), "--:--:--");
        assert_eq!(s.shown_clock, None);
    });
}

#[test]
fn scan_status_text() {
    let m = machine();
    // Not built yet: ignored
    block_on(m.update_scan_status("3 networks")).unwrap();
    block_on(m.show_scanning()).unwrap();
    block_on(m.update_scan_status("5 networks")).unwrap();
    with_surface(&m, |s| {
        assert!(s.engine.nodes.iter().any(|n| n.text == "5 networks"));
    });
}

#[test]
fn portrait_layout_builds_every_screen() {
    let m: Machine = ScreenStateMachine::new(
        RecordingEngine::ready(),
        RecordingBacklight::default(),
        Layout::for_rotation(Rotation::try_from(0).unwrap()),
    );
    assert_eq!(m.layout(), Layout::Portrait);
    for screen in Screen::ALL {
        block_on(m.show(screen)).unwrap();
    }
    with_surface(&m, |s| {
        assert!(Screen::ALL.iter().all(|sc| s.screens.is_built(*sc)));
    });
}

// ════════════════════════════════════════════════════════════════════════
// Concurrency
// ════════════════════════════════════════════════════════════════════════

#[test]
fn render_pump_and_transitions_interleave() {
    let m = machine();
    let done = Cell::new(false);

    let pump = async {
        while !done.get() {
            m.render_lock().pump().await.unwrap();
            embassy_futures::yield_now().await;
        }
    };
    let transitions = async {
        for _ in 0..10 {
            for screen in Screen::ALL {
                m.show(screen).await.unwrap();
                embassy_futures::yield_now().await;
                let guard = m.render_lock().acquire().await.unwrap();
                assert_eq!(guard.screens.active_count(), 1);
            }
        }
        done.set(true);
    };
    block_on(join(pump, transitions));

    with_surface(&m, |s| {
        assert!(s.engine.pumps > 0);
        assert_eq!(s.screens.active_count(), 1);
    });
    assert_eq!(block_on(m.active()), Some(Screen::Scanning));
}
