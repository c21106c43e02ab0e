//! Widget trees for each screen, in portrait and landscape variants.
//!
//! Builders only create and position widgets; values are filled in by the
//! `update_*` operations on [`super::ScreenStateMachine`].

use core::fmt::Write;

use heapless::{String, Vec};

use super::{BuildContext, Layout, Screen};
use crate::config::POWER_PORTS;
use crate::engine::{palette, Align, Font, Style, WidgetEngine, WidgetKind};
use crate::error::Error;

/// Placeholder shown on port and total readouts without data.
pub const NO_DATA: &str = "--.-W";

/// Handles of one power port row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortWidgets<H> {
    pub value: H,
    pub bar: H,
}

/// Handles updated by the power readout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerWidgets<H> {
    pub total: H,
    pub gauge: H,
    pub ports: [PortWidgets<H>; POWER_PORTS],
}

/// Built widget tree of one screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreenWidgets<H> {
    ApSetup { root: H },
    LinkError { root: H },
    Clock { root: H, time: H, date: H },
    PowerMonitor { root: H, power: PowerWidgets<H> },
    Scanning { root: H, status: H },
}

impl<H: Copy> ScreenWidgets<H> {
    /// Root container; hiding it hides the whole screen.
    pub fn root(&self) -> H {
        match *self {
            ScreenWidgets::ApSetup { root }
            | ScreenWidgets::LinkError { root }
            | ScreenWidgets::Clock { root, .. }
            | ScreenWidgets::PowerMonitor { root, .. }
            | ScreenWidgets::Scanning { root, .. } => root,
        }
    }
}

/// Build the widget tree for `screen`.
///
/// The new root starts hidden. If any widget cannot be created the partial
/// tree is deleted and [`Error::BuildFailed`] returned.
pub fn build<E: WidgetEngine>(
    engine: &mut E,
    screen: Screen,
    ctx: &BuildContext<'_>,
) -> Result<ScreenWidgets<E::Handle>, Error> {
    let (width, height) = ctx.layout.size();
    let root = engine
        .create(None, WidgetKind::Container)
        .ok_or(Error::BuildFailed(screen))?;
    engine.set_size(root, width, height);
    engine.align(root, Align::Center, 0, 0);
    engine.set_style(root, Style::panel(palette::BACKGROUND));
    engine.set_hidden(root, true);

    let built = match screen {
        Screen::ApSetup => build_ap_setup(engine, root, ctx),
        Screen::LinkError => build_link_error(engine, root),
        Screen::Clock => build_clock(engine, root),
        Screen::PowerMonitor => build_power_monitor(engine, root, ctx.layout),
        Screen::Scanning => build_scanning(engine, root),
    };

    match built {
        Some(widgets) => Ok(widgets),
        None => {
            engine.delete(root);
            Err(Error::BuildFailed(screen))
        }
    }
}

fn label<E: WidgetEngine>(
    engine: &mut E,
    parent: E::Handle,
    text: &str,
    style: Style,
    align: Align,
    dx: i16,
    dy: i16,
) -> Option<E::Handle> {
    let handle = engine.create(Some(parent), WidgetKind::Label)?;
    engine.set_style(handle, style);
    engine.set_text(handle, text);
    engine.align(handle, align, dx, dy);
    Some(handle)
}

fn build_ap_setup<E: WidgetEngine>(
    engine: &mut E,
    root: E::Handle,
    ctx: &BuildContext<'_>,
) -> Option<ScreenWidgets<E::Handle>> {
    let (ssid, address) = ctx.ap.unwrap_or(("", ""));

    label(engine, root, "WiFi Setup", Style::text(palette::ACCENT, Font::Large), Align::TopMid, 0, 16)?;

    let mut line: String<48> = String::new();
    let _ = write!(line, "SSID: {}", ssid);
    label(engine, root, &line, Style::text(palette::TEXT, Font::Medium), Align::Center, 0, -16)?;

    line.clear();
    let _ = write!(line, "IP: {}", address);
    label(engine, root, &line, Style::text(palette::TEXT, Font::Medium), Align::Center, 0, 8)?;

    label(
        engine,
        root,
        "Join the network,\nthen open the IP",
        Style::text(palette::MUTED, Font::Small),
        Align::BottomMid,
        0,
        -16,
    )?;

    Some(ScreenWidgets::ApSetup { root })
}

fn build_link_error<E: WidgetEngine>(engine: &mut E, root: E::Handle) -> Option<ScreenWidgets<E::Handle>> {
    label(engine, root, "WiFi Error", Style::text(palette::ALERT, Font::Large), Align::Center, 0, -20)?;
    label(
        engine,
        root,
        "Check WiFi settings\nRetrying...",
        Style::text(palette::TEXT, Font::Medium),
        Align::Center,
        0,
        16,
    )?;
    Some(ScreenWidgets::LinkError { root })
}

fn build_clock<E: WidgetEngine>(engine: &mut E, root: E::Handle) -> Option<ScreenWidgets<E::Handle>> {
    let time = label(engine, root, "--:--:--", Style::text(palette::TEXT, Font::Large), Align::Center, 0, -12)?;
    let date = label(engine, root, "----------", Style::text(palette::MUTED, Font::Medium), Align::Center, 0, 20)?;
    Some(ScreenWidgets::Clock { root, time, date })
}

fn build_scanning<E: WidgetEngine>(engine: &mut E, root: E::Handle) -> Option<ScreenWidgets<E::Handle>> {
    label(engine, root, "Scanning", Style::text(palette::ACCENT, Font::Large), Align::Center, 0, -16)?;
    let status = label(engine, root, "", Style::text(palette::MUTED, Font::Medium), Align::Center, 0, 16)?;
    Some(ScreenWidgets::Scanning { root, status })
}

/// Geometry of the power screen for one orientation.
struct PowerGeometry {
    gauge_size: u16,
    gauge_align: Align,
    gauge_dx: i16,
    gauge_dy: i16,
    /// Top-left of the first port row.
    rows_x: i16,
    rows_y: i16,
    row_pitch: i16,
    bar_width: u16,
}

impl PowerGeometry {
    const fn for_layout(layout: Layout) -> Self {
        match layout {
            Layout::Landscape => Self {
                gauge_size: 150,
                gauge_align: Align::LeftMid,
                gauge_dx: 6,
                gauge_dy: 0,
                rows_x: 168,
                rows_y: 4,
                row_pitch: 33,
                bar_width: 144,
            },
            Layout::Portrait => Self {
                gauge_size: 150,
                gauge_align: Align::TopMid,
                gauge_dx: 0,
                gauge_dy: 6,
                rows_x: 8,
                rows_y: 164,
                row_pitch: 31,
                bar_width: 156,
            },
        }
    }
}

fn build_power_monitor<E: WidgetEngine>(
    engine: &mut E,
    root: E::Handle,
    layout: Layout,
) -> Option<ScreenWidgets<E::Handle>> {
    let geo = PowerGeometry::for_layout(layout);

    let gauge = engine.create(Some(root), WidgetKind::Arc)?;
    engine.set_size(gauge, geo.gauge_size, geo.gauge_size);
    engine.align(gauge, geo.gauge_align, geo.gauge_dx, geo.gauge_dy);
    engine.set_style(gauge, Style::indicator(palette::ACCENT, palette::TRACK));
    engine.set_range(gauge, 0, 100);
    engine.set_value(gauge, 0, false);

    let total = label(engine, gauge, NO_DATA, Style::text(palette::MUTED, Font::Large), Align::Center, 0, -6)?;
    label(engine, gauge, "total", Style::text(palette::MUTED, Font::Small), Align::Center, 0, 18)?;

    let mut ports: Vec<PortWidgets<E::Handle>, POWER_PORTS> = Vec::new();
    for i in 0..POWER_PORTS {
        let y = geo.rows_y + geo.row_pitch * i as i16;

        let mut name: String<4> = String::new();
        let _ = write!(name, "P{}", i + 1);
        label(engine, root, &name, Style::text(palette::MUTED, Font::Small), Align::TopLeft, geo.rows_x, y + 3)?;

        let value = label(
            engine,
            root,
            NO_DATA,
            Style::text(palette::BAND_INVALID, Font::Medium),
            Align::TopLeft,
            geo.rows_x + 24,
            y,
        )?;

        let bar = engine.create(Some(root), WidgetKind::Bar)?;
        engine.set_size(bar, geo.bar_width, 8);
        engine.align(bar, Align::TopLeft, geo.rows_x, y + 18);
        engine.set_style(bar, Style::indicator(palette::BAND_INVALID, palette::TRACK));
        engine.set_range(bar, 0, 100);
        engine.set_value(bar, 0, false);

        ports.push(PortWidgets { value, bar }).ok()?;
    }
    let ports = ports.into_array().ok()?;

    Some(ScreenWidgets::PowerMonitor {
        root,
        power: PowerWidgets { total, gauge, ports },
    })
}
