//! ST7789 panel wrapper and the render pump.

use embassy_time::{Duration, Ticker};
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::delay::Delay;
use esp_hal::gpio::Output;
use esp_hal::spi::master::Spi;
use esp_hal::Blocking;
use log::{info, warn};
use mipidsi::interface::SpiInterface;
use mipidsi::models::ST7789;
use mipidsi::options::{ColorInversion, Orientation, Rotation as PanelRotation};
use mipidsi::Builder;
use powerview::config::{PANEL_LONG_SIDE, PANEL_SHORT_SIDE, RENDER_PUMP_MS};
use powerview::engine::WidgetEngine;
use powerview::Rotation;
use static_cell::StaticCell;

use crate::Screens;

/// The 172-pixel side sits in the middle of the controller's 240 columns.
const COLUMN_OFFSET: u16 = 34;

type PanelSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;

/// Type alias for the concrete display driver.
pub type Panel = mipidsi::Display<SpiInterface<'static, PanelSpi, Output<'static>>, ST7789, Output<'static>>;

static PANEL_BUFFER: StaticCell<[u8; 512]> = StaticCell::new();

/// Pins and bus of the panel.
pub struct PanelPins {
    pub spi: Spi<'static, Blocking>,
    pub cs: Output<'static>,
    pub dc: Output<'static>,
    pub reset: Output<'static>,
}

fn panel_rotation(rotation: Rotation) -> PanelRotation {
    match rotation.degrees() {
        90 => PanelRotation::Deg90,
        180 => PanelRotation::Deg180,
        270 => PanelRotation::Deg270,
        _ => PanelRotation::Deg0,
    }
}

/// Initialise the ST7789 in the stored orientation.
pub fn init(pins: PanelPins, rotation: Rotation) -> Panel {
    let spi = ExclusiveDevice::new(pins.spi, pins.cs, Delay::new()).expect("panel spi device");
    let interface = SpiInterface::new(spi, pins.dc, PANEL_BUFFER.init([0; 512]));

    let panel = Builder::new(ST7789, interface)
        .display_size(PANEL_SHORT_SIDE, PANEL_LONG_SIDE)
        .display_offset(COLUMN_OFFSET, 0)
        .invert_colors(ColorInversion::Inverted)
        .orientation(Orientation::new().rotate(panel_rotation(rotation)))
        .reset_pin(pins.reset)
        .init(&mut Delay::new())
        .expect("panel init");

    info!("panel ready, rotation {}", rotation.degrees());
    panel
}

/// Render pump: advance widget animations and push dirty frames to the
/// panel. Each step holds the render lock only for its own duration.
#[embassy_executor::task]
pub async fn render_task(screens: &'static Screens, mut panel: Panel) {
    let mut ticker = Ticker::every(Duration::from_millis(RENDER_PUMP_MS));
    loop {
        ticker.next().await;
        let Ok(mut surface) = screens.render_lock().acquire().await else {
            continue;
        };
        surface.engine.pump_timers();
        if surface.engine.take_dirty() && surface.engine.render(&mut panel).is_err() {
            warn!("panel transfer failed");
        }
    }
}
