//! Widget engine contract.
//!
//! The screen layer never touches pixels directly; it creates and mutates
//! retained widgets through [`WidgetEngine`]. The firmware backs this with
//! [`crate::scene::Scene`], tests back it with a recording double.
//!
//! None of these calls are thread-safe. They are only reachable through a
//! [`crate::render_lock::RenderGuard`].

use embedded_graphics::pixelcolor::{Rgb565, RgbColor, WebColors};

use crate::error::Error;

/// Widget flavours the screens are built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WidgetKind {
    /// Plain rectangle, used as a screen root or grouping box.
    Container,
    /// Single or multi-line text.
    Label,
    /// Horizontal progress bar.
    Bar,
    /// 270° gauge arc.
    Arc,
}

/// Anchor of a widget inside its parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Align {
    Center,
    TopLeft,
    TopMid,
    TopRight,
    LeftMid,
    RightMid,
    BottomLeft,
    BottomMid,
    BottomRight,
}

/// Text size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Font {
    Small,
    Medium,
    Large,
}

/// Visual attributes of a widget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Style {
    /// Fill colour; `None` leaves the parent visible.
    pub background: Option<Rgb565>,
    /// Text colour, or indicator colour for bars and arcs.
    pub foreground: Rgb565,
    pub border: Option<Rgb565>,
    pub font: Font,
}

impl Style {
    pub const fn panel(background: Rgb565) -> Self {
        Self {
            background: Some(background),
            foreground: palette::TEXT,
            border: None,
            font: Font::Medium,
        }
    }

    pub const fn text(foreground: Rgb565, font: Font) -> Self {
        Self {
            background: None,
            foreground,
            border: None,
            font,
        }
    }

    pub const fn indicator(foreground: Rgb565, track: Rgb565) -> Self {
        Self {
            background: Some(track),
            foreground,
            border: None,
            font: Font::Small,
        }
    }

    pub const fn with_border(mut self, border: Rgb565) -> Self {
        self.border = Some(border);
        self
    }
}

/// Shared colours.
pub mod palette {
    use super::*;

    pub const BACKGROUND: Rgb565 = Rgb565::BLACK;
    pub const TEXT: Rgb565 = Rgb565::WHITE;
    pub const MUTED: Rgb565 = Rgb565::CSS_GRAY;
    pub const TRACK: Rgb565 = Rgb565::CSS_DARK_SLATE_GRAY;
    pub const ACCENT: Rgb565 = Rgb565::CSS_DEEP_SKY_BLUE;
    pub const ALERT: Rgb565 = Rgb565::RED;

    // Port voltage bands
    pub const BAND_20V: Rgb565 = Rgb565::MAGENTA;
    pub const BAND_15V: Rgb565 = Rgb565::RED;
    pub const BAND_12V: Rgb565 = Rgb565::CSS_DARK_ORANGE;
    pub const BAND_9V: Rgb565 = Rgb565::YELLOW;
    pub const BAND_5V: Rgb565 = Rgb565::GREEN;
    pub const BAND_LOW: Rgb565 = Rgb565::WHITE;
    pub const BAND_INVALID: Rgb565 = Rgb565::CSS_GRAY;
}

/// Retained-mode graphics backend.
///
/// Handles are opaque and only meaningful to the engine that issued them.
/// Deleting a widget deletes its children too.
pub trait WidgetEngine {
    type Handle: Copy + Eq + core::fmt::Debug;

    /// Bring the engine into a usable state. Called once at startup and
    /// again by the render lock if the engine reports itself not ready.
    fn init(&mut self) -> Result<(), Error>;

    fn is_ready(&self) -> bool;

    /// Create a widget under `parent`, or at the top level for `None`.
    /// Returns `None` when the engine is out of resources.
    fn create(&mut self, parent: Option<Self::Handle>, kind: WidgetKind) -> Option<Self::Handle>;

    fn delete(&mut self, handle: Self::Handle);

    fn set_size(&mut self, handle: Self::Handle, width: u16, height: u16);

    fn align(&mut self, handle: Self::Handle, align: Align, dx: i16, dy: i16);

    fn set_style(&mut self, handle: Self::Handle, style: Style);

    fn set_text(&mut self, handle: Self::Handle, text: &str);

    /// Value range of a bar or arc.
    fn set_range(&mut self, handle: Self::Handle, min: i32, max: i32);

    /// Target value of a bar or arc; `animate` eases towards it over the
    /// following [`pump_timers`](Self::pump_timers) calls.
    fn set_value(&mut self, handle: Self::Handle, value: i32, animate: bool);

    fn set_hidden(&mut self, handle: Self::Handle, hidden: bool);

    fn is_hidden(&self, handle: Self::Handle) -> bool;

    /// Advance animations and other timed work.
    fn pump_timers(&mut self);
}
