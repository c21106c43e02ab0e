//! Retained widget arena rendered with `embedded-graphics`.
//!
//! A fixed-capacity tree of containers, labels, bars and arcs. Screens are
//! built once and then toggled hidden/visible; only value and text updates
//! touch the tree afterwards. [`Scene::render`] repaints the whole panel
//! when something changed since the previous frame.

use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_6X10, FONT_9X15},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::Rgb565,
    prelude::*,
    primitives::{Arc, PrimitiveStyle, PrimitiveStyleBuilder, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use heapless::{String, Vec};

use crate::config::SCENE_CAPACITY;
use crate::engine::{palette, Align, Font, Style, WidgetEngine, WidgetKind};
use crate::error::Error;

/// Index of a widget in the scene arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WidgetId(u8);

impl WidgetId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

const TEXT_MAX: usize = 48;
const ARC_STROKE: u32 = 8;
const ARC_START_DEG: f32 = 135.0;
const ARC_SWEEP_DEG: f32 = 270.0;

#[derive(Clone, Debug)]
struct Widget {
    kind: WidgetKind,
    parent: Option<WidgetId>,
    alive: bool,
    hidden: bool,
    width: u16,
    height: u16,
    align: Align,
    dx: i16,
    dy: i16,
    style: Style,
    text: String<TEXT_MAX>,
    min: i32,
    max: i32,
    /// Displayed value, eased towards `target`.
    value: i32,
    target: i32,
}

impl Widget {
    fn new(kind: WidgetKind, parent: Option<WidgetId>) -> Self {
        Self {
            kind,
            parent,
            alive: true,
            hidden: false,
            width: 0,
            height: 0,
            align: Align::Center,
            dx: 0,
            dy: 0,
            style: Style::text(palette::TEXT, Font::Medium),
            text: String::new(),
            min: 0,
            max: 100,
            value: 0,
            target: 0,
        }
    }

    /// Fraction of the range covered by the displayed value, 0..=1000.
    fn permille(&self) -> u32 {
        let span = (self.max - self.min).max(1);
        let pos = (self.value - self.min).clamp(0, span);
        (pos as i64 * 1000 / span as i64) as u32
    }
}

/// Fixed-capacity widget tree.
pub struct Scene {
    widgets: Vec<Widget, SCENE_CAPACITY>,
    width: u16,
    height: u16,
    ready: bool,
    dirty: bool,
}

impl Scene {
    /// Create an empty scene for a panel of the given size. The scene is
    /// unusable until [`WidgetEngine::init`] succeeds.
    pub const fn new(width: u16, height: u16) -> Self {
        Self {
            widgets: Vec::new(),
            width,
            height,
            ready: false,
            dirty: false,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width as u32, self.height as u32)
    }

    /// Number of live widgets.
    pub fn live(&self) -> usize {
        self.widgets.iter().filter(|w| w.alive).count()
    }

    /// Returns true once per change, so the caller only flushes the panel
    /// after the tree was modified.
    pub fn take_dirty(&mut self) -> bool {
        core::mem::replace(&mut self.dirty, false)
    }

    pub fn text(&self, id: WidgetId) -> Option<&str> {
        self.get(id).map(|w| w.text.as_str())
    }

    pub fn value(&self, id: WidgetId) -> Option<i32> {
        self.get(id).map(|w| w.value)
    }

    /// Repaint the whole panel.
    pub fn render<D>(&self, target: &mut D) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = Rgb565>,
    {
        target.clear(palette::BACKGROUND)?;
        let panel = Rectangle::new(Point::zero(), self.size());
        for (index, widget) in self.widgets.iter().enumerate() {
            if widget.alive && widget.parent.is_none() && !widget.hidden {
                self.draw_subtree(target, index, panel)?;
            }
        }
        Ok(())
    }

    fn draw_subtree<D>(&self, target: &mut D, index: usize, parent: Rectangle) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = Rgb565>,
    {
        let widget = &self.widgets[index];
        let bounds = place(widget, parent);
        draw_widget(target, widget, bounds)?;

        for (child, w) in self.widgets.iter().enumerate() {
            if w.alive && !w.hidden && w.parent == Some(WidgetId(index as u8)) {
                self.draw_subtree(target, child, bounds)?;
            }
        }
        Ok(())
    }

    fn get(&self, id: WidgetId) -> Option<&Widget> {
        self.widgets.get(id.index()).filter(|w| w.alive)
    }

    fn get_mut(&mut self, id: WidgetId) -> Option<&mut Widget> {
        self.dirty = true;
        self.widgets.get_mut(id.index()).filter(|w| w.alive)
    }
}

impl WidgetEngine for Scene {
    type Handle = WidgetId;

    fn init(&mut self) -> Result<(), Error> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Display);
        }
        self.widgets.clear();
        self.ready = true;
        self.dirty = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn create(&mut self, parent: Option<WidgetId>, kind: WidgetKind) -> Option<WidgetId> {
        if let Some(p) = parent {
            self.get(p)?;
        }
        let widget = Widget::new(kind, parent);
        self.dirty = true;

        // Reuse a deleted slot before growing the arena
        if let Some(slot) = self.widgets.iter().position(|w| !w.alive) {
            self.widgets[slot] = widget;
            return Some(WidgetId(slot as u8));
        }
        let slot = self.widgets.len();
        self.widgets.push(widget).ok()?;
        Some(WidgetId(slot as u8))
    }

    fn delete(&mut self, handle: WidgetId) {
        let Some(widget) = self.widgets.get_mut(handle.index()) else {
            return;
        };
        widget.alive = false;
        self.dirty = true;

        let children: Vec<WidgetId, SCENE_CAPACITY> = self
            .widgets
            .iter()
            .enumerate()
            .filter(|(_, w)| w.alive && w.parent == Some(handle))
            .map(|(i, _)| WidgetId(i as u8))
            .collect();
        for child in children {
            self.delete(child);
        }
    }

    fn set_size(&mut self, handle: WidgetId, width: u16, height: u16) {
        if let Some(w) = self.get_mut(handle) {
            w.width = width;
            w.height = height;
        }
    }

    fn align(&mut self, handle: WidgetId, align: Align, dx: i16, dy: i16) {
        if let Some(w) = self.get_mut(handle) {
            w.align = align;
            w.dx = dx;
            w.dy = dy;
        }
    }

    fn set_style(&mut self, handle: WidgetId, style: Style) {
        if let Some(w) = self.get_mut(handle) {
            w.style = style;
        }
    }

    fn set_text(&mut self, handle: WidgetId, text: &str) {
        if let Some(w) = self.get_mut(handle) {
            w.text.clear();
            for c in text.chars() {
                if w.text.push(c).is_err() {
                    break;
                }
            }
        }
    }

    fn set_range(&mut self, handle: WidgetId, min: i32, max: i32) {
        if let Some(w) = self.get_mut(handle) {
            w.min = min;
            w.max = max.max(min + 1);
        }
    }

    fn set_value(&mut self, handle: WidgetId, value: i32, animate: bool) {
        if let Some(w) = self.get_mut(handle) {
            w.target = value.clamp(w.min, w.max);
            if !animate {
                w.value = w.target;
            }
        }
    }

    fn set_hidden(&mut self, handle: WidgetId, hidden: bool) {
        if let Some(w) = self.get_mut(handle) {
            w.hidden = hidden;
        }
    }

    fn is_hidden(&self, handle: WidgetId) -> bool {
        self.get(handle).map_or(true, |w| w.hidden)
    }

    fn pump_timers(&mut self) {
        let mut moved = false;
        for w in self.widgets.iter_mut().filter(|w| w.alive && w.value != w.target) {
            // Ease: close a quarter of the gap per tick, at least one step
            let gap = w.target - w.value;
            let step = (gap / 4).abs().max(1);
            w.value += step * gap.signum();
            moved = true;
        }
        self.dirty |= moved;
    }
}

/// Bounds of `widget` inside `parent` after alignment and offset.
fn place(widget: &Widget, parent: Rectangle) -> Rectangle {
    let pw = parent.size.width as i32;
    let ph = parent.size.height as i32;
    let (w, h) = match widget.kind {
        // Labels size themselves to their text
        WidgetKind::Label if widget.width == 0 => label_size(widget),
        _ => (widget.width as i32, widget.height as i32),
    };

    let x = match widget.align {
        Align::TopLeft | Align::LeftMid | Align::BottomLeft => 0,
        Align::TopMid | Align::Center | Align::BottomMid => (pw - w) / 2,
        Align::TopRight | Align::RightMid | Align::BottomRight => pw - w,
    };
    let y = match widget.align {
        Align::TopLeft | Align::TopMid | Align::TopRight => 0,
        Align::LeftMid | Align::Center | Align::RightMid => (ph - h) / 2,
        Align::BottomLeft | Align::BottomMid | Align::BottomRight => ph - h,
    };

    Rectangle::new(
        parent.top_left + Point::new(x + widget.dx as i32, y + widget.dy as i32),
        Size::new(w.max(0) as u32, h.max(0) as u32),
    )
}

fn label_size(widget: &Widget) -> (i32, i32) {
    let font = mono_font(widget.style.font);
    let cw = font.character_size.width as i32 + font.character_spacing as i32;
    let ch = font.character_size.height as i32;
    let lines = widget.text.lines().count().max(1) as i32;
    let longest = widget.text.lines().map(|l| l.len()).max().unwrap_or(0) as i32;
    (longest * cw, lines * ch)
}

fn mono_font(font: Font) -> &'static MonoFont<'static> {
    match font {
        Font::Small => &FONT_6X10,
        Font::Medium => &FONT_9X15,
        Font::Large => &FONT_10X20,
    }
}

fn draw_widget<D>(target: &mut D, widget: &Widget, bounds: Rectangle) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb565>,
{
    let style = widget.style;
    match widget.kind {
        WidgetKind::Container => {
            let mut fill = PrimitiveStyleBuilder::new();
            if let Some(bg) = style.background {
                fill = fill.fill_color(bg);
            }
            if let Some(border) = style.border {
                fill = fill.stroke_color(border).stroke_width(1);
            }
            bounds.into_styled(fill.build()).draw(target)?;
        }
        WidgetKind::Label => {
            let character_style = MonoTextStyle::new(mono_font(style.font), style.foreground);
            let text_style = TextStyleBuilder::new()
                .alignment(Alignment::Center)
                .baseline(Baseline::Top)
                .build();
            let anchor = Point::new(bounds.center().x, bounds.top_left.y);
            Text::with_text_style(&widget.text, anchor, character_style, text_style).draw(target)?;
        }
        WidgetKind::Bar => {
            if let Some(track) = style.background {
                bounds
                    .into_styled(PrimitiveStyle::with_fill(track))
                    .draw(target)?;
            }
            let filled = bounds.size.width * widget.permille() / 1000;
            if filled > 0 {
                Rectangle::new(bounds.top_left, Size::new(filled, bounds.size.height))
                    .into_styled(PrimitiveStyle::with_fill(style.foreground))
                    .draw(target)?;
            }
        }
        WidgetKind::Arc => {
            let diameter = bounds.size.width.min(bounds.size.height);
            let center = bounds.center();
            if let Some(track) = style.background {
                Arc::with_center(center, diameter, ARC_START_DEG.deg(), ARC_SWEEP_DEG.deg())
                    .into_styled(PrimitiveStyle::with_stroke(track, ARC_STROKE))
                    .draw(target)?;
            }
            let sweep = ARC_SWEEP_DEG * widget.permille() as f32 / 1000.0;
            if sweep > 0.0 {
                Arc::with_center(center, diameter, ARC_START_DEG.deg(), sweep.deg())
                    .into_styled(PrimitiveStyle::with_stroke(style.foreground, ARC_STROKE))
                    .draw(target)?;
            }
        }
    }
    Ok(())
}
