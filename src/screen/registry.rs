//! Built widget trees and active flags for all screens.
//!
//! Lives inside the render lock ([`crate::render_lock::Surface`]), so every
//! read and write here already happens under mutual exclusion.

use super::layout::{self, ScreenWidgets};
use super::{BuildContext, Screen};
use crate::engine::WidgetEngine;
use crate::error::Error;

#[derive(Clone, Copy)]
struct Slot<H> {
    widgets: Option<ScreenWidgets<H>>,
    active: bool,
}

impl<H> Slot<H> {
    const fn empty() -> Self {
        Self {
            widgets: None,
            active: false,
        }
    }
}

/// Per-screen built subtree (or none) and active flag.
pub struct ScreenRegistry<H> {
    slots: [Slot<H>; Screen::COUNT],
}

impl<H> ScreenRegistry<H> {
    pub const fn new() -> Self {
        Self {
            slots: [
                Slot::empty(),
                Slot::empty(),
                Slot::empty(),
                Slot::empty(),
                Slot::empty(),
            ],
        }
    }
}

impl<H> Default for ScreenRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Copy + Eq> ScreenRegistry<H> {
    pub fn is_built(&self, screen: Screen) -> bool {
        self.slots[screen.index()].widgets.is_some()
    }

    pub fn is_active(&self, screen: Screen) -> bool {
        self.slots[screen.index()].active
    }

    /// Number of screens currently flagged active. Anything above one is
    /// corruption and gets reset by the state machine.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    /// First active screen, if any.
    pub fn active(&self) -> Option<Screen> {
        Screen::ALL.into_iter().find(|s| self.is_active(*s))
    }

    pub fn widgets(&self, screen: Screen) -> Option<ScreenWidgets<H>> {
        self.slots[screen.index()].widgets
    }

    /// Build the screen's widget tree unless it already exists.
    /// A failed build leaves the slot empty.
    pub fn ensure_built<E>(&mut self, engine: &mut E, screen: Screen, ctx: &BuildContext<'_>) -> Result<(), Error>
    where
        E: WidgetEngine<Handle = H>,
    {
        let slot = &mut self.slots[screen.index()];
        if slot.widgets.is_none() {
            debug!("building {:?} screen", screen);
            slot.widgets = Some(layout::build(engine, screen, ctx)?);
        }
        Ok(())
    }

    /// Show or hide a built screen's root. No-op if the screen was never
    /// built.
    pub fn set_visible<E>(&mut self, engine: &mut E, screen: Screen, visible: bool)
    where
        E: WidgetEngine<Handle = H>,
    {
        if let Some(widgets) = self.slots[screen.index()].widgets {
            engine.set_hidden(widgets.root(), !visible);
        }
    }

    pub fn set_active(&mut self, screen: Screen, active: bool) {
        self.slots[screen.index()].active = active;
    }

    /// Hide every built screen and clear every active flag, regardless of
    /// what the flags claimed before.
    pub fn hide_all<E>(&mut self, engine: &mut E)
    where
        E: WidgetEngine<Handle = H>,
    {
        for slot in self.slots.iter_mut() {
            if let Some(widgets) = slot.widgets {
                engine.set_hidden(widgets.root(), true);
            }
            slot.active = false;
        }
    }
}
