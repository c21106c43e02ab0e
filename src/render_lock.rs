//! Render lock - serialises every access to the widget engine.
//!
//! The engine and the screen registry live *inside* the mutex, so the only
//! way to reach them is through a [`RenderGuard`]. Releasing is dropping the
//! guard; there is no unlock call to forget on an early return.
//!
//! ```text
//!   render pump ──┐
//!   screen ops  ──┼──► RenderLock::acquire() ──► RenderGuard ──► Surface { engine, screens }
//!   supervisor  ──┘
//! ```

use core::ops::{Deref, DerefMut};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};

use crate::engine::WidgetEngine;
use crate::error::Error;
use crate::screen::{ClockTime, ScreenRegistry};

/// Everything that must only be touched while holding the render lock.
pub struct Surface<E: WidgetEngine> {
    pub engine: E,
    pub screens: ScreenRegistry<E::Handle>,
    /// Last time written to the clock labels, for change detection.
    pub(crate) shown_clock: Option<ClockTime>,
}

/// Mutual exclusion around the widget engine.
pub struct RenderLock<M: RawMutex, E: WidgetEngine> {
    surface: Mutex<M, Surface<E>>,
}

/// Scoped access to the engine; the lock is released on drop.
pub struct RenderGuard<'a, M: RawMutex, E: WidgetEngine> {
    surface: MutexGuard<'a, M, Surface<E>>,
}

impl<M: RawMutex, E: WidgetEngine> RenderLock<M, E> {
    /// Wrap an engine. The engine is not initialised here; call
    /// [`init`](Self::init) once the display hardware is up.
    pub const fn new(engine: E) -> Self {
        Self {
            surface: Mutex::new(Surface {
                engine,
                screens: ScreenRegistry::new(),
                shown_clock: None,
            }),
        }
    }

    /// Initialise the engine at startup.
    pub async fn init(&self) -> Result<(), Error> {
        let mut surface = self.surface.lock().await;
        surface.engine.init()
    }

    /// Wait for exclusive access to the engine.
    ///
    /// If the engine reports itself not ready (startup init failed or was
    /// skipped) one re-initialisation is attempted. When that fails the lock
    /// is released again and [`Error::LockUnavailable`] is returned; callers
    /// skip their render work for this round.
    pub async fn acquire(&self) -> Result<RenderGuard<'_, M, E>, Error> {
        let mut surface = self.surface.lock().await;
        if !surface.engine.is_ready() {
            warn!("render engine not ready, re-initialising");
            if surface.engine.init().is_err() {
                error!("render engine re-init failed");
                return Err(Error::LockUnavailable);
            }
            info!("render engine re-initialised");
        }
        Ok(RenderGuard { surface })
    }

    /// One render-pump step: advance engine timers under the lock.
    pub async fn pump(&self) -> Result<(), Error> {
        let mut surface = self.acquire().await?;
        surface.engine.pump_timers();
        Ok(())
    }
}

impl<M: RawMutex, E: WidgetEngine> Deref for RenderGuard<'_, M, E> {
    type Target = Surface<E>;

    fn deref(&self) -> &Surface<E> {
        &self.surface
    }
}

impl<M: RawMutex, E: WidgetEngine> DerefMut for RenderGuard<'_, M, E> {
    fn deref_mut(&mut self) -> &mut Surface<E> {
        &mut self.surface
    }
}
